// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The practice session: owns the output, the sample cache, the voice engine, the
//! backing track and the transport, and sequences them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{Bus, Device, Mixer};
use crate::backing::{BackingTrack, BackingTrackError};
use crate::config;
use crate::config::error::ConfigError;
use crate::preferences::Preferences;
use crate::samples::{FileFetcher, LoadError, NoteEvent, Progress, SampleCache, VoiceEngine};
use crate::transport::{Position, Transport, TransportError, TransportState};

/// Reasons a session cannot become ready. Each is reported on its own.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("samples failed to load: {0}")]
    SamplesFailed(#[source] LoadError),

    #[error("backing track failed to buffer: {0}")]
    BackingTrackFailed(#[source] BackingTrackError),

    #[error("audio output could not be activated: {0}")]
    OutputInactive(String),
}

/// Background loads started at construction. Their results are kept until the first
/// call to `become_ready`. A retry leaves out a backing track that already buffered.
struct PendingLoads {
    samples: JoinHandle<Result<(), LoadError>>,
    backing_track: Option<JoinHandle<Result<(), BackingTrackError>>>,
}

/// A practice session.
pub struct Session {
    device: Arc<dyn Device>,
    mixer: Arc<Mixer>,
    cache: Arc<SampleCache>,
    voices: VoiceEngine,
    backing_track: Arc<BackingTrack>,
    backing_track_path: PathBuf,
    transport: Mutex<Transport>,
    required_samples: Vec<u8>,
    /// Held across the whole of `become_ready`, so concurrent callers wait on the same
    /// in-flight loads instead of starting their own.
    pending: tokio::sync::Mutex<Option<PendingLoads>>,
    loaded: AtomicBool,
    backing_track_end_logged: AtomicBool,
}

impl Session {
    /// Creates a session and starts loading the required samples and the backing track
    /// in the background. Must be called from within a tokio runtime.
    pub fn new(config: &config::Session, device: Arc<dyn Device>) -> Result<Session, ConfigError> {
        let mixer = device.mixer();
        let files = config.samples().files(config.base_path())?;
        let cache = Arc::new(SampleCache::new(
            Arc::new(FileFetcher::new(files)),
            mixer.sample_rate(),
        ));
        let voices = VoiceEngine::new(device.clone(), cache.clone(), config.samples().fade()?);
        let backing_track = Arc::new(BackingTrack::new(device.clone()));
        let transport = Transport::new(
            config.progression().progression()?,
            config.progression().timing()?,
            backing_track.clone(),
        );
        let required_samples = config.samples().notes();
        let backing_track_path = config.backing_track();

        info!(
            device = device.to_string(),
            samples = required_samples.len(),
            backing_track = ?backing_track_path,
            "Loading session"
        );
        let pending = spawn_loads(
            cache.clone(),
            required_samples.clone(),
            Some((backing_track.clone(), backing_track_path.clone())),
        );

        Ok(Session {
            device,
            mixer,
            cache,
            voices,
            backing_track,
            backing_track_path,
            transport: Mutex::new(transport),
            required_samples,
            pending: tokio::sync::Mutex::new(Some(pending)),
            loaded: AtomicBool::new(false),
            backing_track_end_logged: AtomicBool::new(false),
        })
    }

    /// Waits for the background loads and activates the output. Load failures are
    /// reported here; calling again after a failure retries the loads, and loads that
    /// already succeeded are served from the cache.
    pub async fn become_ready(&self) -> Result<(), ReadinessError> {
        let mut guard = self.pending.lock().await;
        let pending = match guard.take() {
            Some(pending) => Some(pending),
            None if self.loaded.load(Ordering::Acquire) => None,
            None => {
                let backing_track = (!self.backing_track.is_loaded())
                    .then(|| (self.backing_track.clone(), self.backing_track_path.clone()));
                info!(
                    reload_backing_track = backing_track.is_some(),
                    "Retrying session loads"
                );
                Some(spawn_loads(
                    self.cache.clone(),
                    self.required_samples.clone(),
                    backing_track,
                ))
            }
        };

        if let Some(pending) = pending {
            let samples = pending
                .samples
                .await
                .map_err(|e| LoadError::Task(e.to_string()))
                .and_then(|result| result);
            let backing_track = match pending.backing_track {
                Some(handle) => handle
                    .await
                    .map_err(|e| BackingTrackError::Task(e.to_string()))
                    .and_then(|result| result),
                None => Ok(()),
            };

            if let Err(e) = &samples {
                error!(err = e.to_string(), "Samples failed to load");
            }
            if let Err(e) = &backing_track {
                error!(err = e.to_string(), "Backing track failed to buffer");
            }
            samples.map_err(ReadinessError::SamplesFailed)?;
            backing_track.map_err(ReadinessError::BackingTrackFailed)?;
            self.loaded.store(true, Ordering::Release);
        }

        if !self.device.is_running() {
            self.device
                .activate()
                .map_err(|e| ReadinessError::OutputInactive(e.to_string()))?;
        }
        if !self.device.is_running() {
            return Err(ReadinessError::OutputInactive(format!(
                "{} is {:?}",
                self.device,
                self.device.state()
            )));
        }

        drop(guard);
        info!("Session ready");
        Ok(())
    }

    /// True when every required sample is decoded, the backing track is buffered and
    /// the output is running.
    pub fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
            && self
                .required_samples
                .iter()
                .all(|note| self.cache.get(*note).is_some())
            && self.backing_track.is_loaded()
            && self.device.is_running()
    }

    /// Starts the piece from the top.
    pub fn start(&self) -> Result<(), TransportError> {
        if !self.is_ready() {
            warn!("Start requested before the session is ready");
            return Err(TransportError::NotReady);
        }

        let mut transport = self.transport.lock();
        transport.start()?;
        self.backing_track.play();
        self.backing_track_end_logged.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Pauses the piece and releases sounding notes.
    pub fn pause(&self) {
        let mut transport = self.transport.lock();
        if transport.state() != TransportState::Running {
            warn!("Pause requested while not running");
            return;
        }
        transport.pause();
        self.backing_track.pause();
        self.voices.stop_all();
    }

    /// Resumes a paused piece.
    pub fn resume(&self) -> Result<(), TransportError> {
        let mut transport = self.transport.lock();
        if let Err(e) = transport.resume() {
            warn!(err = e.to_string(), "Unable to resume");
            return Err(e);
        }
        self.backing_track.resume();
        Ok(())
    }

    /// Stops the piece and releases sounding notes.
    pub fn stop(&self) {
        self.transport.lock().stop();
        self.backing_track.stop();
        self.voices.stop_all();
    }

    /// The transport state.
    pub fn state(&self) -> TransportState {
        self.transport.lock().state()
    }

    /// The current musical position.
    pub fn position(&self) -> Position {
        self.transport.lock().position()
    }

    /// Periodic housekeeping for the render loop. Reaps finished voices and stops the
    /// session when the piece is over: after the final loop when a loop limit is set,
    /// otherwise when the backing track runs out. Returns the position for this frame.
    pub fn tick(&self) -> Position {
        self.voices.reap();

        let (position, state, bounded) = {
            let transport = self.transport.lock();
            (
                transport.position(),
                transport.state(),
                transport.timing().max_loops.is_some(),
            )
        };
        if state == TransportState::Idle {
            return position;
        }

        if position.finished {
            info!(
                loops = position.loops_completed,
                "Final loop completed, stopping"
            );
            self.stop();
        } else if self.backing_track.has_ended() {
            if !bounded {
                info!(
                    loops = position.loops_completed,
                    "Backing track reached its end, stopping"
                );
                self.stop();
            } else if !self.backing_track_end_logged.swap(true, Ordering::Relaxed) {
                info!("Backing track reached its end");
            }
        }
        position
    }

    /// Plays a note. See [`VoiceEngine::play_note`].
    pub fn play_note(&self, voice_id: &str, pitch: u8) -> bool {
        self.voices.play_note(voice_id, pitch)
    }

    /// Stops a note. See [`VoiceEngine::stop_note`].
    pub fn stop_note(&self, voice_id: &str, pitch: u8) -> bool {
        self.voices.stop_note(voice_id, pitch)
    }

    /// The currently registered voices.
    pub fn active_voices(&self) -> Vec<(String, u8)> {
        self.voices.active_voices()
    }

    /// Sets a bus volume by name. Values are clamped to [0, 1]. Returns false for an
    /// unknown bus.
    pub fn set_volume(&self, bus: &str, value: f32) -> bool {
        match bus.parse::<Bus>() {
            Ok(bus) => {
                self.mixer.set_gain(bus, value);
                info!(bus = %bus, gain = self.mixer.gain(bus), "Volume set");
                true
            }
            Err(e) => {
                warn!(err = e, "Ignoring volume change");
                false
            }
        }
    }

    /// Toggles a bus mute by name. Returns the new mute state, or None for an unknown bus.
    pub fn toggle_mute(&self, bus: &str) -> Option<bool> {
        match bus.parse::<Bus>() {
            Ok(bus) => {
                let muted = self.mixer.toggle_mute(bus);
                info!(bus = %bus, muted, "Mute toggled");
                Some(muted)
            }
            Err(e) => {
                warn!(err = e, "Ignoring mute toggle");
                None
            }
        }
    }

    /// Applies stored volume and mute preferences.
    pub fn apply_preferences(&self, preferences: &Preferences) {
        if let Some(volume) = preferences.backing_track_volume {
            self.mixer.set_gain(Bus::BackingTrack, volume);
        }
        if let Some(volume) = preferences.samples_volume {
            self.mixer.set_gain(Bus::Samples, volume);
        }
        if let Some(muted) = preferences.backing_track_muted {
            self.mixer.set_muted(Bus::BackingTrack, muted);
        }
        if let Some(muted) = preferences.samples_muted {
            self.mixer.set_muted(Bus::Samples, muted);
        }
    }

    /// Captures the current volume and mute settings.
    pub fn capture_preferences(&self) -> Preferences {
        Preferences {
            backing_track_volume: Some(self.mixer.gain(Bus::BackingTrack)),
            samples_volume: Some(self.mixer.gain(Bus::Samples)),
            backing_track_muted: Some(self.mixer.is_muted(Bus::BackingTrack)),
            samples_muted: Some(self.mixer.is_muted(Bus::Samples)),
            difficulty: None,
        }
    }

    /// Subscribes to note started and ended events.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<NoteEvent> {
        self.voices.subscribe()
    }

    /// How much of the required sample set is loaded.
    pub fn load_progress(&self) -> Progress {
        self.cache.progress(self.required_samples.len())
    }

    /// The output device.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.to_string())
            .field("transport", &self.transport.lock())
            .field("voices", &self.voices)
            .field("backing_track", &self.backing_track)
            .field("cache", &self.cache)
            .finish()
    }
}

fn spawn_loads(
    cache: Arc<SampleCache>,
    required_samples: Vec<u8>,
    backing_track: Option<(Arc<BackingTrack>, PathBuf)>,
) -> PendingLoads {
    PendingLoads {
        samples: tokio::spawn(async move {
            cache.load_many(&required_samples).await.map(|_| ())
        }),
        backing_track: backing_track.map(|(backing_track, path)| {
            tokio::spawn(async move { backing_track.load(&path).await })
        }),
    }
}
