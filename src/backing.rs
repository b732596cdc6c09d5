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

//! The backing track.
//!
//! The backing track is decoded fully into memory before playback and rendered through
//! the backing-track bus. Its clock is the output's rendered-frame clock, so the musical
//! transport reads exactly the time the listener hears.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::decode::{decode_native, resample_track, DecodeError};
use crate::audio::mixer::ActiveSource;
use crate::audio::{self, Bus, Device, Mixer, Source};
use crate::clock::Clock;
use crate::samples::LoadedSample;

#[derive(Debug, Error)]
pub enum BackingTrackError {
    #[error("unable to read backing track {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to decode backing track: {0}")]
    Decode(#[from] DecodeError),

    #[error("backing track load task failed: {0}")]
    Task(String),
}

/// Shared between the driver and the source rendering in the mixer.
#[derive(Debug, Default)]
struct PlaybackControl {
    paused: AtomicBool,
    stopped: AtomicBool,
    ended: AtomicBool,
    /// Frames played so far.
    position: AtomicU64,
}

/// Renders the backing track into the mixer.
struct BackingSource {
    track: Arc<LoadedSample>,
    control: Arc<PlaybackControl>,
}

impl Source for BackingSource {
    fn render(&mut self, output: &mut [f32], channels: u16, gain: f32) -> bool {
        if self.control.stopped.load(Ordering::Acquire) {
            return false;
        }
        if self.control.paused.load(Ordering::Acquire) {
            return true;
        }

        let frames = self.track.frames();
        let track_channels = self.track.channels() as usize;
        let data = self.track.data();
        let mut position = self.control.position.load(Ordering::Acquire) as usize;

        for frame in output.chunks_exact_mut(channels as usize) {
            if position >= frames {
                break;
            }
            let base = position * track_channels;
            for (channel, out) in frame.iter_mut().enumerate() {
                *out += data[base + channel % track_channels] * gain;
            }
            position += 1;
        }

        self.control
            .position
            .store(position as u64, Ordering::Release);
        position < frames
    }

    fn finished(&mut self, at: Duration) {
        if !self.control.stopped.load(Ordering::Acquire) {
            self.control.ended.store(true, Ordering::Release);
            debug!(at = ?at, "Backing track reached its end");
        }
    }
}

/// Drives the backing track. Never drives its own clock; the output does.
pub struct BackingTrack {
    device: Arc<dyn Device>,
    mixer: Arc<Mixer>,
    track: Mutex<Option<Arc<LoadedSample>>>,
    playback: Mutex<Option<Arc<PlaybackControl>>>,
}

impl BackingTrack {
    /// Creates a backing track driver for the given output. Nothing is loaded yet.
    pub fn new(device: Arc<dyn Device>) -> BackingTrack {
        let mixer = device.mixer();
        BackingTrack {
            device,
            mixer,
            track: Mutex::new(None),
            playback: Mutex::new(None),
        }
    }

    /// Reads and decodes the backing track into memory at the output rate.
    pub async fn load(&self, path: &Path) -> Result<(), BackingTrackError> {
        info!(path = ?path, "Buffering backing track");
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| BackingTrackError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_string());
        let sample_rate = self.mixer.sample_rate();

        let decoded = tokio::task::spawn_blocking(move || {
            resample_track(decode_native(bytes, extension.as_deref())?, sample_rate)
        })
        .await
        .map_err(|e| BackingTrackError::Task(e.to_string()))??;

        let track = LoadedSample::from(decoded);
        info!(
            path = ?path,
            duration_ms = track.duration().as_millis(),
            "Backing track buffered"
        );
        *self.track.lock() = Some(Arc::new(track));
        Ok(())
    }

    /// Uses already decoded audio as the backing track.
    pub fn set_track(&self, track: LoadedSample) {
        *self.track.lock() = Some(Arc::new(track));
    }

    /// Returns true once the backing track is fully buffered.
    pub fn is_loaded(&self) -> bool {
        self.track.lock().is_some()
    }

    /// The length of the buffered track.
    pub fn duration(&self) -> Option<Duration> {
        self.track.lock().as_ref().map(|track| track.duration())
    }

    /// Starts playback from the beginning. Returns false if nothing is loaded.
    pub fn play(&self) -> bool {
        let Some(track) = self.track.lock().clone() else {
            warn!("Backing track is not loaded, not playing");
            return false;
        };

        self.stop();
        let control = Arc::new(PlaybackControl::default());
        self.mixer.add_source(ActiveSource {
            id: audio::next_source_id(),
            bus: Bus::BackingTrack,
            source: Box::new(BackingSource {
                track,
                control: control.clone(),
            }),
        });
        *self.playback.lock() = Some(control);
        info!("Backing track playing");
        true
    }

    /// Holds the playback position. The output keeps running.
    pub fn pause(&self) {
        if let Some(control) = self.playback.lock().as_ref() {
            control.paused.store(true, Ordering::Release);
        }
    }

    /// Continues from the held position.
    pub fn resume(&self) {
        if let Some(control) = self.playback.lock().as_ref() {
            control.paused.store(false, Ordering::Release);
        }
    }

    /// Stops playback and removes the track from the mixer.
    pub fn stop(&self) {
        if let Some(control) = self.playback.lock().take() {
            control.stopped.store(true, Ordering::Release);
            debug!("Backing track stopped");
        }
    }

    /// Returns true if the track played through to its end.
    pub fn has_ended(&self) -> bool {
        self.playback
            .lock()
            .as_ref()
            .is_some_and(|control| control.ended.load(Ordering::Acquire))
    }

    /// How far into the track playback is.
    pub fn position(&self) -> Duration {
        let frames = self
            .playback
            .lock()
            .as_ref()
            .map(|control| control.position.load(Ordering::Acquire))
            .unwrap_or(0);
        Duration::from_nanos(
            (frames as u128 * 1_000_000_000 / self.mixer.sample_rate() as u128) as u64,
        )
    }
}

impl Clock for BackingTrack {
    fn now(&self) -> Duration {
        self.mixer.now()
    }

    fn is_available(&self) -> bool {
        self.is_loaded() && self.device.is_running()
    }
}

impl std::fmt::Debug for BackingTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingTrack")
            .field("loaded", &self.is_loaded())
            .field("duration", &self.duration())
            .field("position", &self.position())
            .finish()
    }
}
