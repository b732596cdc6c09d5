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

//! The voice engine: note-on/note-off handling over the sample cache and the mixer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::events::{NoteEvent, NoteEventKind};
use super::loader::SampleCache;
use super::voice::{FinishedVoice, Voice, VoiceRegistry, VoiceSource};
use crate::audio::mixer::ActiveSource;
use crate::audio::{self, Bus, Device, Mixer};
use crate::clock::Clock;

/// Plays and stops sampled notes, one voice per input identity.
pub struct VoiceEngine {
    device: Arc<dyn Device>,
    mixer: Arc<Mixer>,
    cache: Arc<SampleCache>,
    /// Fade-out length in output frames.
    fade_frames: u64,
    registry: Mutex<VoiceRegistry>,
    finished_tx: crossbeam_channel::Sender<FinishedVoice>,
    finished_rx: crossbeam_channel::Receiver<FinishedVoice>,
    subscribers: Mutex<Vec<crossbeam_channel::Sender<NoteEvent>>>,
}

impl VoiceEngine {
    /// Creates a new voice engine playing through the given device.
    pub fn new(device: Arc<dyn Device>, cache: Arc<SampleCache>, fade: Duration) -> VoiceEngine {
        let mixer = device.mixer();
        let fade_frames = mixer.duration_to_frames(fade);
        let (finished_tx, finished_rx) = crossbeam_channel::unbounded();
        VoiceEngine {
            device,
            mixer,
            cache,
            fade_frames,
            registry: Mutex::new(VoiceRegistry::default()),
            finished_tx,
            finished_rx,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Starts a note under the given identity. Any voice already sounding under that
    /// identity is faded out first. Returns false if the output is not running or no
    /// sample is loaded for the pitch.
    pub fn play_note(&self, voice_id: &str, pitch: u8) -> bool {
        self.reap();

        if !self.device.is_running() {
            warn!(voice_id, pitch, "Audio output is not running, ignoring note");
            return false;
        }
        let Some(sample) = self.cache.get(pitch) else {
            warn!(voice_id, pitch, "No sample loaded for pitch, ignoring note");
            return false;
        };

        let now = self.mixer.now();
        let voice = Voice::new(pitch);
        let source = VoiceSource::new(
            voice_id,
            &voice,
            sample,
            self.fade_frames,
            self.finished_tx.clone(),
        );

        let replaced = self.registry.lock().insert(voice_id, voice);
        if let Some(old) = replaced {
            debug!(
                voice_id,
                old_pitch = old.pitch(),
                pitch,
                "Retriggered, fading out previous voice"
            );
            old.fade_out();
            self.emit(NoteEventKind::Ended, voice_id, old.pitch(), now);
        }

        self.mixer.add_source(ActiveSource {
            id: audio::next_source_id(),
            bus: Bus::Samples,
            source: Box::new(source),
        });
        self.emit(NoteEventKind::Started, voice_id, pitch, now);
        true
    }

    /// Fades out the voice under the given identity. The identity is authoritative; a
    /// pitch mismatch is only logged. Returns false if no voice is registered.
    pub fn stop_note(&self, voice_id: &str, pitch: u8) -> bool {
        self.reap();

        let registry = self.registry.lock();
        let Some(voice) = registry.get(voice_id) else {
            warn!(voice_id, pitch, "No voice registered, ignoring stop");
            return false;
        };
        if voice.pitch() != pitch {
            warn!(
                voice_id,
                pitch,
                registered_pitch = voice.pitch(),
                "Pitch does not match registered voice, stopping anyway"
            );
        }
        if !voice.fade_out() {
            debug!(voice_id, "Voice is already fading");
        }
        true
    }

    /// Fades out every registered voice. Returns the number of voices affected.
    pub fn stop_all(&self) -> usize {
        self.reap();

        let registry = self.registry.lock();
        for (voice_id, voice) in registry.iter() {
            if voice.fade_out() {
                debug!(voice_id, "Fading out voice");
            }
        }
        if registry.len() > 0 {
            info!(voices = registry.len(), "Stopping all voices");
        }
        registry.len()
    }

    /// Removes voices whose playback has ended and publishes their end events.
    pub fn reap(&self) {
        let finished: Vec<FinishedVoice> = self.finished_rx.try_iter().collect();
        if finished.is_empty() {
            return;
        }

        let mut ended = Vec::new();
        {
            let mut registry = self.registry.lock();
            for voice in finished {
                if registry
                    .remove_instance(&voice.voice_id, voice.instance)
                    .is_some()
                {
                    ended.push(voice);
                } else {
                    debug!(
                        voice_id = voice.voice_id,
                        instance = voice.instance,
                        "Stale voice finished after being replaced"
                    );
                }
            }
        }

        for voice in ended {
            self.emit(NoteEventKind::Ended, &voice.voice_id, voice.pitch, voice.at);
        }
    }

    /// The registered voices and their pitches, sorted by identity.
    pub fn active_voices(&self) -> Vec<(String, u8)> {
        self.reap();
        let mut voices: Vec<(String, u8)> = self
            .registry
            .lock()
            .iter()
            .map(|(voice_id, voice)| (voice_id.clone(), voice.pitch()))
            .collect();
        voices.sort();
        voices
    }

    /// Subscribes to note started and ended events.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<NoteEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, kind: NoteEventKind, voice_id: &str, pitch: u8, timestamp: Duration) {
        let event = NoteEvent {
            kind,
            voice_id: voice_id.to_string(),
            pitch,
            timestamp,
        };
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

impl std::fmt::Debug for VoiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceEngine")
            .field("active_voices", &self.registry.lock().len())
            .field("fade_frames", &self.fade_frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::audio::mock;
    use crate::samples::loader::{Fetch, Fetched, LoadError, LoadedSample};

    struct NoFetch;

    impl Fetch for NoFetch {
        fn fetch(&self, key: u8) -> Result<Fetched, LoadError> {
            Err(LoadError::UnknownKey(key))
        }
    }

    /// A 1 kHz mono engine with a 10 frame fade. Pitch 60 is one second long,
    /// pitch 61 is ten frames long.
    fn engine() -> (mock::Device, VoiceEngine) {
        let device = mock::Device::get("mock", 1000, 1);
        let cache = Arc::new(SampleCache::new(Arc::new(NoFetch), 1000));
        cache.insert(60, LoadedSample::new(vec![1.0; 1000], 1, 1000));
        cache.insert(61, LoadedSample::new(vec![1.0; 10], 1, 1000));
        cache.insert(62, LoadedSample::new(vec![0.5; 1000], 1, 1000));
        let engine = VoiceEngine::new(
            Arc::new(device.clone()),
            cache,
            Duration::from_millis(10),
        );
        (device, engine)
    }

    #[test]
    fn test_play_requires_running_output() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        assert!(!engine.play_note("a", 60));
        assert!(engine.active_voices().is_empty());

        device.activate()?;
        assert!(engine.play_note("a", 60));
        Ok(())
    }

    #[test]
    fn test_play_unknown_pitch() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;
        assert!(!engine.play_note("a", 99));
        assert!(engine.active_voices().is_empty());
        Ok(())
    }

    #[test]
    fn test_same_pitch_different_identities() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;
        assert!(engine.play_note("a", 60));
        assert!(engine.play_note("b", 60));
        assert_eq!(
            vec![("a".to_string(), 60), ("b".to_string(), 60)],
            engine.active_voices()
        );
        assert_eq!(vec![2.0; 5], device.advance(Duration::from_millis(5)));
        Ok(())
    }

    #[test]
    fn test_retrigger_keeps_one_voice() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        let events = engine.subscribe();
        device.activate()?;

        assert!(engine.play_note("a", 60));
        assert!(engine.play_note("a", 62));
        assert_eq!(vec![("a".to_string(), 62)], engine.active_voices());

        let kinds: Vec<(NoteEventKind, u8)> =
            events.try_iter().map(|e| (e.kind, e.pitch)).collect();
        assert_eq!(
            vec![
                (NoteEventKind::Started, 60),
                (NoteEventKind::Ended, 60),
                (NoteEventKind::Started, 62)
            ],
            kinds
        );

        // The old voice fades out without disturbing the new registration.
        device.advance(Duration::from_millis(50));
        assert_eq!(vec![("a".to_string(), 62)], engine.active_voices());
        assert_eq!(1, engine.mixer.source_count());
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn test_stop_unregistered_is_noop() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;
        assert!(engine.play_note("a", 60));

        assert!(!engine.stop_note("b", 60));
        assert_eq!(vec![("a".to_string(), 60)], engine.active_voices());
        Ok(())
    }

    #[test]
    fn test_stop_fades_then_removes() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        let events = engine.subscribe();
        device.activate()?;

        assert!(engine.play_note("a", 60));
        assert_eq!(vec![1.0; 5], device.advance(Duration::from_millis(5)));

        // A pitch mismatch is only logged.
        assert!(engine.stop_note("a", 64));
        let faded = device.advance(Duration::from_millis(5));
        assert!(faded[0] < 1.0);
        assert!(faded[4] < faded[0]);
        assert_eq!(vec![("a".to_string(), 60)], engine.active_voices());

        let rest = device.advance(Duration::from_millis(20));
        assert!(rest[5..].iter().all(|s| *s == 0.0));
        assert!(engine.active_voices().is_empty());

        let last = events.try_iter().last().unwrap();
        assert_eq!(NoteEventKind::Ended, last.kind);
        assert_eq!("a", last.voice_id);
        assert_eq!(60, last.pitch);
        assert_eq!(Duration::from_millis(30), last.timestamp);
        Ok(())
    }

    #[test]
    fn test_stale_stop_does_not_remove_retriggered_voice() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;

        assert!(engine.play_note("a", 60));
        assert!(engine.stop_note("a", 60));
        assert!(engine.play_note("a", 62));

        device.advance(Duration::from_millis(50));
        assert_eq!(vec![("a".to_string(), 62)], engine.active_voices());
        Ok(())
    }

    #[test]
    fn test_natural_end_removes_voice() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;

        assert!(engine.play_note("a", 61));
        device.advance(Duration::from_millis(20));
        assert!(engine.active_voices().is_empty());
        assert!(!engine.stop_note("a", 61));
        Ok(())
    }

    #[test]
    fn test_stop_all() -> Result<(), Box<dyn Error>> {
        let (device, engine) = engine();
        device.activate()?;

        assert!(engine.play_note("a", 60));
        assert!(engine.play_note("b", 62));
        assert_eq!(2, engine.stop_all());
        // Issuing it again is harmless.
        assert_eq!(2, engine.stop_all());

        device.advance(Duration::from_millis(20));
        assert!(engine.active_voices().is_empty());
        assert_eq!(0, engine.mixer.source_count());
        Ok(())
    }
}
