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

//! Voice bookkeeping and rendering.
//!
//! A voice is one sounding note, keyed by the input that triggered it. The registry
//! maps input identities to voices; the source renders the voice inside the mixer,
//! including its fade-out, and reports back once it has gone silent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::loader::LoadedSample;
use crate::audio::Source;

/// Global voice instance counter.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// The gain a fade-out ramps down to before the voice halts.
pub(crate) const FADE_FLOOR: f32 = 0.001;

/// Shared between a registered voice and its source in the mixer.
#[derive(Debug, Default)]
pub(crate) struct VoiceControl {
    fade_requested: AtomicBool,
}

impl VoiceControl {
    fn request_fade(&self) -> bool {
        !self.fade_requested.swap(true, Ordering::AcqRel)
    }

    fn fade_requested(&self) -> bool {
        self.fade_requested.load(Ordering::Acquire)
    }
}

/// Represents a registered voice.
#[derive(Debug)]
pub(crate) struct Voice {
    /// Unique ID for this voice instance.
    instance: u64,
    /// The note being played.
    pitch: u8,
    control: Arc<VoiceControl>,
}

impl Voice {
    /// Creates a new voice.
    pub(crate) fn new(pitch: u8) -> Voice {
        Voice {
            instance: NEXT_INSTANCE_ID.fetch_add(1, Ordering::SeqCst),
            pitch,
            control: Arc::new(VoiceControl::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn instance(&self) -> u64 {
        self.instance
    }

    pub(crate) fn pitch(&self) -> u8 {
        self.pitch
    }

    /// Starts the fade-out. Returns false if the voice was already fading.
    pub(crate) fn fade_out(&self) -> bool {
        self.control.request_fade()
    }

    #[cfg(test)]
    pub(crate) fn is_fading(&self) -> bool {
        self.control.fade_requested()
    }
}

/// Sent by a source once its voice has stopped sounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FinishedVoice {
    pub(crate) voice_id: String,
    pub(crate) instance: u64,
    pub(crate) pitch: u8,
    pub(crate) at: Duration,
}

/// Maps input identities to the voice they are sounding.
#[derive(Debug, Default)]
pub(crate) struct VoiceRegistry {
    voices: HashMap<String, Voice>,
}

impl VoiceRegistry {
    /// Registers a voice, returning the voice it replaced, if any.
    pub(crate) fn insert(&mut self, voice_id: &str, voice: Voice) -> Option<Voice> {
        self.voices.insert(voice_id.to_string(), voice)
    }

    pub(crate) fn get(&self, voice_id: &str) -> Option<&Voice> {
        self.voices.get(voice_id)
    }

    /// Removes a voice only if it is still the given instance.
    pub(crate) fn remove_instance(&mut self, voice_id: &str, instance: u64) -> Option<Voice> {
        match self.voices.get(voice_id) {
            Some(voice) if voice.instance == instance => self.voices.remove(voice_id),
            _ => None,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Voice)> {
        self.voices.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.voices.len()
    }
}

/// An exponential gain ramp toward the fade floor.
#[derive(Debug)]
struct Fade {
    multiplier: f32,
    remaining: u64,
}

/// Renders one voice into the samples bus.
pub(crate) struct VoiceSource {
    voice_id: String,
    instance: u64,
    pitch: u8,
    sample: Arc<LoadedSample>,
    /// The next frame of the sample to play.
    position: usize,
    /// Per-voice gain, under the bus gain.
    gain: f32,
    fade_frames: u64,
    fade: Option<Fade>,
    control: Arc<VoiceControl>,
    finished: crossbeam_channel::Sender<FinishedVoice>,
}

impl VoiceSource {
    pub(crate) fn new(
        voice_id: &str,
        voice: &Voice,
        sample: Arc<LoadedSample>,
        fade_frames: u64,
        finished: crossbeam_channel::Sender<FinishedVoice>,
    ) -> VoiceSource {
        VoiceSource {
            voice_id: voice_id.to_string(),
            instance: voice.instance,
            pitch: voice.pitch,
            sample,
            position: 0,
            gain: 1.0,
            fade_frames,
            fade: None,
            control: voice.control.clone(),
            finished,
        }
    }

    fn start_fade(&mut self) {
        let remaining = if self.gain <= FADE_FLOOR {
            0
        } else {
            self.fade_frames
        };
        let multiplier = if remaining == 0 {
            1.0
        } else {
            (FADE_FLOOR / self.gain).powf(1.0 / remaining as f32)
        };
        self.fade = Some(Fade {
            multiplier,
            remaining,
        });
    }
}

impl Source for VoiceSource {
    fn render(&mut self, output: &mut [f32], channels: u16, bus_gain: f32) -> bool {
        if self.fade.is_none() && self.control.fade_requested() {
            self.start_fade();
        }

        let frames = self.sample.frames();
        let sample_channels = self.sample.channels() as usize;
        let data = self.sample.data();

        for frame in output.chunks_exact_mut(channels as usize) {
            if let Some(fade) = self.fade.as_mut() {
                if fade.remaining == 0 {
                    return false;
                }
                self.gain *= fade.multiplier;
                fade.remaining -= 1;
            }
            if self.position >= frames {
                return false;
            }

            let base = self.position * sample_channels;
            for (channel, out) in frame.iter_mut().enumerate() {
                *out += data[base + channel % sample_channels] * self.gain * bus_gain;
            }
            self.position += 1;
        }

        self.position < frames && !matches!(self.fade, Some(Fade { remaining: 0, .. }))
    }

    fn finished(&mut self, at: Duration) {
        // The engine may already be gone.
        let _ = self.finished.send(FinishedVoice {
            voice_id: self.voice_id.clone(),
            instance: self.instance,
            pitch: self.pitch,
            at,
        });
    }
}
