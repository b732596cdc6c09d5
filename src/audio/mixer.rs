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
// Core audio mixing logic shared by the CPAL output and the mock device.
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;

/// The two gain buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// The backing track.
    BackingTrack,
    /// All triggered sample voices.
    Samples,
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backingTrack" | "backing_track" | "backing" => Ok(Bus::BackingTrack),
            "samples" => Ok(Bus::Samples),
            _ => Err(format!("unknown bus: {}", s)),
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bus::BackingTrack => write!(f, "backingTrack"),
            Bus::Samples => write!(f, "samples"),
        }
    }
}

/// A persistent gain stage. The level survives muting.
struct BusGain {
    /// f32 bits of the level in [0, 1].
    level: AtomicU32,
    muted: AtomicBool,
}

impl BusGain {
    fn new() -> BusGain {
        BusGain {
            level: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    fn effective(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            self.level()
        }
    }
}

/// Something the mixer can play.
pub trait Source: Send + Sync {
    /// Adds up to `output.len() / channels` frames into the interleaved output, scaled by
    /// the bus gain. Returns false once the source has nothing more to play.
    fn render(&mut self, output: &mut [f32], channels: u16, gain: f32) -> bool;

    /// Called once, when the mixer drops the source, with the clock reading at that point.
    fn finished(&mut self, _at: Duration) {}
}

/// Represents an active audio source in the mixer.
pub struct ActiveSource {
    /// Unique ID for this source.
    pub id: u64,
    /// The bus this source plays through.
    pub bus: Bus,
    /// The source itself.
    pub source: Box<dyn Source>,
}

/// Mixes active sources into an interleaved output and counts rendered frames. The
/// frame count is the hardware clock: it only advances as the output consumes audio.
pub struct Mixer {
    /// Active audio sources currently playing.
    sources: Mutex<Vec<ActiveSource>>,
    /// Number of output channels.
    num_channels: u16,
    /// Sample rate.
    sample_rate: u32,
    /// Frames rendered since creation.
    frames: AtomicU64,
    backing_track: BusGain,
    samples: BusGain,
}

impl Mixer {
    /// Creates a new audio mixer.
    pub fn new(num_channels: u16, sample_rate: u32) -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            num_channels: num_channels.max(1),
            sample_rate: sample_rate.max(1),
            frames: AtomicU64::new(0),
            backing_track: BusGain::new(),
            samples: BusGain::new(),
        }
    }

    fn bus(&self, bus: Bus) -> &BusGain {
        match bus {
            Bus::BackingTrack => &self.backing_track,
            Bus::Samples => &self.samples,
        }
    }

    /// Adds a new audio source to the mixer.
    pub fn add_source(&self, source: ActiveSource) {
        debug!(id = source.id, bus = %source.bus, "Adding source to mixer");
        self.sources.lock().push(source);
    }

    /// Returns the number of active sources.
    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Sets a bus level. Values outside [0, 1] are clamped.
    pub fn set_gain(&self, bus: Bus, value: f32) {
        let clamped = if value.is_nan() {
            warn!(bus = %bus, "Ignoring NaN gain");
            return;
        } else {
            value.clamp(0.0, 1.0)
        };
        if clamped != value {
            debug!(bus = %bus, value, clamped, "Gain clamped");
        }
        self.bus(bus)
            .level
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// Returns a bus level, regardless of mute.
    pub fn gain(&self, bus: Bus) -> f32 {
        self.bus(bus).level()
    }

    /// Mutes or unmutes a bus.
    pub fn set_muted(&self, bus: Bus, muted: bool) {
        self.bus(bus).muted.store(muted, Ordering::Relaxed);
    }

    /// Flips the mute flag of a bus and returns the new value.
    pub fn toggle_mute(&self, bus: Bus) -> bool {
        !self.bus(bus).muted.fetch_xor(true, Ordering::Relaxed)
    }

    /// Returns true if the bus is muted.
    pub fn is_muted(&self, bus: Bus) -> bool {
        self.bus(bus).muted.load(Ordering::Relaxed)
    }

    /// Renders the next block into the interleaved output buffer and advances the clock.
    pub fn process_into(&self, output: &mut [f32]) {
        output.fill(0.0);
        let channels = self.num_channels;
        let frames = (output.len() / channels as usize) as u64;
        let end = self.frames_to_duration(self.frames.load(Ordering::Acquire) + frames);

        {
            let mut sources = self.sources.lock();
            sources.retain_mut(|active| {
                let gain = self.bus(active.bus).effective();
                if active.source.render(output, channels, gain) {
                    true
                } else {
                    active.source.finished(end);
                    false
                }
            });
        }

        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    /// Renders the given number of frames and returns them interleaved.
    pub fn process_frames(&self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0f32; num_frames * self.num_channels as usize];
        self.process_into(&mut frames);
        frames
    }

    /// Gets the number of output channels.
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn current_frame(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Converts a duration into a frame count at the mixer rate.
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64
    }

    fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_nanos((frames as u128 * 1_000_000_000 / self.sample_rate as u128) as u64)
    }
}

impl Clock for Mixer {
    fn now(&self) -> Duration {
        self.frames_to_duration(self.current_frame())
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("num_channels", &self.num_channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.current_frame())
            .field("sources", &self.source_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Plays a fixed list of mono samples, then reports when it finished.
    struct TestSource {
        samples: Vec<f32>,
        position: usize,
        finished_at: Arc<parking_lot::Mutex<Option<Duration>>>,
    }

    impl TestSource {
        fn active(
            id: u64,
            bus: Bus,
            samples: Vec<f32>,
        ) -> (ActiveSource, Arc<parking_lot::Mutex<Option<Duration>>>) {
            let finished_at = Arc::new(parking_lot::Mutex::new(None));
            (
                ActiveSource {
                    id,
                    bus,
                    source: Box::new(TestSource {
                        samples,
                        position: 0,
                        finished_at: finished_at.clone(),
                    }),
                },
                finished_at,
            )
        }
    }

    impl Source for TestSource {
        fn render(&mut self, output: &mut [f32], channels: u16, gain: f32) -> bool {
            for frame in output.chunks_mut(channels as usize) {
                match self.samples.get(self.position) {
                    Some(sample) => {
                        for out in frame.iter_mut() {
                            *out += sample * gain;
                        }
                        self.position += 1;
                    }
                    None => return false,
                }
            }
            self.position < self.samples.len()
        }

        fn finished(&mut self, at: Duration) {
            *self.finished_at.lock() = Some(at);
        }
    }

    #[test]
    fn test_basic_mixing() {
        let mixer = Mixer::new(2, 1000);
        let (source, _) = TestSource::active(1, Bus::Samples, vec![0.5, 0.8, 0.1]);
        mixer.add_source(source);

        let frames = mixer.process_frames(2);
        assert_eq!(vec![0.5, 0.5, 0.8, 0.8], frames);
        assert_eq!(1, mixer.source_count());
    }

    #[test]
    fn test_multiple_source_mixing() {
        let mixer = Mixer::new(1, 1000);
        let (a, _) = TestSource::active(1, Bus::Samples, vec![0.5, 0.25]);
        let (b, _) = TestSource::active(2, Bus::BackingTrack, vec![0.25, 0.25]);
        mixer.add_source(a);
        mixer.add_source(b);

        assert_eq!(vec![0.75, 0.5], mixer.process_frames(2));
    }

    #[test]
    fn test_bus_gain_and_mute() {
        let mixer = Mixer::new(1, 1000);
        let (a, _) = TestSource::active(1, Bus::Samples, vec![1.0; 8]);
        let (b, _) = TestSource::active(2, Bus::BackingTrack, vec![1.0; 8]);
        mixer.add_source(a);
        mixer.add_source(b);

        mixer.set_gain(Bus::Samples, 0.5);
        mixer.set_gain(Bus::BackingTrack, 0.25);
        assert_eq!(vec![0.75], mixer.process_frames(1));

        assert!(mixer.toggle_mute(Bus::BackingTrack));
        assert_eq!(vec![0.5], mixer.process_frames(1));
        assert_eq!(0.25, mixer.gain(Bus::BackingTrack));

        assert!(!mixer.toggle_mute(Bus::BackingTrack));
        assert_eq!(vec![0.75], mixer.process_frames(1));
    }

    #[test]
    fn test_gain_clamped() {
        let mixer = Mixer::new(2, 1000);
        mixer.set_gain(Bus::Samples, 1.7);
        assert_eq!(1.0, mixer.gain(Bus::Samples));
        mixer.set_gain(Bus::Samples, -0.3);
        assert_eq!(0.0, mixer.gain(Bus::Samples));
        mixer.set_gain(Bus::Samples, f32::NAN);
        assert_eq!(0.0, mixer.gain(Bus::Samples));
    }

    #[test]
    fn test_clock_advances_with_rendering() {
        let mixer = Mixer::new(2, 1000);
        assert_eq!(Duration::ZERO, mixer.now());
        mixer.process_frames(250);
        assert_eq!(Duration::from_millis(250), mixer.now());
        assert_eq!(250, mixer.current_frame());
        assert_eq!(500, mixer.duration_to_frames(Duration::from_millis(500)));
    }

    #[test]
    fn test_finished_source_removed() {
        let mixer = Mixer::new(1, 1000);
        let (source, finished_at) = TestSource::active(1, Bus::Samples, vec![1.0, 1.0]);
        mixer.add_source(source);

        mixer.process_frames(4);
        assert_eq!(0, mixer.source_count());
        assert_eq!(Some(Duration::from_millis(4)), *finished_at.lock());
    }

    #[test]
    fn test_bus_from_str() {
        assert_eq!(Ok(Bus::BackingTrack), "backingTrack".parse());
        assert_eq!(Ok(Bus::Samples), "samples".parse());
        assert!("drums".parse::<Bus>().is_err());
    }
}
