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

//! The musical clock.
//!
//! The transport never schedules anything. It records clock readings at start, pause
//! and resume, and every position query re-derives the musical position from the
//! current clock reading. There is nothing to drift.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::progression::Progression;

/// Errors returned by transport transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not ready: the backing track or its clock is unavailable")]
    NotReady,

    #[error("transport has not been started")]
    NotStarted,

    #[error("transport is not paused")]
    NotPaused,
}

/// Fixed timing parameters for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Tempo in beats per minute.
    pub bpm: f64,
    /// Lead-in beats before the first measure.
    pub count_in_beats: u32,
    /// Silence before the count-in starts.
    pub pre_roll: Duration,
    /// Forward bias added to every reading so visuals land with the audio.
    pub visual_lead: Duration,
    /// After this many complete loops the piece is over. None loops forever.
    pub max_loops: Option<u64>,
}

impl Timing {
    /// Seconds per beat.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Length of the count-in in seconds.
    pub fn count_in_duration(&self) -> f64 {
        self.count_in_beats as f64 * self.beat_duration()
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            bpm: 120.0,
            count_in_beats: 4,
            pre_roll: Duration::ZERO,
            visual_lead: Duration::from_millis(100),
            max_loops: None,
        }
    }
}

/// The coarse phase of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Idle or still inside the pre-roll silence.
    Waiting,
    /// Inside the count-in beats.
    CountIn,
    /// Inside the chord progression.
    Playing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Waiting => write!(f, "waiting"),
            Phase::CountIn => write!(f, "count-in"),
            Phase::Playing => write!(f, "playing"),
        }
    }
}

/// Public view of the transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Running,
    Paused,
}

/// Musical position at the moment of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub phase: Phase,
    /// 1-based beat inside the measure. During the count-in, the count-in beat.
    pub beat_number_in_measure: Option<u32>,
    /// 1-based measure inside the progression.
    pub measure_number_in_progression: Option<u32>,
    pub current_chord: Option<String>,
    pub next_chord: Option<String>,
    pub beats_until_next_chord: Option<u32>,
    pub loops_completed: u64,
    /// Fractional position inside the current beat, from 0 up to 1.
    pub beat_progress: f64,
    /// True once the configured number of loops has completed.
    pub finished: bool,
}

impl Position {
    fn waiting(progression: &Progression) -> Position {
        Position {
            phase: Phase::Waiting,
            beat_number_in_measure: None,
            measure_number_in_progression: None,
            current_chord: None,
            next_chord: Some(progression.first_chord().to_string()),
            beats_until_next_chord: None,
            loops_completed: 0,
            beat_progress: 0.0,
            finished: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Running { start: Duration },
    Paused { start: Duration, paused_at: Duration },
}

/// Converts clock readings into musical positions.
pub struct Transport {
    progression: Arc<Progression>,
    timing: Timing,
    clock: Arc<dyn Clock>,
    state: State,
}

impl Transport {
    /// Creates a new idle transport reading time from the given clock.
    pub fn new(progression: Arc<Progression>, timing: Timing, clock: Arc<dyn Clock>) -> Transport {
        Transport {
            progression,
            timing,
            clock,
            state: State::Idle,
        }
    }

    /// The progression this transport walks through.
    pub fn progression(&self) -> &Arc<Progression> {
        &self.progression
    }

    /// The timing parameters.
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Returns the current transport state.
    pub fn state(&self) -> TransportState {
        match self.state {
            State::Idle => TransportState::Idle,
            State::Running { .. } => TransportState::Running,
            State::Paused { .. } => TransportState::Paused,
        }
    }

    /// Starts the transport from the beginning, using the current clock reading as zero.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if !self.clock.is_available() {
            return Err(TransportError::NotReady);
        }

        let start = self.clock.now();
        self.state = State::Running { start };
        info!(start = ?start, "Transport started");
        Ok(())
    }

    /// Pauses the transport. Does nothing unless running.
    pub fn pause(&mut self) {
        match self.state {
            State::Running { start } => {
                let paused_at = self.clock.now().max(start);
                self.state = State::Paused { start, paused_at };
                info!(paused_at = ?paused_at, "Transport paused");
            }
            _ => debug!("Pause requested while not running"),
        }
    }

    /// Resumes from the paused position. The paused time is excluded from musical time.
    pub fn resume(&mut self) -> Result<(), TransportError> {
        match self.state {
            State::Idle => Err(TransportError::NotStarted),
            State::Running { .. } => Err(TransportError::NotPaused),
            State::Paused { start, paused_at } => {
                let paused_for = self.clock.now().saturating_sub(paused_at);
                self.state = State::Running {
                    start: start + paused_for,
                };
                info!(paused_for = ?paused_for, "Transport resumed");
                Ok(())
            }
        }
    }

    /// Stops the transport and forgets the reference instants.
    pub fn stop(&mut self) {
        self.state = State::Idle;
        info!("Transport stopped");
    }

    /// Computes the musical position for the current clock reading.
    pub fn position(&self) -> Position {
        let elapsed = match self.state {
            State::Idle => return Position::waiting(&self.progression),
            State::Running { start } => self.clock.now().saturating_sub(start),
            State::Paused { start, paused_at } => paused_at.saturating_sub(start),
        };

        self.position_at(elapsed)
    }

    /// Computes the position for a given amount of elapsed transport time.
    fn position_at(&self, elapsed: Duration) -> Position {
        let beat_duration = self.timing.beat_duration();
        let pre_roll = self.timing.pre_roll.as_secs_f64();
        let elapsed_total = (elapsed + self.timing.visual_lead).as_secs_f64();
        let from_progression_start = elapsed_total - pre_roll - self.timing.count_in_duration();

        if from_progression_start < 0.0 {
            if elapsed_total < pre_roll {
                return Position::waiting(&self.progression);
            }

            let count_in_beats = (elapsed_total - pre_roll) / beat_duration;
            let remaining = self.timing.count_in_beats as f64 - count_in_beats;
            let beat = (count_in_beats.floor() as u32 + 1).min(self.timing.count_in_beats);
            return Position {
                phase: Phase::CountIn,
                beat_number_in_measure: Some(beat),
                measure_number_in_progression: None,
                current_chord: None,
                next_chord: Some(self.progression.first_chord().to_string()),
                beats_until_next_chord: Some(remaining.ceil() as u32),
                loops_completed: 0,
                beat_progress: count_in_beats.fract(),
                finished: false,
            };
        }

        let beats = from_progression_start / beat_duration;
        let elapsed_beats = beats.floor() as u64;
        let info = self.progression.chord_info(elapsed_beats);
        let loops_completed = self.progression.loops_completed(elapsed_beats);
        let finished = self
            .timing
            .max_loops
            .is_some_and(|max_loops| loops_completed >= max_loops);

        let current_chord = if finished {
            self.progression.first_chord()
        } else {
            info.current_chord
        };

        Position {
            phase: Phase::Playing,
            beat_number_in_measure: Some(self.progression.beat_number_in_measure(elapsed_beats)),
            measure_number_in_progression: Some(
                self.progression.measure_index(elapsed_beats) as u32 + 1,
            ),
            current_chord: Some(current_chord.to_string()),
            next_chord: info.next_chord.map(str::to_string),
            beats_until_next_chord: info.beats_until_next_chord,
            loops_completed,
            beat_progress: beats - elapsed_beats as f64,
            finished,
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("timing", &self.timing)
            .field("measures", &self.progression.measures())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn twelve_bar() -> Arc<Progression> {
        Arc::new(
            Progression::new(
                ["C", "C", "C", "C", "F", "F", "C", "C", "G", "F", "C", "G"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                4,
            )
            .unwrap(),
        )
    }

    /// 120 BPM (half a second per beat), 1 second of pre-roll, 4 count-in beats, no lead.
    fn timing() -> Timing {
        Timing {
            bpm: 120.0,
            count_in_beats: 4,
            pre_roll: Duration::from_secs(1),
            visual_lead: Duration::ZERO,
            max_loops: Some(2),
        }
    }

    fn transport(timing: Timing) -> (Transport, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        // Start the clock somewhere other than zero.
        clock.advance(Duration::from_secs(7));
        (Transport::new(twelve_bar(), timing, clock.clone()), clock)
    }

    #[test]
    fn test_idle_position() {
        let (transport, _) = transport(timing());
        let position = transport.position();
        assert_eq!(TransportState::Idle, transport.state());
        assert_eq!(Phase::Waiting, position.phase);
        assert_eq!(None, position.current_chord);
        assert_eq!(Some("C".to_string()), position.next_chord);
    }

    #[test]
    fn test_start_not_ready() {
        let (mut transport, clock) = transport(timing());
        clock.set_available(false);
        assert_eq!(Err(TransportError::NotReady), transport.start());
        assert_eq!(TransportState::Idle, transport.state());

        clock.set_available(true);
        assert_eq!(Ok(()), transport.start());
        assert_eq!(TransportState::Running, transport.state());
    }

    #[test]
    fn test_phases() -> Result<(), TransportError> {
        let (mut transport, clock) = transport(timing());
        transport.start()?;

        // Pre-roll silence.
        clock.advance(Duration::from_millis(500));
        assert_eq!(Phase::Waiting, transport.position().phase);

        // 1.25s: half a beat into the count-in.
        clock.advance(Duration::from_millis(750));
        let position = transport.position();
        assert_eq!(Phase::CountIn, position.phase);
        assert_eq!(Some(1), position.beat_number_in_measure);
        assert_eq!(Some(4), position.beats_until_next_chord);
        assert!((position.beat_progress - 0.5).abs() < 1e-9);
        assert_eq!(Some("C".to_string()), position.next_chord);

        // 2.6s: 3.2 beats into the count-in.
        clock.advance(Duration::from_millis(1350));
        let position = transport.position();
        assert_eq!(Phase::CountIn, position.phase);
        assert_eq!(Some(4), position.beat_number_in_measure);
        assert_eq!(Some(1), position.beats_until_next_chord);

        // 3s: first beat of the progression.
        clock.advance(Duration::from_millis(400));
        let position = transport.position();
        assert_eq!(Phase::Playing, position.phase);
        assert_eq!(Some(1), position.beat_number_in_measure);
        assert_eq!(Some(1), position.measure_number_in_progression);
        assert_eq!(Some("C".to_string()), position.current_chord);
        assert_eq!(Some("F".to_string()), position.next_chord);
        assert_eq!(Some(16), position.beats_until_next_chord);
        assert_eq!(0, position.loops_completed);

        // 16 beats later: the F measure.
        clock.advance(Duration::from_secs(8));
        let position = transport.position();
        assert_eq!(Some(5), position.measure_number_in_progression);
        assert_eq!(Some("F".to_string()), position.current_chord);
        assert_eq!(Some(8), position.beats_until_next_chord);
        Ok(())
    }

    #[test]
    fn test_visual_lead_shifts_position() -> Result<(), TransportError> {
        let mut timing = timing();
        timing.visual_lead = Duration::from_millis(100);
        let (mut transport, clock) = transport(timing);
        transport.start()?;

        // 0.95s of real time looks like 1.05s: inside the count-in.
        clock.advance(Duration::from_millis(950));
        assert_eq!(Phase::CountIn, transport.position().phase);
        Ok(())
    }

    #[test]
    fn test_pause_resume_excludes_paused_time() -> Result<(), TransportError> {
        let (mut interrupted, clock_a) = transport(timing());
        let (mut uninterrupted, clock_b) = transport(timing());
        interrupted.start()?;
        uninterrupted.start()?;

        let d1 = Duration::from_millis(4_321);
        let d2 = Duration::from_millis(9_876);
        let d3 = Duration::from_millis(12_345);

        clock_a.advance(d1);
        interrupted.pause();
        assert_eq!(TransportState::Paused, interrupted.state());
        let frozen = interrupted.position();
        clock_a.advance(d2);
        assert_eq!(frozen, interrupted.position());
        interrupted.resume()?;
        clock_a.advance(d3);

        clock_b.advance(d1 + d3);

        assert_eq!(uninterrupted.position(), interrupted.position());
        Ok(())
    }

    #[test]
    fn test_resume_errors() -> Result<(), TransportError> {
        let (mut transport, _) = transport(timing());
        assert_eq!(Err(TransportError::NotStarted), transport.resume());

        transport.start()?;
        assert_eq!(Err(TransportError::NotPaused), transport.resume());
        Ok(())
    }

    #[test]
    fn test_pause_when_idle_is_noop() {
        let (mut transport, _) = transport(timing());
        transport.pause();
        assert_eq!(TransportState::Idle, transport.state());
    }

    #[test]
    fn test_stop_from_any_state() -> Result<(), TransportError> {
        let (mut transport, clock) = transport(timing());
        transport.stop();
        assert_eq!(TransportState::Idle, transport.state());

        transport.start()?;
        clock.advance(Duration::from_secs(5));
        transport.pause();
        transport.stop();
        assert_eq!(TransportState::Idle, transport.state());
        assert_eq!(Phase::Waiting, transport.position().phase);
        assert_eq!(Err(TransportError::NotStarted), transport.resume());
        Ok(())
    }

    #[test]
    fn test_max_loops_forces_first_chord() -> Result<(), TransportError> {
        let (mut transport, clock) = transport(timing());
        transport.start()?;

        // Pre-roll + count-in + two full loops + the last measure of loop three.
        clock.advance(Duration::from_secs(3));
        clock.advance(Duration::from_secs(48));
        clock.advance(Duration::from_secs(22));
        let position = transport.position();
        assert_eq!(2, position.loops_completed);
        assert!(position.finished);
        assert_eq!(Some("C".to_string()), position.current_chord);
        assert_eq!(Some(12), position.measure_number_in_progression);
        Ok(())
    }

    #[test]
    fn test_monotonic_while_running() -> Result<(), TransportError> {
        let (mut transport, clock) = transport(Timing {
            max_loops: None,
            ..timing()
        });
        transport.start()?;

        let mut last = 0.0;
        for _ in 0..500 {
            clock.advance(Duration::from_millis(37));
            let position = transport.position();
            if position.phase == Phase::Playing {
                let total = position.loops_completed as f64 * 48.0
                    + (position.measure_number_in_progression.unwrap() - 1) as f64 * 4.0
                    + (position.beat_number_in_measure.unwrap() - 1) as f64
                    + position.beat_progress;
                assert!(total >= last);
                last = total;
            }
        }
        assert!(last > 0.0);
        Ok(())
    }
}
