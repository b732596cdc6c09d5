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

//! The fixed musical structure of a practice piece.
//!
//! A progression is one chord label per measure with a uniform number of beats per
//! measure. Every query is a pure function of an elapsed beat count, counted from the
//! first beat of the first measure, and the progression loops forever.

use std::fmt;

use crate::config::error::ConfigError;

/// The chord at a given beat and the next chord change after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordInfo<'a> {
    /// The chord sounding at the queried beat.
    pub current_chord: &'a str,
    /// The next chord that differs from the current one. None if the progression never changes.
    pub next_chord: Option<&'a str>,
    /// Beats from the queried beat until the next chord starts. None if there is no change.
    pub beats_until_next_chord: Option<u32>,
}

/// A looping sequence of chords, one per measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progression {
    chords: Vec<String>,
    beats_per_measure: u32,
}

impl Progression {
    /// Creates a new progression. There must be at least one chord and one beat per measure.
    pub fn new(chords: Vec<String>, beats_per_measure: u32) -> Result<Progression, ConfigError> {
        if chords.is_empty() {
            return Err(ConfigError::Invalid(
                "a progression needs at least one chord".to_string(),
            ));
        }
        if beats_per_measure == 0 {
            return Err(ConfigError::Invalid(
                "beats per measure must be greater than zero".to_string(),
            ));
        }

        Ok(Progression {
            chords,
            beats_per_measure,
        })
    }

    /// The number of measures in one pass of the progression.
    pub fn measures(&self) -> usize {
        self.chords.len()
    }

    /// The number of beats in each measure.
    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    /// The number of beats in one pass of the progression.
    pub fn total_beats(&self) -> u64 {
        self.chords.len() as u64 * self.beats_per_measure as u64
    }

    /// The chord of the first measure.
    pub fn first_chord(&self) -> &str {
        &self.chords[0]
    }

    /// All chord labels, in measure order.
    pub fn chords(&self) -> &[String] {
        &self.chords
    }

    /// The 1-based beat number inside the current measure.
    pub fn beat_number_in_measure(&self, elapsed_beats: u64) -> u32 {
        (elapsed_beats % self.beats_per_measure as u64) as u32 + 1
    }

    /// The 0-based measure index, wrapping at the end of the progression.
    pub fn measure_index(&self, elapsed_beats: u64) -> usize {
        ((elapsed_beats / self.beats_per_measure as u64) % self.chords.len() as u64) as usize
    }

    /// The number of complete passes through the progression.
    pub fn loops_completed(&self, elapsed_beats: u64) -> u64 {
        elapsed_beats / self.total_beats()
    }

    /// Returns the current chord, the next differing chord and the beats until it starts.
    ///
    /// The forward scan is capped at one full pass, so a progression made of a single
    /// repeated chord reports no next chord instead of scanning forever.
    pub fn chord_info(&self, elapsed_beats: u64) -> ChordInfo<'_> {
        let measures = self.chords.len();
        let measure = self.measure_index(elapsed_beats);
        let current_chord = self.chords[measure].as_str();

        // Beats left in the current measure, including the queried one.
        let mut beats_until =
            self.beats_per_measure - (self.beat_number_in_measure(elapsed_beats) - 1);

        for offset in 1..measures {
            let candidate = self.chords[(measure + offset) % measures].as_str();
            if candidate != current_chord {
                return ChordInfo {
                    current_chord,
                    next_chord: Some(candidate),
                    beats_until_next_chord: Some(beats_until),
                };
            }
            beats_until += self.beats_per_measure;
        }

        ChordInfo {
            current_chord,
            next_chord: None,
            beats_until_next_chord: None,
        }
    }
}

impl fmt::Display for Progression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.chords.chunks(4).enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "|")?;
            for chord in line {
                write!(f, " {:<6}|", chord)?;
            }
        }
        Ok(())
    }
}
