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
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::duration::parse_duration;
use super::error::ConfigError;
use crate::transport::Timing;

const DEFAULT_BEATS_PER_MEASURE: u32 = 4;
const DEFAULT_COUNT_IN_BEATS: u32 = 4;
const DEFAULT_PRE_ROLL: Duration = Duration::ZERO;
const DEFAULT_VISUAL_LEAD: Duration = Duration::from_millis(100);

/// A YAML representation of the chord progression and its timing.
#[derive(Deserialize, Clone, Debug)]
pub struct Progression {
    /// One chord label per measure.
    chords: Vec<String>,

    /// Beats in each measure (default: 4).
    beats_per_measure: Option<u32>,

    /// Tempo in beats per minute.
    bpm: f64,

    /// Lead-in beats before the first measure (default: 4).
    count_in_beats: Option<u32>,

    /// Silence before the count-in, e.g. "500ms" (default: none).
    pre_roll: Option<String>,

    /// Forward bias applied to position queries, e.g. "100ms" (default: 100ms).
    visual_lead: Option<String>,

    /// Number of loops after which the piece ends. Loops forever when unset.
    max_loops: Option<u64>,
}

impl Progression {
    /// Creates a new progression configuration with default timing.
    pub fn new(chords: Vec<String>, bpm: f64) -> Progression {
        Progression {
            chords,
            beats_per_measure: None,
            bpm,
            count_in_beats: None,
            pre_roll: None,
            visual_lead: None,
            max_loops: None,
        }
    }

    /// Builds the progression model.
    pub fn progression(&self) -> Result<Arc<crate::progression::Progression>, ConfigError> {
        Ok(Arc::new(crate::progression::Progression::new(
            self.chords.clone(),
            self.beats_per_measure.unwrap_or(DEFAULT_BEATS_PER_MEASURE),
        )?))
    }

    /// Builds the transport timing.
    pub fn timing(&self) -> Result<Timing, ConfigError> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "bpm must be a positive number, got {}",
                self.bpm
            )));
        }
        if self.max_loops == Some(0) {
            return Err(ConfigError::Invalid(
                "max_loops must be greater than zero".to_string(),
            ));
        }

        Ok(Timing {
            bpm: self.bpm,
            count_in_beats: self.count_in_beats.unwrap_or(DEFAULT_COUNT_IN_BEATS),
            pre_roll: parse_duration(&self.pre_roll, DEFAULT_PRE_ROLL)?,
            visual_lead: parse_duration(&self.visual_lead, DEFAULT_VISUAL_LEAD)?,
            max_loops: self.max_loops,
        })
    }
}
