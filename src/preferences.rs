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

//! User preferences: bus volumes, mute flags and the display difficulty.
//!
//! Preferences are validated key by key. Unrecognized keys and out-of-range values are
//! dropped with a warning so that stored state is never corrupted.

use std::error::Error;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yml::Value;
use tracing::{info, warn};

/// How much the status display reveals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Current and next chord plus the countdown to the change.
    #[default]
    Beginner,
    /// Adds the measure and beat.
    Intermediate,
    /// Only the beat, measure and loop count.
    Advanced,
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            _ => Err(format!("unknown difficulty: {}", s)),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "beginner"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
        }
    }
}

/// Stored preferences. Absent fields leave the current setting alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_track_volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples_volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_track_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

impl Preferences {
    /// Builds preferences from an arbitrary YAML value, keeping only valid entries.
    pub fn from_value(value: &Value) -> Preferences {
        let mut preferences = Preferences::default();
        let Value::Mapping(mapping) = value else {
            if !value.is_null() {
                warn!("Preferences are not a mapping, ignoring them");
            }
            return preferences;
        };

        for (key, value) in mapping.iter() {
            match key.as_str() {
                Some(key) => {
                    preferences.set(key, value);
                }
                None => warn!(key = ?key, "Ignoring non-string preference key"),
            }
        }
        preferences
    }

    /// Sets a single preference. Returns false, leaving everything unchanged, if the key
    /// is not recognized or the value is invalid for it.
    pub fn set(&mut self, key: &str, value: &Value) -> bool {
        let accepted = match key {
            "backingTrackVolume" => volume(value).map(|v| self.backing_track_volume = Some(v)),
            "samplesVolume" => volume(value).map(|v| self.samples_volume = Some(v)),
            "backingTrackMuted" => value.as_bool().map(|v| self.backing_track_muted = Some(v)),
            "samplesMuted" => value.as_bool().map(|v| self.samples_muted = Some(v)),
            "difficulty" => value
                .as_str()
                .and_then(|v| v.parse::<Difficulty>().ok())
                .map(|v| self.difficulty = Some(v)),
            _ => {
                warn!(key, "Ignoring unrecognized preference");
                return false;
            }
        };

        if accepted.is_none() {
            warn!(key, value = ?value, "Ignoring invalid preference value");
            return false;
        }
        true
    }

    /// Loads preferences from a YAML file. A missing file yields empty preferences.
    pub fn load(path: &Path) -> Result<Preferences, Box<dyn Error>> {
        if !path.exists() {
            info!(path = ?path, "No stored preferences");
            return Ok(Preferences::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_yml::from_str(&contents)?;
        Ok(Preferences::from_value(&value))
    }

    /// Saves the preferences to a YAML file.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let serialized = serde_yml::to_string(self)?;
        std::fs::write(path, serialized)?;
        info!(path = ?path, "Preferences saved");
        Ok(())
    }

    /// Overlays the set fields of another preferences value onto this one.
    pub fn merge(&mut self, other: &Preferences) {
        if other.backing_track_volume.is_some() {
            self.backing_track_volume = other.backing_track_volume;
        }
        if other.samples_volume.is_some() {
            self.samples_volume = other.samples_volume;
        }
        if other.backing_track_muted.is_some() {
            self.backing_track_muted = other.backing_track_muted;
        }
        if other.samples_muted.is_some() {
            self.samples_muted = other.samples_muted;
        }
        if other.difficulty.is_some() {
            self.difficulty = other.difficulty;
        }
    }
}

/// A volume must be a number in [0, 1].
fn volume(value: &Value) -> Option<f32> {
    value
        .as_f64()
        .filter(|v| (0.0..=1.0).contains(v))
        .map(|v| v as f32)
}
