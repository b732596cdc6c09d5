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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use super::progression::Progression;
use super::samples::Samples;

/// The configuration for a practice session.
#[derive(Deserialize, Clone, Debug)]
pub struct Session {
    /// The audio output configuration.
    audio: Audio,

    /// The chord progression and its timing.
    progression: Progression,

    /// The backing track audio file.
    backing_track: String,

    /// The sampled instrument.
    samples: Samples,

    /// Where listener preferences are stored.
    preferences: Option<String>,

    /// Directory that relative paths resolve against. Set from the config file location.
    #[serde(skip)]
    base_path: PathBuf,
}

impl Session {
    /// Creates a new session configuration.
    pub fn new(
        audio: Audio,
        progression: Progression,
        backing_track: &str,
        samples: Samples,
        base_path: &Path,
    ) -> Session {
        Session {
            audio,
            progression,
            backing_track: backing_track.to_string(),
            samples,
            preferences: None,
            base_path: base_path.to_path_buf(),
        }
    }

    /// Parse a session from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Session, ConfigError> {
        let mut session = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Session>()?;
        session.base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        // Surface timing and progression problems at load time.
        session.progression.progression()?;
        session.progression.timing()?;
        session.samples.fade()?;
        session.samples.files(&session.base_path)?;

        Ok(session)
    }

    /// Returns the audio configuration.
    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Returns the progression configuration.
    pub fn progression(&self) -> &Progression {
        &self.progression
    }

    /// Returns the samples configuration.
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Returns the directory that relative paths resolve against.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the resolved backing track path.
    pub fn backing_track(&self) -> PathBuf {
        self.base_path.join(&self.backing_track)
    }

    /// Returns the resolved preferences path, if configured.
    pub fn preferences(&self) -> Option<PathBuf> {
        self.preferences.as_ref().map(|p| self.base_path.join(p))
    }
}
