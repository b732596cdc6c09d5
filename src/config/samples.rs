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
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::duration::parse_duration;
use super::error::ConfigError;

/// Default fade-out applied when a note is released.
pub const DEFAULT_FADE: Duration = Duration::from_millis(120);

/// A single pitched sample file.
#[derive(Deserialize, Clone, Debug)]
pub struct SampleFile {
    /// The MIDI note number this file plays.
    note: u8,

    /// The audio file, relative to the samples path.
    file: String,
}

impl SampleFile {
    /// Creates a new sample file entry.
    pub fn new(note: u8, file: &str) -> SampleFile {
        SampleFile {
            note,
            file: file.to_string(),
        }
    }
}

/// A YAML representation of the sampled instrument.
#[derive(Deserialize, Clone, Debug)]
pub struct Samples {
    /// Directory holding the sample files. Relative paths resolve against the config file.
    path: String,

    /// Release fade duration, e.g. "120ms" (default: 120ms).
    fade: Option<String>,

    /// The files that make up the required sample set.
    files: Vec<SampleFile>,
}

impl Samples {
    /// Creates a new samples configuration.
    pub fn new(path: &str, files: Vec<SampleFile>) -> Samples {
        Samples {
            path: path.to_string(),
            fade: None,
            files,
        }
    }

    /// Returns the release fade duration.
    pub fn fade(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.fade, DEFAULT_FADE)
    }

    /// Returns the note to file mapping, resolved against the given base directory.
    pub fn files(&self, base_path: &Path) -> Result<HashMap<u8, PathBuf>, ConfigError> {
        let dir = base_path.join(&self.path);
        let mut files = HashMap::with_capacity(self.files.len());
        for entry in &self.files {
            if files.insert(entry.note, dir.join(&entry.file)).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "note {} is mapped to more than one sample",
                    entry.note
                )));
            }
        }
        Ok(files)
    }

    /// Returns the notes of the required sample set, in ascending order.
    pub fn notes(&self) -> Vec<u8> {
        let mut notes: Vec<u8> = self.files.iter().map(|f| f.note).collect();
        notes.sort_unstable();
        notes.dedup();
        notes
    }
}
