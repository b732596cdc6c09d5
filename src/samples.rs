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

//! Keyboard-triggered sample playback.
//!
//! This module provides:
//! - Sample loading and caching (decoded in memory, one decode per note)
//! - Voice management keyed by the input that triggered the note
//! - Exponential fade-outs rendered by the audio mixer
//! - Note lifecycle events for visual highlighting

mod engine;
mod events;
mod loader;
mod voice;

pub use engine::VoiceEngine;
pub use events::{NoteEvent, NoteEventKind};
pub use loader::{Fetch, Fetched, FileFetcher, LoadError, LoadedSample, Progress, SampleCache};
