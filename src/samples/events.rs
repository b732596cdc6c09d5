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
use std::fmt;
use std::time::Duration;

/// The two note lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEventKind {
    Started,
    Ended,
}

/// A voice started or ended. The timestamp is the output clock reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: NoteEventKind,
    pub voice_id: String,
    pub pitch: u8,
    pub timestamp: Duration,
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            NoteEventKind::Started => "started",
            NoteEventKind::Ended => "ended",
        };
        write!(
            f,
            "{} {} (pitch {}) at {:.3}s",
            self.voice_id,
            kind,
            self.pitch,
            self.timestamp.as_secs_f64()
        )
    }
}
