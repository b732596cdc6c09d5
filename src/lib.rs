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

//! A chord progression trainer. A backing track drives a looping chord chart while
//! keyboard-triggered sampled notes play along.

pub mod audio;
pub mod backing;
pub mod clock;
pub mod config;
pub mod controller;
pub mod preferences;
pub mod progression;
pub mod samples;
pub mod session;
pub mod status;
pub mod transport;
#[cfg(test)]
mod test;
