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
use std::{error::Error, fmt, sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::audio::{Mixer, OutputState, SharedOutputState};

/// A mock device. Renders the mixer only when advanced by hand, which makes the output
/// clock fully deterministic.
#[derive(Clone)]
pub struct Device {
    name: String,
    mixer: Arc<Mixer>,
    state: Arc<SharedOutputState>,
}

impl Device {
    /// Gets the given mock device. Names containing "fail" refuse to activate.
    pub fn get(name: &str, sample_rate: u32, channels: u16) -> Device {
        Device {
            name: name.to_string(),
            mixer: Arc::new(Mixer::new(channels, sample_rate)),
            state: Arc::new(SharedOutputState::default()),
        }
    }

    /// Renders the given duration of audio, as the hardware would. Does nothing unless
    /// the output is running. Returns the rendered frames.
    pub fn advance(&self, duration: Duration) -> Vec<f32> {
        if self.state.get() != OutputState::Running {
            debug!(device = self.name, "Mock output not running, not rendering");
            return Vec::new();
        }
        let frames = self.mixer.duration_to_frames(duration);
        self.mixer.process_frames(frames as usize)
    }
}

impl crate::audio::Device for Device {
    fn mixer(&self) -> Arc<Mixer> {
        self.mixer.clone()
    }

    fn activate(&self) -> Result<(), Box<dyn Error>> {
        if self.name.contains("fail") {
            self.state.set(OutputState::Failed);
            return Err(format!("mock device {} refused to start", self.name).into());
        }
        info!(device = self.name, "Mock output running");
        self.state.set(OutputState::Running);
        Ok(())
    }

    fn suspend(&self) -> Result<(), Box<dyn Error>> {
        self.state.set(OutputState::Suspended);
        Ok(())
    }

    fn state(&self) -> OutputState {
        self.state.get()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}
