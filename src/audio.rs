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
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config;

pub mod cpal;
pub mod decode;
pub mod mixer;
pub mod mock;

pub use mixer::{Bus, Mixer, Source};

/// Global atomic counter for generating unique source IDs.
static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a new unique mixer source ID.
pub fn next_source_id() -> u64 {
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Whether the output is producing audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Not yet activated, or suspended. The output clock does not advance.
    Suspended,
    /// Actively rendering audio.
    Running,
    /// Activation failed.
    Failed,
}

impl OutputState {
    fn from_u8(value: u8) -> OutputState {
        match value {
            1 => OutputState::Running,
            2 => OutputState::Failed,
            _ => OutputState::Suspended,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OutputState::Suspended => 0,
            OutputState::Running => 1,
            OutputState::Failed => 2,
        }
    }
}

/// Atomic holder for the output state, shared with output threads.
#[derive(Debug, Default)]
pub(crate) struct SharedOutputState(AtomicU8);

impl SharedOutputState {
    pub(crate) fn get(&self) -> OutputState {
        OutputState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: OutputState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// An audio output. Owns the mixer whose rendered frame count is the session clock.
pub trait Device: fmt::Display + Send + Sync {
    /// The mixer feeding this output.
    fn mixer(&self) -> Arc<Mixer>;

    /// Brings the output into the running state. Platforms that gate audio on a user
    /// gesture call this from the first gesture.
    fn activate(&self) -> Result<(), Box<dyn Error>>;

    /// Suspends the output. The output clock stops advancing.
    fn suspend(&self) -> Result<(), Box<dyn Error>>;

    /// The current output state.
    fn state(&self) -> OutputState;

    /// Returns true if the output is actively rendering.
    fn is_running(&self) -> bool {
        self.state() == OutputState::Running
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device for the given configuration. Device names starting with "mock" select
/// the mock device.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(
            device,
            config.sample_rate(),
            config.channels(),
        )));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_mock_device() -> Result<(), Box<dyn Error>> {
        let device = get_device(&config::Audio::new("mock-output"))?;
        assert_eq!(OutputState::Suspended, device.state());
        assert!(!device.is_running());
        assert_eq!(44100, device.mixer().sample_rate());

        device.activate()?;
        assert!(device.is_running());
        Ok(())
    }

    #[test]
    fn test_source_ids_unique() {
        let a = next_source_id();
        let b = next_source_id();
        assert_ne!(a, b);
    }
}
