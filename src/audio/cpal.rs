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
use std::{error::Error, fmt, sync::Arc, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::{Device as AudioDevice, Mixer, OutputState, SharedOutputState};
use crate::config;

/// Describes an output device found while listing.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// The name of the device.
    pub name: String,
    /// The maximum number of output channels.
    pub max_channels: u16,
    /// The name of the host the device belongs to.
    pub host: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Commands sent to the output thread. Each carries a reply channel.
enum Command {
    Activate(crossbeam_channel::Sender<Result<(), String>>),
    Suspend(crossbeam_channel::Sender<Result<(), String>>),
}

/// A cpal output. The stream is created and owned by a dedicated thread, since cpal
/// streams cannot move between threads on every platform.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The mixer rendered by the stream callback.
    mixer: Arc<Mixer>,
    /// The output state, updated by the output thread.
    state: Arc<SharedOutputState>,
    /// Sends commands to the output thread.
    commands: crossbeam_channel::Sender<Command>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.mixer.num_channels(),
            self.host_id.name()
        )
    }
}

/// Fills an integer output buffer from the mixer through a reusable scratch buffer.
fn create_converting_callback<T>(
    mixer: Arc<Mixer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0);
        mixer.process_into(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Builds the output stream in the device's native sample format.
fn build_stream(
    device: &cpal::Device,
    mixer: Arc<Mixer>,
    buffer_size: Option<u32>,
) -> Result<cpal::Stream, Box<dyn Error>> {
    let sample_format = device.default_output_config()?.sample_format();
    let config = cpal::StreamConfig {
        channels: mixer.num_channels(),
        sample_rate: cpal::SampleRate(mixer.sample_rate()),
        buffer_size: match buffer_size {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    };
    debug!(?sample_format, ?config, "Building output stream");

    let on_error = |err: cpal::StreamError| error!("CPAL output stream error: {}", err);
    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.process_into(data),
            on_error,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            create_converting_callback::<i16>(mixer),
            on_error,
            None,
        )?,
        cpal::SampleFormat::I32 => device.build_output_stream(
            &config,
            create_converting_callback::<i32>(mixer),
            on_error,
            None,
        )?,
        other => return Err(format!("unsupported sample format {:?}", other).into()),
    };
    Ok(stream)
}

/// Runs the output thread. The stream is built on first activation and paused on suspend.
fn run_output_thread(
    device: cpal::Device,
    mixer: Arc<Mixer>,
    state: Arc<SharedOutputState>,
    buffer_size: Option<u32>,
    commands: crossbeam_channel::Receiver<Command>,
) {
    let span = span!(Level::INFO, "cpal output");
    let _enter = span.enter();

    let mut stream: Option<cpal::Stream> = None;
    for command in commands.iter() {
        match command {
            Command::Activate(reply) => {
                let result = match stream.as_ref() {
                    Some(stream) => stream.play().map_err(|e| e.to_string()),
                    None => build_stream(&device, mixer.clone(), buffer_size)
                        .map_err(|e| e.to_string())
                        .and_then(|built| {
                            built.play().map_err(|e| e.to_string())?;
                            stream = Some(built);
                            Ok(())
                        }),
                };
                match &result {
                    Ok(()) => {
                        info!("CPAL output stream started");
                        state.set(OutputState::Running);
                    }
                    Err(e) => {
                        error!(err = e.as_str(), "Failed to start CPAL stream");
                        state.set(OutputState::Failed);
                    }
                }
                let _ = reply.send(result);
            }
            Command::Suspend(reply) => {
                let result = match stream.as_ref() {
                    Some(stream) => stream.pause().map_err(|e| e.to_string()),
                    None => Ok(()),
                };
                if result.is_ok() {
                    state.set(OutputState::Suspended);
                }
                let _ = reply.send(result);
            }
        }
    }
    debug!("Output thread exiting");
}

/// Finds a cpal device by name. "default" selects the default host's default output.
fn find_device(name: &str) -> Result<(cpal::HostId, cpal::Device, u16), Box<dyn Error>> {
    if name == "default" {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no default output device")?;
        let max_channels = max_output_channels(&device);
        return Ok((host.id(), device, max_channels));
    }

    for host_id in cpal::available_hosts() {
        let devices = match cpal::host_from_id(host_id)?.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };
        for device in devices {
            if device.name().map(|n| n.trim() == name).unwrap_or(false) {
                let max_channels = max_output_channels(&device);
                return Ok((host_id, device, max_channels));
            }
        }
    }

    Err(format!("no device found with name {}", name).into())
}

fn max_output_channels(device: &cpal::Device) -> u16 {
    match device.supported_output_configs() {
        Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
        Err(_) => 0,
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<DeviceInfo>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let max_channels = max_output_channels(&device);
                if max_channels > 0 {
                    devices.push(DeviceInfo {
                        name: device.name()?,
                        max_channels,
                        host: host_id.name().to_string(),
                    });
                }
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Gets the given cpal device and starts its output thread. The output stays
    /// suspended until activated.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let (host_id, device, max_channels) = {
            let _shh_stderr = shh::stderr()?;
            find_device(config.device())?
        };
        let name = device.name()?;

        let channels = if max_channels > 0 {
            config.channels().min(max_channels)
        } else {
            config.channels()
        };
        let mixer = Arc::new(Mixer::new(channels, config.sample_rate()));
        let state = Arc::new(SharedOutputState::default());
        let (commands, receiver) = crossbeam_channel::unbounded();

        {
            let mixer = mixer.clone();
            let state = state.clone();
            let buffer_size = config.buffer_size();
            thread::Builder::new()
                .name("jamtrack-output".to_string())
                .spawn(move || run_output_thread(device, mixer, state, buffer_size, receiver))?;
        }

        info!(
            device = name,
            channels,
            sample_rate = config.sample_rate(),
            "Opened output device"
        );

        Ok(Device {
            name,
            host_id,
            mixer,
            state,
            commands,
        })
    }

    fn send(
        &self,
        command: impl FnOnce(crossbeam_channel::Sender<Result<(), String>>) -> Command,
    ) -> Result<(), Box<dyn Error>> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(command(reply_tx))
            .map_err(|_| "output thread has exited")?;
        reply_rx.recv()?.map_err(|e| e.into())
    }
}

impl AudioDevice for Device {
    fn mixer(&self) -> Arc<Mixer> {
        self.mixer.clone()
    }

    fn activate(&self) -> Result<(), Box<dyn Error>> {
        self.send(Command::Activate)
    }

    fn suspend(&self) -> Result<(), Box<dyn Error>> {
        self.send(Command::Suspend)
    }

    fn state(&self) -> OutputState {
        self.state.get()
    }
}
