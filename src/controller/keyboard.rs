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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const START: &str = "start";
const PAUSE: &str = "pause";
const RESUME: &str = "resume";
const STOP: &str = "stop";
const ON: &str = "on";
const OFF: &str = "off";
const VOLUME: &str = "volume";
const MUTE: &str = "mute";
const STATUS: &str = "status";
const QUIT: &str = "quit";

/// A controller that drives a session from lines typed on the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Parses a command line into an event.
    fn parse(input: &str) -> Option<Event> {
        let mut words = input.split_whitespace();
        let command = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        match (command.as_str(), args.as_slice()) {
            (START, []) => Some(Event::Start),
            (PAUSE, []) => Some(Event::Pause),
            (RESUME, []) => Some(Event::Resume),
            (STOP, []) => Some(Event::Stop),
            (STATUS, []) => Some(Event::Status),
            (QUIT, []) => Some(Event::Quit),
            (ON, [voice_id, pitch]) => pitch.parse().ok().map(|pitch| Event::NoteOn {
                voice_id: voice_id.to_string(),
                pitch,
            }),
            (OFF, [voice_id, pitch]) => pitch.parse().ok().map(|pitch| Event::NoteOff {
                voice_id: voice_id.to_string(),
                pitch,
            }),
            (VOLUME, [bus, value]) => value.parse().ok().map(|value| Event::Volume {
                bus: bus.to_string(),
                value,
            }),
            (MUTE, [bus]) => Some(Event::Mute {
                bus: bus.to_string(),
            }),
            _ => None,
        }
    }

    /// Reads and dispatches one command. Returns false once input is exhausted or on quit.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {} <key> <note>, {} <key> <note>, {} <bus> <0-1>, {} <bus>, {}, {}): ",
            START, PAUSE, RESUME, STOP, ON, OFF, VOLUME, MUTE, STATUS, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            info!("Keyboard input closed.");
            events_tx
                .blocking_send(Event::Quit)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            return Ok(false);
        }

        match Self::parse(&input) {
            Some(event) => {
                let quit = event == Event::Quit;
                events_tx
                    .blocking_send(event)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                if quit {
                    return Ok(false);
                }
            }
            None if input.trim().is_empty() => {}
            None => warn!(input = input.trim(), "Unrecognized input"),
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}
