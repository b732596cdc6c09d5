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
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Level};

use crate::preferences::Difficulty;
use crate::session::Session;
use crate::status;

pub mod keyboard;

/// Controller events that will trigger behavior in the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Starts the piece from the top.
    Start,

    /// Pauses the piece. Sounding notes are released.
    Pause,

    /// Resumes a paused piece.
    Resume,

    /// Stops the piece.
    Stop,

    /// Starts a note for the given input identity.
    NoteOn { voice_id: String, pitch: u8 },

    /// Releases the note held by the given input identity.
    NoteOff { voice_id: String, pitch: u8 },

    /// Sets a bus volume.
    Volume { bus: String, value: f32 },

    /// Toggles a bus mute.
    Mute { bus: String },

    /// Prints the current position.
    Status,

    /// Ends the session.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives a session from a controller driver.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(
        session: Arc<Session>,
        driver: Arc<dyn Driver>,
        difficulty: Difficulty,
    ) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(async move {
                Controller::trigger_events(session, driver, difficulty).await
            }),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Applies a single event to the session.
    fn handle_event(
        session: &Session,
        event: Event,
        difficulty: Difficulty,
    ) -> Result<(), Box<dyn Error>> {
        match event {
            Event::Start => session.start()?,
            Event::Pause => session.pause(),
            Event::Resume => session.resume()?,
            Event::Stop => session.stop(),
            Event::NoteOn { voice_id, pitch } => {
                if !session.play_note(&voice_id, pitch) {
                    return Err(format!("unable to play note {} for {}", pitch, voice_id).into());
                }
            }
            Event::NoteOff { voice_id, pitch } => {
                session.stop_note(&voice_id, pitch);
            }
            Event::Volume { bus, value } => {
                if !session.set_volume(&bus, value) {
                    return Err(format!("unknown bus {}", bus).into());
                }
            }
            Event::Mute { bus } => {
                if session.toggle_mute(&bus).is_none() {
                    return Err(format!("unknown bus {}", bus).into());
                }
            }
            Event::Status => {
                println!("{}", status::render(&session.position(), difficulty));
            }
            Event::Quit => {}
        }
        Ok(())
    }

    /// Triggers session events by watching the driver and getting events from it.
    async fn trigger_events(
        session: Arc<Session>,
        driver: Arc<dyn Driver>,
        difficulty: Difficulty,
    ) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        {
            let span = span!(Level::INFO, "controller");
            let _enter = span.enter();
            info!(difficulty = %difficulty, "Controller started.");
        }

        while let Some(event) = events_rx.recv().await {
            info!(event = format!("{:?}", event), "Received event.");
            if event == Event::Quit {
                break;
            }

            if let Err(e) = Controller::handle_event(&session, event, difficulty) {
                error!("Error talking to session: {}", e);
            }
        }

        info!("Controller closing.");
        session.stop();
        // Dropping the receiver lets a blocked driver notice that we are gone.
        drop(events_rx);
        if let Err(e) = join_handle.await {
            error!("Error waiting for event monitor to stop: {}", e);
        }
    }
}
