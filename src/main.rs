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
use clap::{crate_version, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use jamtrack::controller::{keyboard, Controller};
use jamtrack::preferences::{Difficulty, Preferences};
use jamtrack::session::Session;
use jamtrack::{audio, config, status};

/// How often the status poller queries the transport.
const POLL_PERIOD: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A chord progression trainer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Verifies a session config and prints its chord chart.
    Progression {
        /// The path to the session config.
        config_path: String,
    },
    /// Start will start an interactive practice session.
    Start {
        /// The path to the session config.
        config_path: String,
        /// Overrides the stored difficulty (beginner, intermediate, advanced).
        #[arg(short, long)]
        difficulty: Option<Difficulty>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Progression { config_path } => {
            let config = config::Session::deserialize(&PathBuf::from(&config_path))?;
            let progression = config.progression().progression()?;
            let timing = config.progression().timing()?;

            println!(
                "{} measures of {} beats at {} BPM, {} count-in beats",
                progression.measures(),
                progression.beats_per_measure(),
                timing.bpm,
                timing.count_in_beats
            );
            if let Some(max_loops) = timing.max_loops {
                println!("Ends after {} loops", max_loops);
            }
            println!("{}", progression);
        }
        Commands::Start {
            config_path,
            difficulty,
        } => {
            let config = config::Session::deserialize(&PathBuf::from(&config_path))?;
            let mut preferences = match config.preferences() {
                Some(path) => Preferences::load(&path)?,
                None => Preferences::default(),
            };
            let difficulty = difficulty.or(preferences.difficulty).unwrap_or_default();

            let device = audio::get_device(config.audio())?;
            let session = Arc::new(Session::new(&config, device)?);

            let ready = session.become_ready();
            tokio::pin!(ready);
            let mut progress = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    result = &mut ready => {
                        result?;
                        break;
                    }
                    _ = progress.tick() => {
                        let progress = session.load_progress();
                        info!(
                            loaded = progress.loaded,
                            total = progress.total,
                            percentage = progress.percentage,
                            "Loading samples"
                        );
                    }
                }
            }
            session.apply_preferences(&preferences);

            let poller = status::spawn_poller(session.clone(), difficulty, POLL_PERIOD);
            let mut controller = Controller::new(
                session.clone(),
                Arc::new(keyboard::Driver::new()),
                difficulty,
            )?;
            controller.join().await?;
            poller.abort();

            if let Some(path) = config.preferences() {
                preferences.merge(&session.capture_preferences());
                preferences.difficulty = Some(difficulty);
                preferences.save(&path)?;
            }
        }
    };

    Ok(())
}
