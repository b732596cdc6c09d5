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

//! Text status line for a musical position, and the poller that prints it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::preferences::Difficulty;
use crate::session::Session;
use crate::transport::{Phase, Position, TransportState};

const PROGRESS_WIDTH: usize = 8;

/// Renders a one-line status for the position. The difficulty controls how much of the
/// position is revealed.
pub fn render(position: &Position, difficulty: Difficulty) -> String {
    if position.finished {
        return format!("Finished after {} loops", position.loops_completed);
    }

    match position.phase {
        Phase::Waiting => match (difficulty, &position.next_chord) {
            (Difficulty::Advanced, _) | (_, None) => "Waiting".to_string(),
            (_, Some(first)) => format!("Waiting | first chord {}", first),
        },
        Phase::CountIn => {
            let beat = position.beat_number_in_measure.unwrap_or(1);
            let mut line = format!(
                "Count-in {} {}",
                beat,
                progress_bar(position.beat_progress)
            );
            if difficulty != Difficulty::Advanced {
                if let (Some(next), Some(until)) =
                    (&position.next_chord, position.beats_until_next_chord)
                {
                    line.push_str(&format!(" | {} in {}", next, until));
                }
            }
            line
        }
        Phase::Playing => {
            let measure = position.measure_number_in_progression.unwrap_or(1);
            let beat = position.beat_number_in_measure.unwrap_or(1);
            let bar = progress_bar(position.beat_progress);
            let current = position.current_chord.as_deref().unwrap_or("-");
            let next = match (&position.next_chord, position.beats_until_next_chord) {
                (Some(next), Some(until)) => format!("{} in {}", next, until),
                _ => "no change".to_string(),
            };

            match difficulty {
                Difficulty::Beginner => format!("{} {} | next {}", current, bar, next),
                Difficulty::Intermediate => format!(
                    "{} {} | next {} | measure {} beat {}",
                    current, bar, next, measure, beat
                ),
                Difficulty::Advanced => format!(
                    "measure {} beat {} {} | loop {}",
                    measure,
                    beat,
                    bar,
                    position.loops_completed + 1
                ),
            }
        }
    }
}

/// Polls the session every period, printing a status line whenever the beat changes and
/// logging note events. This is the render loop: each poll is one `tick`.
pub fn spawn_poller(
    session: Arc<Session>,
    difficulty: Difficulty,
    period: Duration,
) -> JoinHandle<()> {
    let notes = session.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut last = None;
        loop {
            interval.tick().await;
            let was_running = session.state() != TransportState::Idle;
            let position = session.tick();

            let beat = (
                position.phase,
                position.measure_number_in_progression,
                position.beat_number_in_measure,
                position.finished,
            );
            if was_running && last != Some(beat) {
                println!("{}", render(&position, difficulty));
            }
            last = Some(beat);

            for event in notes.try_iter() {
                info!(event = %event, "Note");
            }
        }
    })
}

fn progress_bar(progress: f64) -> String {
    let filled =
        ((progress.clamp(0.0, 1.0) * PROGRESS_WIDTH as f64) as usize).min(PROGRESS_WIDTH);
    format!(
        "[{}{}]",
        "#".repeat(filled),
        ".".repeat(PROGRESS_WIDTH - filled)
    )
}
