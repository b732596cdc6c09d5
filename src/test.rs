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
use std::{
    error::Error,
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, SystemTime},
};

use tempfile::TempDir;

use crate::audio::{mock, Device as _};
use crate::config;
use crate::samples::NoteEventKind;
use crate::session::{ReadinessError, Session};
use crate::transport::{Phase, TransportError, TransportState};

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            assert!(false, "System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            assert!(false, "{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Writes a mono 16-bit WAV at 1 kHz holding a constant value.
pub fn write_wav(path: &Path, frames: usize, value: i16) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 1000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..frames {
        writer.write_sample(value)?;
    }
    writer.finalize()?;
    Ok(())
}

/// A session directory: a twelve-bar blues at 120 BPM with a four beat count-in, no
/// pre-roll or visual lead, ending after one loop. Samples and the backing track are
/// 1 kHz mono WAVs at half scale.
pub struct Fixture {
    pub dir: TempDir,
    pub config: config::Session,
}

impl Fixture {
    pub fn new() -> Result<Fixture, Box<dyn Error>> {
        Fixture::with_max_loops(Some(1))
    }

    /// Like `new`, but with the given loop limit. None loops until the backing track ends.
    pub fn with_max_loops(max_loops: Option<u64>) -> Result<Fixture, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("piano"))?;
        for name in ["C4", "E4", "G4"] {
            write_wav(&dir.path().join("piano").join(format!("{}.wav", name)), 1000, 16384)?;
        }
        write_wav(&dir.path().join("backing.wav"), 30_000, 16384)?;

        let path = dir.path().join("session.yaml");
        let max_loops = match max_loops {
            Some(max_loops) => format!("  max_loops: {}\n", max_loops),
            None => String::new(),
        };
        fs::write(
            &path,
            format!(
                r#"
audio:
  device: mock
  sample_rate: 1000
  channels: 1
progression:
  chords: [C, C, C, C, F, F, C, C, G, F, C, G]
  bpm: 120
  count_in_beats: 4
  pre_roll: 0ms
  visual_lead: 0ms
{}backing_track: backing.wav
samples:
  path: piano
  fade: 10ms
  files:
    - note: 60
      file: C4.wav
    - note: 64
      file: E4.wav
    - note: 67
      file: G4.wav
"#,
                max_loops
            ),
        )?;

        let config = config::Session::deserialize(&path)?;
        Ok(Fixture { dir, config })
    }

    fn session(&self, device: &mock::Device) -> Result<Session, Box<dyn Error>> {
        Ok(Session::new(&self.config, Arc::new(device.clone()))?)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_session() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    let notes = session.subscribe();

    assert!(!session.is_ready());
    assert_eq!(Err(TransportError::NotReady), session.start());

    session.become_ready().await?;
    assert!(session.is_ready());
    assert_eq!(100.0, session.load_progress().percentage);

    let idle = session.position();
    assert_eq!(Phase::Waiting, idle.phase);
    assert_eq!(None, idle.current_chord);
    assert_eq!(Some("C".to_string()), idle.next_chord);

    session.start()?;
    device.advance(Duration::from_secs(1));
    let count_in = session.tick();
    assert_eq!(Phase::CountIn, count_in.phase);
    assert_eq!(Some(3), count_in.beat_number_in_measure);
    assert_eq!(Some(2), count_in.beats_until_next_chord);

    device.advance(Duration::from_secs(1));
    let playing = session.tick();
    assert_eq!(Phase::Playing, playing.phase);
    assert_eq!(Some("C".to_string()), playing.current_chord);
    assert_eq!(Some("F".to_string()), playing.next_chord);
    assert_eq!(Some(16), playing.beats_until_next_chord);

    // Play a note over the backing track.
    assert!(session.play_note("key-c", 60));
    assert_eq!(vec![1.0; 10], device.advance(Duration::from_millis(10)));
    assert!(session.stop_note("key-c", 60));
    device.advance(Duration::from_millis(50));
    assert!(session.active_voices().is_empty());
    let kinds: Vec<NoteEventKind> = notes.try_iter().map(|e| e.kind).collect();
    assert_eq!(vec![NoteEventKind::Started, NoteEventKind::Ended], kinds);

    // Time spent paused does not count.
    session.pause();
    let paused = session.position();
    device.advance(Duration::from_secs(5));
    session.resume()?;
    assert_eq!(paused, session.position());
    assert_eq!(Err(TransportError::NotPaused), session.resume());

    // Measure 5 holds the F.
    device.advance(Duration::from_millis(8_190 - 60));
    let f = session.tick();
    assert_eq!(Some(5), f.measure_number_in_progression);
    assert_eq!(Some("F".to_string()), f.current_chord);

    // The single loop ends the piece.
    device.advance(Duration::from_secs(16));
    let end = session.tick();
    assert!(end.finished);
    assert_eq!(Some("C".to_string()), end.current_chord);
    assert_eq!(TransportState::Idle, session.state());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_sample_then_retry() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let missing = fixture.dir.path().join("piano").join("E4.wav");
    fs::remove_file(&missing)?;

    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    assert!(matches!(
        session.become_ready().await,
        Err(ReadinessError::SamplesFailed(_))
    ));
    assert!(!session.is_ready());
    assert_eq!(Err(TransportError::NotReady), session.start());

    write_wav(&missing, 1000, 16384)?;
    session.become_ready().await?;
    assert!(session.is_ready());
    session.start()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_keeps_buffered_backing_track() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let missing = fixture.dir.path().join("piano").join("G4.wav");
    fs::remove_file(&missing)?;

    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    assert!(matches!(
        session.become_ready().await,
        Err(ReadinessError::SamplesFailed(_))
    ));

    // The backing track buffered on the first attempt and is not read again.
    fs::remove_file(fixture.dir.path().join("backing.wav"))?;
    write_wav(&missing, 1000, 16384)?;
    session.become_ready().await?;
    assert!(session.is_ready());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_become_ready() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;

    let (first, second) = tokio::join!(session.become_ready(), session.become_ready());
    first?;
    second?;
    assert!(session.is_ready());
    assert_eq!(3, session.load_progress().loaded);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unbounded_session_ends_with_backing_track() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::with_max_loops(None)?;
    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    session.become_ready().await?;
    session.start()?;

    // Two passes of the chart still run over the 30 second track.
    device.advance(Duration::from_secs(28));
    let playing = session.tick();
    assert_eq!(Phase::Playing, playing.phase);
    assert_eq!(1, playing.loops_completed);
    assert!(!playing.finished);
    assert_eq!(TransportState::Running, session.state());

    device.advance(Duration::from_secs(3));
    session.tick();
    assert_eq!(TransportState::Idle, session.state());
    assert_eq!(Phase::Waiting, session.position().phase);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_backing_track() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    fs::remove_file(fixture.dir.path().join("backing.wav"))?;

    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    assert!(matches!(
        session.become_ready().await,
        Err(ReadinessError::BackingTrackFailed(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_output_cannot_activate() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let device = mock::Device::get("mock-fail", 1000, 1);
    let session = fixture.session(&device)?;
    assert!(matches!(
        session.become_ready().await,
        Err(ReadinessError::OutputInactive(_))
    ));
    assert!(!session.play_note("key-c", 60));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_volume_and_preferences() -> Result<(), Box<dyn Error>> {
    let fixture = Fixture::new()?;
    let device = mock::Device::get("mock", 1000, 1);
    let session = fixture.session(&device)?;
    session.become_ready().await?;

    assert!(session.set_volume("samples", 1.5));
    assert!(!session.set_volume("drums", 0.5));
    assert_eq!(None, session.toggle_mute("drums"));
    assert_eq!(Some(true), session.toggle_mute("backingTrack"));
    assert_eq!(Some(false), session.toggle_mute("backingTrack"));

    let preferences = session.capture_preferences();
    assert_eq!(Some(1.0), preferences.samples_volume);
    assert_eq!(Some(false), preferences.backing_track_muted);

    session.apply_preferences(&crate::preferences::Preferences {
        backing_track_volume: Some(0.5),
        samples_muted: Some(true),
        ..Default::default()
    });
    session.start()?;
    assert!(session.play_note("key-c", 60));
    // Backing track at half volume, samples muted.
    assert_eq!(vec![0.25; 10], device.advance(Duration::from_millis(10)));
    assert!(device.is_running());
    Ok(())
}
