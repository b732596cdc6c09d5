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

//! Sample loading and caching for triggered notes.
//!
//! Samples are decoded entirely into memory before playback, keyed by note number.
//! Each key is fetched and decoded at most once; concurrent requests for a key that is
//! still loading wait on the same in-flight load.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::audio::decode::{decode, DecodeError, Decoded};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch sample for note {key}: {message}")]
    Fetch { key: u8, message: String },

    #[error("failed to decode sample for note {key}: {source}")]
    Decode {
        key: u8,
        #[source]
        source: DecodeError,
    },

    #[error("no sample configured for note {0}")]
    UnknownKey(u8),

    #[error("sample load task failed: {0}")]
    Task(String),
}

/// A decoded sample, shared between all voices that play it.
#[derive(Debug, Clone)]
pub struct LoadedSample {
    /// Interleaved f32 samples.
    data: Arc<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
}

impl LoadedSample {
    /// Creates a loaded sample from interleaved data.
    pub fn new(data: Vec<f32>, channels: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// The interleaved samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The number of frames.
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// The playback length.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(
            (self.frames() as u128 * 1_000_000_000 / self.sample_rate.max(1) as u128) as u64,
        )
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl From<Decoded> for LoadedSample {
    fn from(decoded: Decoded) -> Self {
        LoadedSample::new(decoded.samples, decoded.channels, decoded.sample_rate)
    }
}

/// Raw, still-encoded bytes for a sample.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// A format hint, usually the file extension.
    pub extension: Option<String>,
}

/// Retrieves the raw bytes for a note. Called from a blocking thread.
pub trait Fetch: Send + Sync {
    fn fetch(&self, key: u8) -> Result<Fetched, LoadError>;
}

/// Fetches samples from files on disk.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    files: HashMap<u8, PathBuf>,
}

impl FileFetcher {
    /// Creates a fetcher for the given note to file mapping.
    pub fn new(files: HashMap<u8, PathBuf>) -> FileFetcher {
        FileFetcher { files }
    }
}

impl Fetch for FileFetcher {
    fn fetch(&self, key: u8) -> Result<Fetched, LoadError> {
        let path = self.files.get(&key).ok_or(LoadError::UnknownKey(key))?;
        let bytes = std::fs::read(path).map_err(|e| LoadError::Fetch {
            key,
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(Fetched {
            bytes,
            extension: path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_string()),
        })
    }
}

/// How much of an expected sample set is in the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub loaded: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Manages loading and caching of decoded samples.
pub struct SampleCache {
    fetcher: Arc<dyn Fetch>,
    /// Target sample rate for resampling (matches audio output).
    target_sample_rate: u32,
    entries: Mutex<HashMap<u8, Arc<OnceCell<Arc<LoadedSample>>>>>,
}

impl SampleCache {
    /// Creates a new, empty sample cache.
    pub fn new(fetcher: Arc<dyn Fetch>, target_sample_rate: u32) -> SampleCache {
        SampleCache {
            fetcher,
            target_sample_rate,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads a sample, returning the cached copy if present. The load runs as its own
    /// task, so it completes and populates the cache even if the caller stops waiting.
    pub async fn load(&self, key: u8) -> Result<Arc<LoadedSample>, LoadError> {
        let cell = self.entries.lock().entry(key).or_default().clone();
        if let Some(sample) = cell.get() {
            debug!(key, "Using cached sample");
            return Ok(sample.clone());
        }

        let fetcher = self.fetcher.clone();
        let target_sample_rate = self.target_sample_rate;
        tokio::spawn(async move {
            cell.get_or_try_init(|| fetch_and_decode(fetcher, key, target_sample_rate))
                .await
                .cloned()
        })
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
    }

    /// Loads every key concurrently. Fails with the first error encountered.
    pub async fn load_many(&self, keys: &[u8]) -> Result<Vec<Arc<LoadedSample>>, LoadError> {
        info!(count = keys.len(), "Loading sample set");
        try_join_all(keys.iter().map(|key| self.load(*key))).await
    }

    /// Returns a loaded sample without waiting. None if it is absent or still loading.
    pub fn get(&self, key: u8) -> Option<Arc<LoadedSample>> {
        self.entries
            .lock()
            .get(&key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Adds an already decoded sample.
    #[cfg(test)]
    pub(crate) fn insert(&self, key: u8, sample: LoadedSample) {
        let cell = OnceCell::new_with(Some(Arc::new(sample)));
        self.entries.lock().insert(key, Arc::new(cell));
    }

    /// Reports how many of the expected samples are loaded.
    pub fn progress(&self, expected_total: usize) -> Progress {
        let loaded = self
            .entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count();
        let percentage = if expected_total == 0 {
            100.0
        } else {
            (loaded as f64 / expected_total as f64 * 100.0).min(100.0)
        };
        Progress {
            loaded,
            total: expected_total,
            percentage,
        }
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter_map(|cell| cell.get())
            .map(|sample| sample.memory_size())
            .sum()
    }
}

impl std::fmt::Debug for SampleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleCache")
            .field("cached_samples", &self.entries.lock().len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

async fn fetch_and_decode(
    fetcher: Arc<dyn Fetch>,
    key: u8,
    target_sample_rate: u32,
) -> Result<Arc<LoadedSample>, LoadError> {
    info!(key, "Loading sample into memory");
    let loaded = tokio::task::spawn_blocking(move || {
        let fetched = fetcher.fetch(key)?;
        let decoded = decode(
            fetched.bytes,
            fetched.extension.as_deref(),
            target_sample_rate,
        )
        .map_err(|source| LoadError::Decode { key, source })?;
        Ok::<_, LoadError>(LoadedSample::from(decoded))
    })
    .await
    .map_err(|e| LoadError::Task(e.to_string()))??;

    info!(
        key,
        channels = loaded.channels(),
        duration_ms = loaded.duration().as_millis(),
        memory_kb = loaded.memory_size() / 1024,
        "Sample loaded"
    );
    Ok(Arc::new(loaded))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn wav_bytes(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                writer.write_sample((i % 100) as i16 * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// Serves the same WAV for every key in range, counting fetches.
    struct CountingFetcher {
        fetches: AtomicUsize,
        bytes: Vec<u8>,
        valid: std::ops::Range<u8>,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(valid: std::ops::Range<u8>, delay: Duration) -> Arc<CountingFetcher> {
            Arc::new(CountingFetcher {
                fetches: AtomicUsize::new(0),
                bytes: wav_bytes(441),
                valid,
                delay,
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl Fetch for CountingFetcher {
        fn fetch(&self, key: u8) -> Result<Fetched, LoadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if !self.valid.contains(&key) {
                return Err(LoadError::Fetch {
                    key,
                    message: "not found".to_string(),
                });
            }
            Ok(Fetched {
                bytes: self.bytes.clone(),
                extension: Some("wav".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_load_is_memoized() {
        let fetcher = CountingFetcher::new(60..72, Duration::ZERO);
        let cache = SampleCache::new(fetcher.clone(), 44100);

        let first = cache.load(60).await.unwrap();
        let second = cache.load(60).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, fetcher.fetches());
        assert_eq!(441, first.frames());
        assert!(cache.get(60).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_loads_coalesce() {
        let fetcher = CountingFetcher::new(60..72, Duration::from_millis(50));
        let cache = SampleCache::new(fetcher.clone(), 44100);

        let (a, b) = tokio::join!(cache.load(64), cache.load(64));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(1, fetcher.fetches());
    }

    #[tokio::test]
    async fn test_load_many() {
        let fetcher = CountingFetcher::new(60..72, Duration::ZERO);
        let cache = SampleCache::new(fetcher.clone(), 44100);

        let loaded = cache.load_many(&[60, 62, 64]).await.unwrap();
        assert_eq!(3, loaded.len());
        assert_eq!(
            Progress {
                loaded: 3,
                total: 4,
                percentage: 75.0
            },
            cache.progress(4)
        );
    }

    #[tokio::test]
    async fn test_load_many_fails_fast() {
        let fetcher = CountingFetcher::new(60..72, Duration::ZERO);
        let cache = SampleCache::new(fetcher, 44100);

        match cache.load_many(&[60, 99, 62]).await {
            Err(LoadError::Fetch { key, .. }) => assert_eq!(99, key),
            other => panic!("unexpected result: {:?}", other.map(|s| s.len())),
        }
        assert!(cache.get(99).is_none());
    }

    #[tokio::test]
    async fn test_decode_failure() {
        struct Garbage;
        impl Fetch for Garbage {
            fn fetch(&self, _: u8) -> Result<Fetched, LoadError> {
                Ok(Fetched {
                    bytes: vec![0, 1, 2, 3],
                    extension: None,
                })
            }
        }

        let cache = SampleCache::new(Arc::new(Garbage), 44100);
        assert!(matches!(
            cache.load(1).await,
            Err(LoadError::Decode { key: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_file_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("C4.wav");
        std::fs::write(&path, wav_bytes(100)).unwrap();

        let fetcher = FileFetcher::new(HashMap::from([(60, path)]));
        let cache = SampleCache::new(Arc::new(fetcher), 22050);
        let sample = cache.load(60).await.unwrap();
        assert_eq!(50, sample.frames());

        assert!(matches!(
            cache.load(61).await,
            Err(LoadError::UnknownKey(61))
        ));
    }

    #[test]
    fn test_progress_empty() {
        let cache = SampleCache::new(CountingFetcher::new(0..1, Duration::ZERO), 44100);
        assert_eq!(0, cache.progress(12).loaded);
        assert_eq!(0.0, cache.progress(12).percentage);
        assert_eq!(100.0, cache.progress(0).percentage);
    }
}
