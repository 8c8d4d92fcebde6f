//! Progress tracking and the persisted resume file.
//!
//! Three pieces live here:
//!
//! - [`ProgressStore`]: the JSON file mapping package name to resume index.
//!   All writes go through one async mutex and replace the file atomically.
//! - [`CompletionTracker`]: turns out-of-order batch completions into the
//!   contiguous completed prefix, which is what gets persisted.
//! - [`ProgressTracker`]: in-memory counters plus a moving window used for
//!   the rate and ETA shown in the logs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BackfillError, Result};

/// Persisted form: package name to number of leading batches known complete.
pub type ProgressMap = BTreeMap<String, usize>;

/// Default location of the resume file, relative to the working directory.
pub const DEFAULT_PROGRESS_FILE: &str = ".backfill-progress.json";

/// Number of batch samples in the throughput window.
pub const RATE_WINDOW: usize = 10;

/// The resume file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved map. A missing file is "no progress"; so is a file that
    /// does not parse, which is logged and otherwise ignored.
    pub async fn load(&self) -> ProgressMap {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable progress file {}: {}",
                        self.path.display(),
                        e
                    );
                    ProgressMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProgressMap::new(),
            Err(e) => {
                warn!("Could not read progress file {}: {}", self.path.display(), e);
                ProgressMap::new()
            }
        }
    }

    /// Saved resume index for one package.
    pub async fn get(&self, package: &str) -> Option<usize> {
        self.load().await.get(package).copied()
    }

    /// Set `package`'s resume index, keeping every other key as it is on disk.
    pub async fn save_progress(&self, package: &str, index: usize) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.load().await;
        map.insert(package.to_string(), index);

        let content = serde_json::to_string_pretty(&map)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            BackfillError::Progress(format!("writing {}: {}", temp_path.display(), e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            BackfillError::Progress(format!("replacing {}: {}", self.path.display(), e))
        })?;

        debug!("saved progress {}={}", package, index);
        Ok(())
    }

    /// Like [`save_progress`](Self::save_progress), but a failure only logs.
    /// The batch has already been written to the sink at this point.
    pub async fn checkpoint(&self, package: &str, index: usize) {
        if let Err(e) = self.save_progress(package, index).await {
            warn!("Failed to save progress for {}: {}", package, e);
        }
    }

    /// Delete the file. Returns whether there was anything to delete.
    pub async fn clear(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Tracks which absolute batch indices finished and reports how many leading
/// batches are done without gaps.
#[derive(Debug)]
pub struct CompletionTracker {
    prefix: usize,
    pending: BTreeSet<usize>,
}

impl CompletionTracker {
    /// Batches below `offset` are already complete.
    pub fn new(offset: usize) -> Self {
        Self {
            prefix: offset,
            pending: BTreeSet::new(),
        }
    }

    /// Mark batch `index` complete. Returns the new prefix length if it grew.
    pub fn complete(&mut self, index: usize) -> Option<usize> {
        if index < self.prefix {
            return None;
        }
        self.pending.insert(index);

        let before = self.prefix;
        while self.pending.remove(&self.prefix) {
            self.prefix += 1;
        }
        (self.prefix > before).then_some(self.prefix)
    }

    /// Number of leading batches complete.
    pub fn resume_index(&self) -> usize {
        self.prefix
    }

    /// Completed batches beyond the prefix.
    pub fn out_of_order(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct BatchSample {
    metrics: usize,
    elapsed: Duration,
}

/// In-memory progress for the package currently running.
#[derive(Debug)]
pub struct ProgressTracker {
    package: String,
    current: usize,
    total: usize,
    metrics_emitted: u64,
    concurrency: usize,
    window: VecDeque<BatchSample>,
}

impl ProgressTracker {
    pub fn new(package: impl Into<String>, total: usize) -> Self {
        Self {
            package: package.into(),
            current: 0,
            total,
            metrics_emitted: 0,
            concurrency: 1,
            window: VecDeque::with_capacity(RATE_WINDOW),
        }
    }

    /// Batches expected to run side by side; scales the ETA.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn record_batch(&mut self, metrics: usize, elapsed: Duration) {
        self.current += 1;
        self.metrics_emitted += metrics as u64;
        if self.window.len() == RATE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(BatchSample { metrics, elapsed });
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.current)
    }

    pub fn metrics_emitted(&self) -> u64 {
        self.metrics_emitted
    }

    /// Mean of the per-batch metrics/sec samples in the window.
    pub fn rate(&self) -> f64 {
        let samples: Vec<f64> = self
            .window
            .iter()
            .filter(|s| !s.elapsed.is_zero())
            .map(|s| s.metrics as f64 / s.elapsed.as_secs_f64())
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Mean batch time over the window times the number of waves of
    /// `concurrency` batches still to run.
    pub fn eta(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        let total: Duration = self.window.iter().map(|s| s.elapsed).sum();
        let mean = total / self.window.len() as u32;
        let waves = self.remaining().div_ceil(self.concurrency);
        Some(mean * waves as u32)
    }

    pub fn log(&self) {
        let pct = if self.total == 0 {
            100.0
        } else {
            self.current as f64 * 100.0 / self.total as f64
        };
        let eta = self
            .eta()
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            "{}: batch {}/{} ({:.1}%), {} metrics, {:.0} metrics/sec, ETA {}",
            self.package,
            self.current,
            self.total,
            pct,
            self.metrics_emitted,
            self.rate(),
            eta
        );
    }
}
