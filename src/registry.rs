//! Batch registry: the local record of every submission made for a job.
//!
//! One line per `submit`, `<batch_id> <first_slice> <slice_count>`, appended and
//! never rewritten. The scheduler only knows batch ids and process offsets, so
//! this file is what maps its log back to absolute slice numbers.

use crate::error::GridJobError;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// File layout of a job's working state under `<job>.logs/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub log_dir: PathBuf,
    pub user_log: PathBuf,
    pub batch_file: PathBuf,
    job_name: String,
}

impl JobPaths {
    /// Paths relative to the current working directory, as the submit file uses them.
    pub fn new(job_name: &str) -> Self {
        Self::under(Path::new(""), job_name)
    }

    /// Paths rooted at `base`.
    pub fn under(base: &Path, job_name: &str) -> Self {
        let log_dir = base.join(format!("{}.logs", job_name));
        Self {
            user_log: log_dir.join(format!("{}.log", job_name)),
            batch_file: log_dir.join("batches.log"),
            log_dir,
            job_name: job_name.to_string(),
        }
    }

    /// Submit descriptor for the `sequence`-th submission.
    pub fn submit_file(&self, sequence: usize) -> PathBuf {
        self.log_dir
            .join(format!("{}.sub{}", self.job_name, sequence))
    }
}

/// One submission recorded in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Scheduler cluster id.
    pub id: u64,
    /// Absolute slice number of process 0.
    pub first_slice: u64,
    /// Number of processes queued.
    pub slice_count: u64,
}

impl Batch {
    /// Local process offsets of this batch that fall in the absolute slice
    /// range `start..start + count`.
    pub fn overlap(&self, start: u64, count: u64) -> Range<u64> {
        let lo = start.saturating_sub(self.first_slice);
        let hi = start
            .saturating_add(count)
            .saturating_sub(self.first_slice)
            .min(self.slice_count);
        lo..hi.max(lo)
    }

    /// Absolute slice number of local process `offset`, if the batch has one.
    pub fn slice_of(&self, offset: u64) -> Option<u64> {
        if offset >= self.slice_count {
            return None;
        }
        self.first_slice.checked_add(offset)
    }

    fn to_line(self) -> String {
        format!("{} {} {}", self.id, self.first_slice, self.slice_count)
    }
}

/// Parsed contents of `batches.log`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRegistry {
    batches: Vec<Batch>,
}

impl BatchRegistry {
    /// Load the registry. A missing file is a precondition failure.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GridJobError::precondition(
                "no record exists of this job ever having been submitted!",
            )
            .into());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch registry: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Corrupt batch registry: {}", path.display()))
    }

    /// Parse registry text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut batches = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parse = |i: usize| -> Result<u64> {
                fields
                    .get(i)
                    .and_then(|f| f.parse().ok())
                    .ok_or_else(|| anyhow::anyhow!("line {}: malformed entry {:?}", idx + 1, line))
            };
            batches.push(Batch {
                id: parse(0)?,
                first_slice: parse(1)?,
                slice_count: parse(2)?,
            });
        }
        Ok(Self { batches })
    }

    /// Number of submissions already recorded at `path`; zero if the file does not exist.
    /// Every line counts, blank ones included, so submit file numbers never repeat.
    pub fn submissions(path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch registry: {}", path.display()))?;
        Ok(content.lines().count())
    }

    /// Record a new submission, creating the file if needed.
    pub fn append(path: &Path, batch: Batch) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open batch registry: {}", path.display()))?;
        writeln!(file, "{}", batch.to_line())
            .with_context(|| format!("Failed to write batch registry: {}", path.display()))?;
        Ok(())
    }

    /// Entry for batch `id`. A later entry for the same id wins.
    pub fn batch(&self, id: u64) -> Option<Batch> {
        self.batches.iter().rev().find(|b| b.id == id).copied()
    }

    /// Batches touched by cancelling slices `start..start + count`, with the
    /// local process range to remove from each.
    pub fn cancel_ranges(&self, start: u64, count: u64) -> Vec<(Batch, Range<u64>)> {
        self.batches
            .iter()
            .map(|b| (*b, b.overlap(start, count)))
            .filter(|(_, range)| !range.is_empty())
            .collect()
    }
}
