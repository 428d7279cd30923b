//! Per-image jobs and batch partitioning.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::ErrorRecord;

/// One slice flowing through the pipeline.
///
/// Artifacts are written only by the worker processing this job; once the
/// batch joins, the job moves to the export coordinator and is dropped after
/// export.
#[derive(Debug)]
pub struct JobUnit<I, L> {
    /// Slice file to import
    pub source_path: PathBuf,

    /// Imported slice, kept for the plain export render
    pub original: Option<I>,

    /// Final label image after postprocessing
    pub processed: Option<L>,

    /// Set when any stage failed
    pub failure: Option<ErrorRecord>,
}

impl<I, L> JobUnit<I, L> {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            original: None,
            processed: None,
            failure: None,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// A job succeeded when it has both artifacts and no failure.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.original.is_some() && self.processed.is_some()
    }
}

/// A contiguous, ordered slice of one patient's jobs.
#[derive(Debug)]
pub struct Batch<T> {
    /// Zero-based batch index within the patient
    pub index: usize,

    /// Position of the first job in the patient's job list
    pub offset: usize,

    pub jobs: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Number of batches `total` jobs split into.
pub fn batch_count(total: usize, batch_size: NonZeroUsize) -> usize {
    total.div_ceil(batch_size.get())
}

/// Split `jobs` into contiguous batches of at most `batch_size`, preserving
/// order. Every batch except possibly the last holds exactly `batch_size`
/// jobs.
pub fn partition<T>(jobs: Vec<T>, batch_size: NonZeroUsize) -> Vec<Batch<T>> {
    let size = batch_size.get();
    let mut batches = Vec::with_capacity(batch_count(jobs.len(), batch_size));
    let mut current = Vec::with_capacity(size.min(jobs.len()));
    let mut offset = 0;

    for job in jobs {
        current.push(job);
        if current.len() == size {
            let jobs = std::mem::replace(&mut current, Vec::with_capacity(size));
            let len = jobs.len();
            batches.push(Batch {
                index: batches.len(),
                offset,
                jobs,
            });
            offset += len;
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            offset,
            jobs: current,
        });
    }

    batches
}
