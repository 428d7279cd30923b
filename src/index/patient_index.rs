//! Patient discovery: one ordered slice list per patient directory.

use std::path::{Path, PathBuf};

use crate::config::InputConfig;
use crate::error::SetupError;
use crate::index::slice_order;
use crate::io::fs;
use crate::pipeline::JobUnit;

/// The ordered slices of one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientJobSet {
    /// Patient directory name, e.g. `PGBM-017`
    pub patient_id: String,

    /// Slice files ascending by slice number
    pub ordered_files: Vec<PathBuf>,
}

impl PatientJobSet {
    pub fn len(&self) -> usize {
        self.ordered_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_files.is_empty()
    }

    /// One fresh job per slice, in slice order.
    pub fn jobs<I, L>(&self) -> Vec<JobUnit<I, L>> {
        self.ordered_files.iter().map(JobUnit::new).collect()
    }

    /// Output directory for this patient under `root`.
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.patient_id)
    }
}

/// Walks the data root for patient directories.
#[derive(Debug, Clone)]
pub struct PatientDirectoryWalker {
    data_root: PathBuf,
    prefix: String,
    extension: String,
    recursive: bool,
}

impl PatientDirectoryWalker {
    pub fn new(data_root: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            data_root: data_root.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            recursive: false,
        }
    }

    pub fn from_config(input: &InputConfig) -> Self {
        Self::new(&input.data_root, &input.patient_prefix, &input.extension)
            .recursive(input.recursive)
    }

    /// Collect every matching file under the patient directory instead of
    /// only the first series subdirectory.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Discover all patients, sorted by id, each with its ordered slices.
    ///
    /// Patients without slices are logged and left out. Finding no patient
    /// directories, or no slices at all, is a `DiscoveryFailure`.
    pub fn discover(&self) -> Result<Vec<PatientJobSet>, SetupError> {
        let dirs = fs::list_subdirectories(&self.data_root).map_err(|e| {
            SetupError::DiscoveryFailure(format!(
                "cannot read data root {}: {}",
                self.data_root.display(),
                e
            ))
        })?;

        let patient_dirs: Vec<PathBuf> = dirs
            .into_iter()
            .filter(|dir| {
                dir.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&self.prefix))
            })
            .collect();

        if patient_dirs.is_empty() {
            return Err(SetupError::DiscoveryFailure(format!(
                "no directories starting with '{}' under {}",
                self.prefix,
                self.data_root.display()
            )));
        }

        let mut patients = Vec::with_capacity(patient_dirs.len());
        for dir in patient_dirs {
            let patient_id = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let ordered_files = self.patient_files(&dir)?;
            if ordered_files.is_empty() {
                tracing::warn!("No .{} files found for {}, skipping", self.extension, patient_id);
                continue;
            }

            tracing::debug!("Found {} slices for {}", ordered_files.len(), patient_id);
            patients.push(PatientJobSet {
                patient_id,
                ordered_files,
            });
        }

        if patients.is_empty() {
            return Err(SetupError::DiscoveryFailure(format!(
                "no .{} files found under {}",
                self.extension,
                self.data_root.display()
            )));
        }

        let total: usize = patients.iter().map(PatientJobSet::len).sum();
        tracing::info!("Discovered {} patients with {} slices", patients.len(), total);

        Ok(patients)
    }

    /// Ordered slice files of one patient directory.
    pub fn patient_files(&self, patient_dir: &Path) -> Result<Vec<PathBuf>, SetupError> {
        let listing = if self.recursive {
            fs::list_files_recursive(patient_dir, &self.extension)
        } else {
            match self.series_dir(patient_dir)? {
                Some(series) => fs::list_files(&series, &self.extension),
                None => Ok(Vec::new()),
            }
        };

        let mut files = listing.map_err(|e| {
            SetupError::DiscoveryFailure(format!("cannot list {}: {}", patient_dir.display(), e))
        })?;
        slice_order::sort_slices(&mut files);
        Ok(files)
    }

    /// The first series subdirectory in sorted order.
    fn series_dir(&self, patient_dir: &Path) -> Result<Option<PathBuf>, SetupError> {
        let dirs = fs::list_subdirectories(patient_dir).map_err(|e| {
            SetupError::DiscoveryFailure(format!("cannot read {}: {}", patient_dir.display(), e))
        })?;
        Ok(dirs.into_iter().next())
    }
}
