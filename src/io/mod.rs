//! Filesystem access and batch export.

mod export;
pub mod fs;

pub use export::{ExportCoordinator, ExportReport, ORIGINAL_SUFFIX, PROCESSED_SUFFIX};
