//! Patient discovery and slice ordering.

mod patient_index;
mod slice_order;

pub use patient_index::{PatientDirectoryWalker, PatientJobSet};
pub use slice_order::{compare_slices, slice_key, sort_slices};
