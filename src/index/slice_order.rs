//! Slice ordering by the number embedded in the file name.
//!
//! Slice files are named like `1-14.dcm`; the ordering key is the integer
//! between the last `-` and the extension. Names without a parseable key
//! sort after every numbered slice.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Ordering key of a slice file, `None` when the name carries no number.
pub fn slice_key(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, suffix) = stem.rsplit_once('-')?;
    suffix.parse().ok()
}

/// Compare two slice paths: numbered slices ascending, unnumbered last,
/// ties broken by file name.
pub fn compare_slices(a: &Path, b: &Path) -> Ordering {
    let by_key = match (slice_key(a), slice_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_key.then_with(|| a.file_name().cmp(&b.file_name()))
}

/// Sort slice paths in place.
pub fn sort_slices(files: &mut [PathBuf]) {
    files.sort_by(|a, b| compare_slices(a, b));
}
