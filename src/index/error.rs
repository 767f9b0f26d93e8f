use thiserror::Error;

use crate::file::FileError;
use crate::relation::RelationError;

use super::key::KeyType;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Relation error: {0}")]
    Relation(#[from] RelationError),

    #[error("Index metadata does not match open arguments: {0}")]
    BadIndexInfo(String),

    #[error("Scan operators must be GT or GTE for the low bound and LT or LTE for the high bound")]
    BadOpcodes,

    #[error("Scan range is empty: low bound exceeds high bound")]
    BadScanrange,

    /// Reserved for point-lookup extensions; never raised by range scans
    #[error("No such key in index")]
    NoSuchKeyFound,

    #[error("Scan has not been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    #[error("Key type mismatch: index is keyed on {expected:?}, got {actual:?}")]
    KeyTypeMismatch { expected: KeyType, actual: KeyType },

    #[error("NaN is not an indexable key")]
    NanKey,

    #[error("Key at offset {offset} does not fit a record of {len} bytes")]
    KeyPastRecordEnd { offset: usize, len: usize },

    #[error("Invalid occupancy: {0} (must be >= 2 and fit one page)")]
    InvalidOccupancy(usize),

    #[error("Corrupted index page: {0}")]
    Corrupted(String),
}
