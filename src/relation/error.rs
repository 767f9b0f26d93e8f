use thiserror::Error;

use crate::file::{FileError, PageId};

use super::SlotId;

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("Record of {0} bytes does not fit a heap page")]
    RecordTooLarge(usize),

    #[error("Invalid slot: page_no={page_no}, slot_no={slot_no}")]
    InvalidSlot { page_no: PageId, slot_no: SlotId },

    #[error("Corrupted heap file: {0}")]
    Corrupted(String),
}

pub type RelationResult<T> = Result<T, RelationError>;
