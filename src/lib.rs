pub mod file;
pub mod index;
pub mod relation;

pub use file::{BUFFER_POOL_SIZE, BufferManager, FileHandle, PAGE_SIZE, PagedFileManager};
pub use index::{BTreeIndex, IndexError, IndexResult, KeyType, KeyValue, ScanOp};
pub use relation::{FileScan, HeapFile, RecordId};
