//! Disk-resident B+ tree index over a single attribute of a relation file.
//!
//! An index maps keys of one of three domains (i32, f64, fixed 10-byte
//! string) to record ids inside a heap relation. The key domain is bound
//! once at [`BTreeIndex::open`]; every operation then dispatches straight
//! to one monomorphized engine.

mod btree;
mod error;
mod key;
mod layout;
mod scan;

pub use error::{IndexError, IndexResult};
pub use key::{DoubleKey, KeyType, KeyValue, StringKey};
pub use scan::ScanOp;

use crate::file::{BufferManager, FileHandle};
use crate::relation::RecordId;

use btree::TypedIndex;

/// A disk-resident B+ tree index.
///
/// The index lives in a paged file named
/// `"{relation_path}.{attr_byte_offset}"`. Opening a path with no index
/// file builds one by streaming the relation; opening an existing file
/// reuses it as-is after checking its header against the open arguments.
pub struct BTreeIndex {
    inner: Inner,
}

enum Inner {
    Int(TypedIndex<i32>),
    Double(TypedIndex<DoubleKey>),
    Str(TypedIndex<StringKey>),
}

impl BTreeIndex {
    /// Open (or build) the index on `relation_path` keyed on the
    /// attribute at `attr_byte_offset`
    pub fn open(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
        key_type: KeyType,
    ) -> IndexResult<Self> {
        let inner = match key_type {
            KeyType::Int => {
                Inner::Int(TypedIndex::open(buffer_mgr, relation_path, attr_byte_offset)?)
            }
            KeyType::Double => {
                Inner::Double(TypedIndex::open(buffer_mgr, relation_path, attr_byte_offset)?)
            }
            KeyType::Str => {
                Inner::Str(TypedIndex::open(buffer_mgr, relation_path, attr_byte_offset)?)
            }
        };
        Ok(Self { inner })
    }

    /// Same as [`BTreeIndex::open`] with explicit node occupancies, so
    /// tests can force splits with a handful of keys. An existing index
    /// must be reopened with the occupancies it was built with; the
    /// header records only the key domain.
    pub fn open_with_occupancy(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
        key_type: KeyType,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> IndexResult<Self> {
        let inner = match key_type {
            KeyType::Int => Inner::Int(TypedIndex::open_with_occupancy(
                buffer_mgr,
                relation_path,
                attr_byte_offset,
                leaf_occupancy,
                node_occupancy,
            )?),
            KeyType::Double => Inner::Double(TypedIndex::open_with_occupancy(
                buffer_mgr,
                relation_path,
                attr_byte_offset,
                leaf_occupancy,
                node_occupancy,
            )?),
            KeyType::Str => Inner::Str(TypedIndex::open_with_occupancy(
                buffer_mgr,
                relation_path,
                attr_byte_offset,
                leaf_occupancy,
                node_occupancy,
            )?),
        };
        Ok(Self { inner })
    }

    /// Name of the backing index file
    pub fn index_name(&self) -> &str {
        match &self.inner {
            Inner::Int(index) => index.index_name(),
            Inner::Double(index) => index.index_name(),
            Inner::Str(index) => index.index_name(),
        }
    }

    /// Key domain this index was bound to at open
    pub fn key_type(&self) -> KeyType {
        match &self.inner {
            Inner::Int(_) => KeyType::Int,
            Inner::Double(_) => KeyType::Double,
            Inner::Str(_) => KeyType::Str,
        }
    }

    /// Handle of the backing index file
    pub fn file_handle(&self) -> FileHandle {
        match &self.inner {
            Inner::Int(index) => index.file_handle(),
            Inner::Double(index) => index.file_handle(),
            Inner::Str(index) => index.file_handle(),
        }
    }

    /// Insert one (key, record id) entry. Duplicate keys with distinct
    /// record ids are permitted.
    pub fn insert_entry(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: KeyValue,
        rid: RecordId,
    ) -> IndexResult<()> {
        match &self.inner {
            Inner::Int(index) => index.insert_entry(buffer_mgr, key.to_int()?, rid),
            Inner::Double(index) => index.insert_entry(buffer_mgr, key.to_double()?, rid),
            Inner::Str(index) => index.insert_entry(buffer_mgr, key.to_string_key()?, rid),
        }
    }

    /// Begin a range scan. The low operator must be GT or GTE and the
    /// high operator LT or LTE.
    pub fn start_scan(
        &mut self,
        buffer_mgr: &mut BufferManager,
        low: KeyValue,
        low_op: ScanOp,
        high: KeyValue,
        high_op: ScanOp,
    ) -> IndexResult<()> {
        match &mut self.inner {
            Inner::Int(index) => {
                index.start_scan(buffer_mgr, low.to_int()?, low_op, high.to_int()?, high_op)
            }
            Inner::Double(index) => index.start_scan(
                buffer_mgr,
                low.to_double()?,
                low_op,
                high.to_double()?,
                high_op,
            ),
            Inner::Str(index) => index.start_scan(
                buffer_mgr,
                low.to_string_key()?,
                low_op,
                high.to_string_key()?,
                high_op,
            ),
        }
    }

    /// Yield the record id of the next entry in range
    pub fn scan_next(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<RecordId> {
        match &mut self.inner {
            Inner::Int(index) => index.scan_next(buffer_mgr),
            Inner::Double(index) => index.scan_next(buffer_mgr),
            Inner::Str(index) => index.scan_next(buffer_mgr),
        }
    }

    /// Terminate the scan, releasing the held leaf page
    pub fn end_scan(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        match &mut self.inner {
            Inner::Int(index) => index.end_scan(buffer_mgr),
            Inner::Double(index) => index.end_scan(buffer_mgr),
            Inner::Str(index) => index.end_scan(buffer_mgr),
        }
    }

    /// Flush the index file and release the file handle. The index file
    /// itself persists on disk.
    pub fn close(self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        match self.inner {
            Inner::Int(index) => index.close(buffer_mgr),
            Inner::Double(index) => index.close(buffer_mgr),
            Inner::Str(index) => index.close(buffer_mgr),
        }
    }
}
