use crate::file::{BufferManager, FileHandle, PageId};

use super::error::{RelationError, RelationResult};
use super::page::HeapPage;
use super::{RecordId, SlotId};

/// A relation stored as a chain of heap pages holding fixed-length,
/// schema-free records. The index layer extracts keys from the raw record
/// bytes at a byte offset; nothing here interprets them.
pub struct HeapFile {
    file: FileHandle,
    record_size: usize,
    first_page: PageId,
    /// Inserts always target the tail of the page chain
    last_page: PageId,
}

impl HeapFile {
    /// Create a new heap file for records of `record_size` bytes
    pub fn create(
        buffer_mgr: &mut BufferManager,
        path: &str,
        record_size: usize,
    ) -> RelationResult<Self> {
        if HeapPage::capacity_for(record_size) == 0 {
            return Err(RelationError::RecordTooLarge(record_size));
        }

        buffer_mgr.file_manager_mut().create_file(path)?;
        let file = buffer_mgr.file_manager_mut().open_file(path)?;

        let (page_no, page_buf) = buffer_mgr.alloc_page(file)?;
        if let Err(e) = HeapPage::format(page_buf, record_size) {
            buffer_mgr.unpin_page(file, page_no, false)?;
            return Err(e);
        }
        buffer_mgr.unpin_page(file, page_no, true)?;

        Ok(Self {
            file,
            record_size,
            first_page: page_no,
            last_page: page_no,
        })
    }

    /// Open an existing heap file. The record size is read back from the
    /// first page header.
    pub fn open(buffer_mgr: &mut BufferManager, path: &str) -> RelationResult<Self> {
        let file = buffer_mgr.file_manager_mut().open_file(path)?;
        let page_count = buffer_mgr.file_manager_mut().page_count(file)?;
        if page_count == 0 {
            return Err(RelationError::Corrupted(
                "heap file has no pages".to_string(),
            ));
        }

        buffer_mgr.read_page(file, 1)?;
        let record_size = match HeapPage::from_buffer(buffer_mgr.pinned_page_mut(file, 1)?) {
            Ok(page) => page.record_size(),
            Err(e) => {
                buffer_mgr.unpin_page(file, 1, false)?;
                return Err(e);
            }
        };
        buffer_mgr.unpin_page(file, 1, false)?;

        Ok(Self {
            file,
            record_size,
            first_page: 1,
            last_page: page_count,
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn file_handle(&self) -> FileHandle {
        self.file
    }

    /// Append a record, allocating and linking a fresh page when the tail
    /// page is full
    pub fn insert_record(
        &mut self,
        buffer_mgr: &mut BufferManager,
        record: &[u8],
    ) -> RelationResult<RecordId> {
        if record.len() != self.record_size {
            return Err(RelationError::RecordSizeMismatch {
                expected: self.record_size,
                actual: record.len(),
            });
        }

        // Try the tail page first
        buffer_mgr.read_page(self.file, self.last_page)?;
        let slot = match HeapPage::from_buffer(buffer_mgr.pinned_page_mut(self.file, self.last_page)?)
        {
            Ok(mut page) => page.insert(record),
            Err(e) => {
                buffer_mgr.unpin_page(self.file, self.last_page, false)?;
                return Err(e);
            }
        };
        if let Some(slot_no) = slot {
            let rid = RecordId::new(self.last_page, slot_no);
            buffer_mgr.unpin_page(self.file, self.last_page, true)?;
            return Ok(rid);
        }
        buffer_mgr.unpin_page(self.file, self.last_page, false)?;

        // Tail is full: allocate a fresh page and link it in
        let (new_no, new_buf) = buffer_mgr.alloc_page(self.file)?;
        let slot_no = match HeapPage::format(new_buf, self.record_size) {
            Ok(mut page) => page.insert(record),
            Err(e) => {
                buffer_mgr.unpin_page(self.file, new_no, false)?;
                return Err(e);
            }
        };
        buffer_mgr.unpin_page(self.file, new_no, true)?;
        let slot_no = slot_no.ok_or_else(|| {
            RelationError::Corrupted("freshly formatted heap page is full".to_string())
        })?;

        buffer_mgr.read_page(self.file, self.last_page)?;
        match HeapPage::from_buffer(buffer_mgr.pinned_page_mut(self.file, self.last_page)?) {
            Ok(mut page) => page.set_next_page(new_no),
            Err(e) => {
                buffer_mgr.unpin_page(self.file, self.last_page, false)?;
                return Err(e);
            }
        }
        buffer_mgr.unpin_page(self.file, self.last_page, true)?;

        self.last_page = new_no;
        Ok(RecordId::new(new_no, slot_no))
    }

    /// Copy out the record stored under `rid`
    pub fn record(&self, buffer_mgr: &mut BufferManager, rid: RecordId) -> RelationResult<Vec<u8>> {
        buffer_mgr.read_page(self.file, rid.page_no)?;
        let bytes = match HeapPage::from_buffer(buffer_mgr.pinned_page_mut(self.file, rid.page_no)?)
        {
            Ok(page) => page.record(rid.slot_no).map(<[u8]>::to_vec),
            Err(e) => {
                buffer_mgr.unpin_page(self.file, rid.page_no, false)?;
                return Err(e);
            }
        };
        buffer_mgr.unpin_page(self.file, rid.page_no, false)?;

        bytes.ok_or(RelationError::InvalidSlot {
            page_no: rid.page_no,
            slot_no: rid.slot_no,
        })
    }

    /// Cursor over every live record in page-chain order
    pub fn scan(&self) -> FileScan {
        FileScan {
            file: self.file,
            page_no: self.first_page,
            next_slot: 0,
            done: false,
        }
    }
}

/// Streaming cursor over the records of a heap file.
///
/// `Ok(None)` signals end of relation. Each call pins the page it reads
/// and unpins it before returning, so the caller may freely interleave
/// other buffer manager work (the index builder inserts between calls).
pub struct FileScan {
    file: FileHandle,
    page_no: PageId,
    next_slot: SlotId,
    done: bool,
}

impl FileScan {
    /// Advance to the next record and copy it out
    pub fn next_record(
        &mut self,
        buffer_mgr: &mut BufferManager,
    ) -> RelationResult<Option<(RecordId, Vec<u8>)>> {
        while !self.done {
            buffer_mgr.read_page(self.file, self.page_no)?;
            let outcome =
                match HeapPage::from_buffer(buffer_mgr.pinned_page_mut(self.file, self.page_no)?) {
                    Ok(page) => {
                        let found = (self.next_slot..page.slot_count())
                            .find_map(|s| page.record(s).map(|r| (s, r.to_vec())));
                        Ok((found, page.next_page()))
                    }
                    Err(e) => Err(e),
                };

            match outcome {
                Ok((Some((slot_no, bytes)), _)) => {
                    buffer_mgr.unpin_page(self.file, self.page_no, false)?;
                    let rid = RecordId::new(self.page_no, slot_no);
                    self.next_slot = slot_no + 1;
                    return Ok(Some((rid, bytes)));
                }
                Ok((None, next_page)) => {
                    buffer_mgr.unpin_page(self.file, self.page_no, false)?;
                    if next_page == 0 {
                        self.done = true;
                    } else {
                        self.page_no = next_page;
                        self.next_slot = 0;
                    }
                }
                Err(e) => {
                    buffer_mgr.unpin_page(self.file, self.page_no, false)?;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}
