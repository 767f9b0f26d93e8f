use lru::LruCache;
use std::num::NonZeroUsize;

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    file: FileHandle,
    page_no: PageId,
}

/// Entry in the buffer pool
struct BufferEntry {
    /// The actual page data
    data: Vec<u8>,
    /// Whether this page has been modified
    dirty: bool,
    /// Number of outstanding pins; a pinned page is never evicted
    pins: u32,
}

/// Buffer pool with LRU eviction and explicit page pinning.
///
/// Callers pin a page with `read_page`/`alloc_page`, access it through
/// `pinned_page`/`pinned_page_mut` while the pin is held, and release it
/// with `unpin_page`, declaring at that point whether the page was
/// modified. Every pin taken inside one logical operation must be
/// released before the operation returns.
pub struct BufferManager {
    /// Underlying file manager
    file_manager: PagedFileManager,
    /// Combined buffer pool and LRU tracker: one structure for both
    /// storage and eviction policy
    buffer_pool: LruCache<BufferKey, BufferEntry>,
    /// Maximum size of the buffer pool
    max_pool_size: usize,
    /// Reusable buffer for loading pages (avoids allocation on every load)
    load_buffer: Vec<u8>,
}

impl BufferManager {
    /// Create a new buffer manager
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    /// Create a new buffer manager with specified capacity
    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            buffer_pool: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            max_pool_size: capacity,
            load_buffer: vec![0u8; PAGE_SIZE],
        }
    }

    /// Get a reference to the file manager
    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    /// Get a mutable reference to the file manager
    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    /// Pin a page and return its bytes, loading it from disk if necessary.
    /// The caller owns one pin and must release it with `unpin_page`.
    pub fn read_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<&[u8]> {
        let key = BufferKey { file, page_no };

        if self.buffer_pool.peek(&key).is_none() {
            self.load_page(file, page_no)?;
        }

        let entry = self.buffer_pool.get_mut(&key).unwrap();
        entry.pins += 1;
        Ok(&entry.data)
    }

    /// Allocate a new page in the file. The page comes back zeroed,
    /// pinned once, and already marked dirty.
    pub fn alloc_page(&mut self, file: FileHandle) -> FileResult<(PageId, &mut [u8])> {
        while self.buffer_pool.len() >= self.max_pool_size {
            self.evict_one()?;
        }

        let page_no = self.file_manager.allocate_page(file)?;
        let key = BufferKey { file, page_no };

        let mut data = std::mem::take(&mut self.load_buffer);
        data.resize(PAGE_SIZE, 0);
        data.fill(0);

        self.buffer_pool.put(
            key,
            BufferEntry {
                data,
                dirty: true,
                pins: 1,
            },
        );

        let entry = self.buffer_pool.get_mut(&key).unwrap();
        Ok((page_no, &mut entry.data))
    }

    /// Access the bytes of a page that is currently pinned
    pub fn pinned_page(&self, file: FileHandle, page_no: PageId) -> FileResult<&[u8]> {
        let key = BufferKey { file, page_no };
        match self.buffer_pool.peek(&key) {
            Some(entry) if entry.pins > 0 => Ok(&entry.data),
            _ => Err(FileError::PageNotPinned(page_no)),
        }
    }

    /// Mutable access to the bytes of a page that is currently pinned.
    /// Dirtiness is declared at unpin time, not here.
    pub fn pinned_page_mut(&mut self, file: FileHandle, page_no: PageId) -> FileResult<&mut [u8]> {
        let key = BufferKey { file, page_no };
        match self.buffer_pool.peek_mut(&key) {
            Some(entry) if entry.pins > 0 => Ok(&mut entry.data),
            _ => Err(FileError::PageNotPinned(page_no)),
        }
    }

    /// Release one pin on a page. `dirty == true` records that the page
    /// bytes changed and must eventually reach disk.
    pub fn unpin_page(&mut self, file: FileHandle, page_no: PageId, dirty: bool) -> FileResult<()> {
        let key = BufferKey { file, page_no };

        let entry = self
            .buffer_pool
            .peek_mut(&key)
            .ok_or(FileError::PageNotPinned(page_no))?;

        if entry.pins == 0 {
            return Err(FileError::PageNotPinned(page_no));
        }

        entry.pins -= 1;
        entry.dirty |= dirty;
        Ok(())
    }

    /// Write every dirty, unpinned page of the file and sync it
    pub fn flush_file(&mut self, file: FileHandle) -> FileResult<()> {
        let mut dirty_pages = Vec::new();

        for (key, entry) in self.buffer_pool.iter() {
            if key.file == file && entry.dirty && entry.pins == 0 {
                dirty_pages.push(*key);
            }
        }

        for key in dirty_pages {
            if let Some(entry) = self.buffer_pool.peek_mut(&key)
                && entry.dirty
            {
                self.file_manager
                    .write_page(key.file, key.page_no, &entry.data)?;
                entry.dirty = false;
            }
        }

        self.file_manager.sync_file(file)?;
        Ok(())
    }

    /// Flush all dirty, unpinned pages of every open file
    pub fn flush_all(&mut self) -> FileResult<()> {
        let mut dirty_pages = Vec::new();

        for (key, entry) in self.buffer_pool.iter() {
            if entry.dirty && entry.pins == 0 {
                dirty_pages.push(*key);
            }
        }

        for key in dirty_pages {
            if let Some(entry) = self.buffer_pool.peek_mut(&key)
                && entry.dirty
            {
                self.file_manager
                    .write_page(key.file, key.page_no, &entry.data)?;
                entry.dirty = false;
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Free a page: drop it from the pool and return its number to the
    /// file's free list. The page must not be pinned.
    pub fn delete_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_no };

        if let Some(entry) = self.buffer_pool.peek(&key) {
            if entry.pins > 0 {
                return Err(FileError::PagePinned(page_no));
            }
            self.buffer_pool.pop(&key);
        }

        self.file_manager.free_page(file, page_no)
    }

    /// Total pins currently held on pages of the file
    pub fn pin_count(&self, file: FileHandle) -> usize {
        self.buffer_pool
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(_, entry)| entry.pins as usize)
            .sum()
    }

    /// Get the number of pages currently in the buffer pool
    pub fn buffer_pool_size(&self) -> usize {
        self.buffer_pool.len()
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, file: FileHandle, page_no: PageId) -> bool {
        self.buffer_pool.contains(&BufferKey { file, page_no })
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.buffer_pool.iter().filter(|(_, e)| e.dirty).count()
    }

    /// Load a page from disk into the buffer pool (unpinned, clean)
    fn load_page(&mut self, file: FileHandle, page_no: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_no };

        while self.buffer_pool.len() >= self.max_pool_size {
            self.evict_one()?;
        }

        if self.load_buffer.len() != PAGE_SIZE {
            self.load_buffer = vec![0u8; PAGE_SIZE];
        }

        self.file_manager
            .read_page(file, page_no, &mut self.load_buffer)?;

        // Move the loaded data into the pool without copying
        let data = std::mem::take(&mut self.load_buffer);

        self.buffer_pool.put(
            key,
            BufferEntry {
                data,
                dirty: false,
                pins: 0,
            },
        );

        Ok(())
    }

    /// Evict the least recently used unpinned page from the buffer pool
    fn evict_one(&mut self) -> FileResult<()> {
        let mut pinned = Vec::new();
        let mut victim = None;

        while let Some((key, entry)) = self.buffer_pool.pop_lru() {
            if entry.pins > 0 {
                pinned.push((key, entry));
            } else {
                victim = Some((key, entry));
                break;
            }
        }

        // Pinned frames go back; their LRU position is irrelevant while
        // they cannot be evicted anyway
        for (key, entry) in pinned {
            self.buffer_pool.put(key, entry);
        }

        match victim {
            Some((key, entry)) => {
                if entry.dirty {
                    self.file_manager
                        .write_page(key.file, key.page_no, &entry.data)?;
                }
                // Recycle the evicted buffer for future page loads
                self.load_buffer = entry.data;
                Ok(())
            }
            None => Err(FileError::BufferPoolFull),
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        // Flush all dirty pages when the buffer manager is dropped
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_env() -> (TempDir, BufferManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let buffer_manager = BufferManager::new(file_manager);

        (temp_dir, buffer_manager, handle)
    }

    #[test]
    fn test_read_page_pins() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let page = bm.read_page(handle, 1).unwrap();
        assert!(page.iter().all(|&b| b == 0));
        assert_eq!(bm.pin_count(handle), 1);

        bm.unpin_page(handle, 1, false).unwrap();
        assert_eq!(bm.pin_count(handle), 0);
    }

    #[test]
    fn test_alloc_page_pinned_and_dirty() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, data) = bm.alloc_page(handle).unwrap();
        assert_eq!(page_no, 1);
        data[0] = 42;

        assert_eq!(bm.pin_count(handle), 1);
        assert_eq!(bm.dirty_page_count(), 1);

        bm.unpin_page(handle, page_no, true).unwrap();
        bm.flush_file(handle).unwrap();

        // Re-read through the pool and verify the byte survived the flush
        let page = bm.read_page(handle, page_no).unwrap();
        assert_eq!(page[0], 42);
        bm.unpin_page(handle, page_no, false).unwrap();
    }

    #[test]
    fn test_pinned_page_access() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        assert!(matches!(
            bm.pinned_page(handle, 1),
            Err(FileError::PageNotPinned(1))
        ));

        bm.read_page(handle, 1).unwrap();
        bm.pinned_page_mut(handle, 1).unwrap()[7] = 9;
        assert_eq!(bm.pinned_page(handle, 1).unwrap()[7], 9);
        bm.unpin_page(handle, 1, true).unwrap();

        assert!(matches!(
            bm.pinned_page(handle, 1),
            Err(FileError::PageNotPinned(1))
        ));
    }

    #[test]
    fn test_unpin_without_pin_fails() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        assert!(matches!(
            bm.unpin_page(handle, 1, false),
            Err(FileError::PageNotPinned(1))
        ));

        bm.read_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1, false).unwrap();
        assert!(matches!(
            bm.unpin_page(handle, 1, false),
            Err(FileError::PageNotPinned(1))
        ));
    }

    #[test]
    fn test_dirty_at_unpin_reaches_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        {
            let mut bm = BufferManager::new(file_manager);
            let (page_no, data) = bm.alloc_page(handle).unwrap();
            data[0] = 88;
            bm.unpin_page(handle, page_no, true).unwrap();
            // bm drops here and flushes
        }

        let mut file_manager = PagedFileManager::new();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::new(file_manager);
        let page = bm.read_page(handle, 1).unwrap();
        assert_eq!(page[0], 88);
        bm.unpin_page(handle, 1, false).unwrap();
    }

    #[test]
    fn test_eviction_skips_pinned_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 3);

        // Pin page 1, fill the rest of the pool with unpinned pages
        bm.read_page(handle, 1).unwrap();
        bm.read_page(handle, 2).unwrap();
        bm.unpin_page(handle, 2, false).unwrap();
        bm.read_page(handle, 3).unwrap();
        bm.unpin_page(handle, 3, false).unwrap();

        // Loading a fourth page must evict an unpinned one, never page 1
        bm.read_page(handle, 4).unwrap();
        bm.unpin_page(handle, 4, false).unwrap();
        assert!(bm.is_page_cached(handle, 1));
        assert_eq!(bm.buffer_pool_size(), 3);

        bm.unpin_page(handle, 1, false).unwrap();
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 2);

        bm.read_page(handle, 1).unwrap();
        bm.read_page(handle, 2).unwrap();

        let result = bm.read_page(handle, 3);
        assert!(matches!(result, Err(FileError::BufferPoolFull)));

        bm.unpin_page(handle, 1, false).unwrap();
        bm.unpin_page(handle, 2, false).unwrap();
        assert!(bm.read_page(handle, 3).is_ok());
        bm.unpin_page(handle, 3, false).unwrap();
    }

    #[test]
    fn test_delete_page() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let (page_no, _) = bm.alloc_page(handle).unwrap();

        assert!(matches!(
            bm.delete_page(handle, page_no),
            Err(FileError::PagePinned(_))
        ));

        bm.unpin_page(handle, page_no, false).unwrap();
        bm.delete_page(handle, page_no).unwrap();
        assert!(!bm.is_page_cached(handle, page_no));

        // The freed number is handed out again
        let (reused, _) = bm.alloc_page(handle).unwrap();
        assert_eq!(reused, page_no);
        bm.unpin_page(handle, reused, false).unwrap();
    }

    #[test]
    fn test_flush_file_only_touches_that_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file1 = temp_dir.path().join("test1.db");
        let file2 = temp_dir.path().join("test2.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&file1).unwrap();
        file_manager.create_file(&file2).unwrap();
        let handle1 = file_manager.open_file(&file1).unwrap();
        let handle2 = file_manager.open_file(&file2).unwrap();

        let mut bm = BufferManager::new(file_manager);

        let (p1, d1) = bm.alloc_page(handle1).unwrap();
        d1[0] = 11;
        bm.unpin_page(handle1, p1, true).unwrap();

        let (p2, d2) = bm.alloc_page(handle2).unwrap();
        d2[0] = 22;
        bm.unpin_page(handle2, p2, true).unwrap();

        assert_eq!(bm.dirty_page_count(), 2);
        bm.flush_file(handle1).unwrap();
        assert_eq!(bm.dirty_page_count(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        let mut bm = BufferManager::with_capacity(file_manager, 3);

        for page_no in 1..=3 {
            bm.read_page(handle, page_no).unwrap();
            bm.unpin_page(handle, page_no, false).unwrap();
        }

        // Touch page 1 so page 2 becomes LRU
        bm.read_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1, false).unwrap();

        bm.read_page(handle, 4).unwrap();
        bm.unpin_page(handle, 4, false).unwrap();

        assert!(bm.is_page_cached(handle, 1));
        assert!(!bm.is_page_cached(handle, 2));
        assert!(bm.is_page_cached(handle, 3));
        assert!(bm.is_page_cached(handle, 4));
    }
}
