//! Build driver and insertion engine for one key domain.
//!
//! All tree state lives on disk pages; the engine re-reads the header on
//! every operation, decodes nodes into owned structs while their page is
//! pinned, and releases every pin before a public call returns. Splits
//! propagate up the ancestor path remembered during descent, so promotion
//! finds parents deterministically even across root growth.

use std::path::Path;

use crate::file::{BufferManager, FileError, FileHandle, PageId};
use crate::relation::{HeapFile, RecordId};

use super::error::{IndexError, IndexResult};
use super::key::IndexKey;
use super::layout::{
    HEADER_PAGE_NO, IndexMetaInfo, LeafNode, NonLeafNode, max_leaf_occupancy, max_node_occupancy,
};
use super::scan::RangeScan;

/// One key domain's view of an index file
pub(crate) struct TypedIndex<K: IndexKey> {
    pub(crate) file: FileHandle,
    pub(crate) index_name: String,
    pub(crate) leaf_occupancy: usize,
    pub(crate) node_occupancy: usize,
    pub(crate) scan: Option<RangeScan<K>>,
}

impl<K: IndexKey> TypedIndex<K> {
    /// Open (or build) with the page-fit occupancies for this key width
    pub(crate) fn open(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
    ) -> IndexResult<Self> {
        Self::open_with_occupancy(
            buffer_mgr,
            relation_path,
            attr_byte_offset,
            max_leaf_occupancy(K::WIDTH),
            max_node_occupancy(K::WIDTH),
        )
    }

    /// Open (or build) with explicit occupancies. An existing index must
    /// be reopened with the occupancies it was built with; the header
    /// records only the key domain.
    pub(crate) fn open_with_occupancy(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> IndexResult<Self> {
        if leaf_occupancy < 2 || leaf_occupancy > max_leaf_occupancy(K::WIDTH) {
            return Err(IndexError::InvalidOccupancy(leaf_occupancy));
        }
        if node_occupancy < 2 || node_occupancy > max_node_occupancy(K::WIDTH) {
            return Err(IndexError::InvalidOccupancy(node_occupancy));
        }
        if !Path::new(relation_path).exists() {
            return Err(FileError::FileNotFound(relation_path.to_string()).into());
        }

        let index_name = format!("{relation_path}.{attr_byte_offset}");
        if Path::new(&index_name).exists() {
            Self::open_existing(
                buffer_mgr,
                relation_path,
                attr_byte_offset,
                index_name,
                leaf_occupancy,
                node_occupancy,
            )
        } else {
            Self::build(
                buffer_mgr,
                relation_path,
                attr_byte_offset,
                index_name,
                leaf_occupancy,
                node_occupancy,
            )
        }
    }

    /// Reopen a persisted index; never rebuilds
    fn open_existing(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
        index_name: String,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> IndexResult<Self> {
        let file = buffer_mgr.file_manager_mut().open_file(&index_name)?;
        let index = Self {
            file,
            index_name,
            leaf_occupancy,
            node_occupancy,
            scan: None,
        };

        let meta = index.read_meta(buffer_mgr)?;
        if !meta.matches(relation_path, attr_byte_offset, K::KEY_TYPE) {
            return Err(IndexError::BadIndexInfo(index.index_name.clone()));
        }

        Ok(index)
    }

    /// Create the index file, initialize header and empty root leaf, then
    /// stream the relation and insert one entry per record
    fn build(
        buffer_mgr: &mut BufferManager,
        relation_path: &str,
        attr_byte_offset: usize,
        index_name: String,
        leaf_occupancy: usize,
        node_occupancy: usize,
    ) -> IndexResult<Self> {
        buffer_mgr.file_manager_mut().create_file(&index_name)?;
        let file = buffer_mgr.file_manager_mut().open_file(&index_name)?;

        let (header_no, _) = buffer_mgr.alloc_page(file)?;
        debug_assert_eq!(header_no, HEADER_PAGE_NO);
        let (root_no, root_page) = buffer_mgr.alloc_page(file)?;
        LeafNode::<K>::empty().write_to(root_page, leaf_occupancy);
        buffer_mgr.unpin_page(file, root_no, true)?;

        let meta = IndexMetaInfo::new(relation_path, attr_byte_offset, K::KEY_TYPE, root_no, true);
        meta.write_to(buffer_mgr.pinned_page_mut(file, header_no)?);
        buffer_mgr.unpin_page(file, header_no, true)?;

        let index = Self {
            file,
            index_name,
            leaf_occupancy,
            node_occupancy,
            scan: None,
        };

        let heap = HeapFile::open(buffer_mgr, relation_path)?;
        let mut records = heap.scan();
        while let Some((rid, record)) = records.next_record(buffer_mgr)? {
            let key = K::from_record(&record, attr_byte_offset)?;
            index.insert_entry(buffer_mgr, key, rid)?;
        }

        Ok(index)
    }

    pub(crate) fn index_name(&self) -> &str {
        &self.index_name
    }

    pub(crate) fn file_handle(&self) -> FileHandle {
        self.file
    }

    /// Flush the index file and release the handle. The file stays on
    /// disk; a later open finds a ready index through the header page.
    pub(crate) fn close(mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        if self.scan.is_some() {
            self.end_scan(buffer_mgr)?;
        }
        buffer_mgr.flush_file(self.file)?;
        buffer_mgr.file_manager_mut().close_file(self.file)?;
        Ok(())
    }

    /// Insert one (key, record id) entry
    pub(crate) fn insert_entry(
        &self,
        buffer_mgr: &mut BufferManager,
        key: K,
        rid: RecordId,
    ) -> IndexResult<()> {
        let meta = self.read_meta(buffer_mgr)?;
        if meta.root_is_leaf {
            self.insert_into_leaf(buffer_mgr, meta.root_page_no, &[], key, rid)
        } else {
            let (leaf_no, path) = self.descend_to_leaf(buffer_mgr, meta.root_page_no, &key)?;
            self.insert_into_leaf(buffer_mgr, leaf_no, &path, key, rid)
        }
    }

    /// Walk from the root non-leaf to the leaf covering `key`, recording
    /// the page number of every non-leaf on the way down
    fn descend_to_leaf(
        &self,
        buffer_mgr: &mut BufferManager,
        root_no: PageId,
        key: &K,
    ) -> IndexResult<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut page_no = root_no;
        loop {
            let node = self.read_nonleaf(buffer_mgr, page_no)?;
            path.push(page_no);
            let child = node.child_for(key);
            if node.level == 1 {
                return Ok((child, path));
            }
            page_no = child;
        }
    }

    fn insert_into_leaf(
        &self,
        buffer_mgr: &mut BufferManager,
        leaf_no: PageId,
        path: &[PageId],
        key: K,
        rid: RecordId,
    ) -> IndexResult<()> {
        let mut leaf = self.read_leaf(buffer_mgr, leaf_no)?;
        if leaf.slot() < self.leaf_occupancy {
            leaf.insert_sorted(key, rid);
            self.write_leaf(buffer_mgr, leaf_no, &leaf)
        } else {
            self.split_leaf(buffer_mgr, leaf_no, leaf, path, key, rid)
        }
    }

    /// Split a full leaf: the upper half moves to a fresh right sibling,
    /// the sibling chain is relinked, and the right sibling's first key
    /// is promoted to the parent
    fn split_leaf(
        &self,
        buffer_mgr: &mut BufferManager,
        leaf_no: PageId,
        mut left: LeafNode<K>,
        path: &[PageId],
        key: K,
        rid: RecordId,
    ) -> IndexResult<()> {
        let (new_no, new_page) = buffer_mgr.alloc_page(self.file)?;

        let mid = self.leaf_occupancy / 2;
        let mut right = LeafNode {
            keys: left.keys.split_off(mid),
            rids: left.rids.split_off(mid),
            right_sib: left.right_sib,
        };
        left.right_sib = new_no;

        if key < right.keys[0] {
            left.insert_sorted(key, rid);
        } else {
            right.insert_sorted(key, rid);
        }
        let sep = right.keys[0];

        right.write_to(new_page, self.leaf_occupancy);
        buffer_mgr.unpin_page(self.file, new_no, true)?;
        self.write_leaf(buffer_mgr, leaf_no, &left)?;

        match path.split_last() {
            None => self.grow_root(buffer_mgr, leaf_no, sep, new_no, 1),
            Some((&parent_no, above)) => {
                self.insert_into_nonleaf(buffer_mgr, parent_no, above, sep, new_no)
            }
        }
    }

    /// Insert a promoted (separator, child) pair into a non-leaf;
    /// `above` is the rest of the ancestor path
    fn insert_into_nonleaf(
        &self,
        buffer_mgr: &mut BufferManager,
        node_no: PageId,
        above: &[PageId],
        key: K,
        child: PageId,
    ) -> IndexResult<()> {
        let mut node = self.read_nonleaf(buffer_mgr, node_no)?;
        if node.slot() < self.node_occupancy {
            node.insert_separator(key, child);
            self.write_nonleaf(buffer_mgr, node_no, &node)
        } else {
            self.split_nonleaf(buffer_mgr, node_no, node, above, key, child)
        }
    }

    /// Split a full non-leaf. The middle key becomes the promoted
    /// separator and is copied into neither half.
    fn split_nonleaf(
        &self,
        buffer_mgr: &mut BufferManager,
        node_no: PageId,
        mut left: NonLeafNode<K>,
        above: &[PageId],
        key: K,
        child: PageId,
    ) -> IndexResult<()> {
        let (new_no, new_page) = buffer_mgr.alloc_page(self.file)?;

        let mid = self.node_occupancy / 2;
        let sep = left.keys[mid];
        let mut right = NonLeafNode {
            level: left.level,
            keys: left.keys.split_off(mid + 1),
            children: left.children.split_off(mid + 1),
        };
        left.keys.truncate(mid);

        if key < sep {
            left.insert_separator(key, child);
        } else {
            right.insert_separator(key, child);
        }

        right.write_to(new_page, self.node_occupancy);
        buffer_mgr.unpin_page(self.file, new_no, true)?;
        self.write_nonleaf(buffer_mgr, node_no, &left)?;

        match above.split_last() {
            None => self.grow_root(buffer_mgr, node_no, sep, new_no, left.level + 1),
            Some((&parent_no, rest)) => {
                self.insert_into_nonleaf(buffer_mgr, parent_no, rest, sep, new_no)
            }
        }
    }

    /// Allocate a new root above a split old root and repoint the header
    fn grow_root(
        &self,
        buffer_mgr: &mut BufferManager,
        left_no: PageId,
        sep: K,
        right_no: PageId,
        level: u32,
    ) -> IndexResult<()> {
        let (root_no, root_page) = buffer_mgr.alloc_page(self.file)?;
        let root = NonLeafNode {
            level,
            keys: vec![sep],
            children: vec![left_no, right_no],
        };
        root.write_to(root_page, self.node_occupancy);
        buffer_mgr.unpin_page(self.file, root_no, true)?;

        let mut meta = self.read_meta(buffer_mgr)?;
        meta.root_page_no = root_no;
        meta.root_is_leaf = false;
        self.write_meta(buffer_mgr, &meta)
    }

    /// Pin the header page, decode it, unpin clean
    pub(crate) fn read_meta(&self, buffer_mgr: &mut BufferManager) -> IndexResult<IndexMetaInfo> {
        let page = buffer_mgr.read_page(self.file, HEADER_PAGE_NO)?;
        let meta = IndexMetaInfo::read_from(page);
        buffer_mgr.unpin_page(self.file, HEADER_PAGE_NO, false)?;
        meta
    }

    /// Pin the header page, overwrite it, unpin dirty
    fn write_meta(&self, buffer_mgr: &mut BufferManager, meta: &IndexMetaInfo) -> IndexResult<()> {
        buffer_mgr.read_page(self.file, HEADER_PAGE_NO)?;
        meta.write_to(buffer_mgr.pinned_page_mut(self.file, HEADER_PAGE_NO)?);
        buffer_mgr.unpin_page(self.file, HEADER_PAGE_NO, true)?;
        Ok(())
    }

    fn read_leaf(&self, buffer_mgr: &mut BufferManager, page_no: PageId) -> IndexResult<LeafNode<K>> {
        let page = buffer_mgr.read_page(self.file, page_no)?;
        let node = LeafNode::read_from(page, self.leaf_occupancy);
        buffer_mgr.unpin_page(self.file, page_no, false)?;
        node
    }

    fn write_leaf(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: PageId,
        node: &LeafNode<K>,
    ) -> IndexResult<()> {
        buffer_mgr.read_page(self.file, page_no)?;
        node.write_to(
            buffer_mgr.pinned_page_mut(self.file, page_no)?,
            self.leaf_occupancy,
        );
        buffer_mgr.unpin_page(self.file, page_no, true)?;
        Ok(())
    }

    pub(crate) fn read_nonleaf(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: PageId,
    ) -> IndexResult<NonLeafNode<K>> {
        let page = buffer_mgr.read_page(self.file, page_no)?;
        let node = NonLeafNode::read_from(page, self.node_occupancy);
        buffer_mgr.unpin_page(self.file, page_no, false)?;
        node
    }

    fn write_nonleaf(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: PageId,
        node: &NonLeafNode<K>,
    ) -> IndexResult<()> {
        buffer_mgr.read_page(self.file, page_no)?;
        node.write_to(
            buffer_mgr.pinned_page_mut(self.file, page_no)?,
            self.node_occupancy,
        );
        buffer_mgr.unpin_page(self.file, page_no, true)?;
        Ok(())
    }
}
