//! Range-scan state machine.
//!
//! A scan is idle, positioned, or exhausted. While positioned it holds
//! exactly one leaf page pinned and a decoded copy of that leaf; every
//! other state holds no pins. The low bound is consumed during
//! positioning; the high bound is checked on every candidate entry.

use crate::file::{BufferManager, PageId};
use crate::relation::RecordId;

use super::btree::TypedIndex;
use super::error::{IndexError, IndexResult};
use super::key::IndexKey;
use super::layout::LeafNode;

/// Comparison operator for a range-scan bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

/// In-flight range scan over one index
pub(crate) struct RangeScan<K> {
    high: K,
    high_op: ScanOp,
    pos: ScanPos<K>,
}

enum ScanPos<K> {
    /// Sitting on a candidate entry; `page_no` is pinned
    Positioned {
        page_no: PageId,
        next_entry: usize,
        leaf: LeafNode<K>,
    },
    /// Past the last matching entry; nothing pinned
    Exhausted,
}

impl<K: IndexKey> TypedIndex<K> {
    /// Position at the first leaf entry satisfying the low predicate.
    /// Any scan already in progress is ended first.
    pub(crate) fn start_scan(
        &mut self,
        buffer_mgr: &mut BufferManager,
        low: K,
        low_op: ScanOp,
        high: K,
        high_op: ScanOp,
    ) -> IndexResult<()> {
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte)
            || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(IndexError::BadOpcodes);
        }
        if low > high {
            return Err(IndexError::BadScanrange);
        }
        if self.scan.is_some() {
            self.end_scan(buffer_mgr)?;
        }

        let meta = self.read_meta(buffer_mgr)?;
        let first_leaf = if meta.root_is_leaf {
            meta.root_page_no
        } else {
            self.descend_for_scan(buffer_mgr, meta.root_page_no, &low)?
        };

        let mut page_no = first_leaf;
        loop {
            let leaf = self.read_leaf_keep_pinned(buffer_mgr, page_no)?;
            let start = match low_op {
                ScanOp::Gte => leaf.keys.partition_point(|k| *k < low),
                _ => leaf.keys.partition_point(|k| *k <= low),
            };
            if start < leaf.slot() {
                self.scan = Some(RangeScan {
                    high,
                    high_op,
                    pos: ScanPos::Positioned {
                        page_no,
                        next_entry: start,
                        leaf,
                    },
                });
                return Ok(());
            }

            // Nothing qualifies in this leaf; follow the sibling chain
            let next = leaf.right_sib;
            buffer_mgr.unpin_page(self.file, page_no, false)?;
            if next == 0 {
                self.scan = Some(RangeScan {
                    high,
                    high_op,
                    pos: ScanPos::Exhausted,
                });
                return Ok(());
            }
            page_no = next;
        }
    }

    /// Emit the next record id in range.
    ///
    /// Fails `ScanNotInitialized` when no scan is open and
    /// `IndexScanCompleted` (repeatably) once the range is exhausted.
    pub(crate) fn scan_next(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<RecordId> {
        let file = self.file;
        let occupancy = self.leaf_occupancy;
        let scan = self.scan.as_mut().ok_or(IndexError::ScanNotInitialized)?;

        // Take the position out; every early exit below leaves the scan
        // exhausted with no pin outstanding
        let (mut page_no, mut next_entry, mut leaf) =
            match std::mem::replace(&mut scan.pos, ScanPos::Exhausted) {
                ScanPos::Exhausted => return Err(IndexError::IndexScanCompleted),
                ScanPos::Positioned {
                    page_no,
                    next_entry,
                    leaf,
                } => (page_no, next_entry, leaf),
            };

        loop {
            if next_entry >= leaf.slot() {
                let next = leaf.right_sib;
                buffer_mgr.unpin_page(file, page_no, false)?;
                if next == 0 {
                    return Err(IndexError::IndexScanCompleted);
                }
                let page = buffer_mgr.read_page(file, next)?;
                leaf = match LeafNode::read_from(page, occupancy) {
                    Ok(leaf) => leaf,
                    Err(e) => {
                        buffer_mgr.unpin_page(file, next, false)?;
                        return Err(e);
                    }
                };
                page_no = next;
                next_entry = 0;
                continue;
            }

            let key = leaf.keys[next_entry];
            let within_high = match scan.high_op {
                ScanOp::Lt => key < scan.high,
                _ => key <= scan.high,
            };
            if !within_high {
                buffer_mgr.unpin_page(file, page_no, false)?;
                return Err(IndexError::IndexScanCompleted);
            }

            let rid = leaf.rids[next_entry];
            scan.pos = ScanPos::Positioned {
                page_no,
                next_entry: next_entry + 1,
                leaf,
            };
            return Ok(rid);
        }
    }

    /// Release the held leaf (if any) and return to idle
    pub(crate) fn end_scan(&mut self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        let scan = self.scan.take().ok_or(IndexError::ScanNotInitialized)?;
        if let ScanPos::Positioned { page_no, .. } = scan.pos {
            buffer_mgr.unpin_page(self.file, page_no, false)?;
        }
        Ok(())
    }

    /// Descend to the leftmost leaf that can hold `low`.
    ///
    /// Routes equality left (unlike the insertion descent): duplicates of
    /// a promoted separator live in the left sibling, and the positioning
    /// loop walks the sibling chain forward from wherever this lands.
    fn descend_for_scan(
        &self,
        buffer_mgr: &mut BufferManager,
        root_no: PageId,
        low: &K,
    ) -> IndexResult<PageId> {
        let mut page_no = root_no;
        loop {
            let node = self.read_nonleaf(buffer_mgr, page_no)?;
            let child = node.child_for_scan(low);
            if node.level == 1 {
                return Ok(child);
            }
            page_no = child;
        }
    }

    /// Pin and decode a leaf, releasing the pin only if decoding fails
    fn read_leaf_keep_pinned(
        &self,
        buffer_mgr: &mut BufferManager,
        page_no: PageId,
    ) -> IndexResult<LeafNode<K>> {
        let page = buffer_mgr.read_page(self.file, page_no)?;
        match LeafNode::read_from(page, self.leaf_occupancy) {
            Ok(leaf) => Ok(leaf),
            Err(e) => {
                buffer_mgr.unpin_page(self.file, page_no, false)?;
                Err(e)
            }
        }
    }
}
