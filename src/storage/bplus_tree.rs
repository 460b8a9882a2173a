use std::{cmp::Ordering, ops::Bound};

use crate::{
    storage::storage_manager::StorageManager,
    types::{
        OVERFLOW_POINTER_SIZE, PAGE_HEADER_SIZE, PageId, RowId, SLOT_DIRECTORY_ENTRY_SIZE,
        error::DatabaseError,
        page::{Page, PageType},
    },
};

/*
 * Table B+tree keyed by rowid. The root page never moves.
 *
 * Leaf cell:     key(8) | payload_len(4) | has_overflow(1) | local payload | [overflow page(8)]
 * Interior cell: key(8) | child(8)     child holds keys <= key
 *
 * An interior page's right pointer is the child for keys greater than its
 * last key. A leaf's right pointer is the next leaf in key order.
 */
const LEAF_CELL_HEADER_SIZE: usize = 13;
const INTERIOR_CELL_SIZE: usize = 16;
const MAX_TREE_DEPTH: usize = 64;

/// Largest payload kept inside a leaf cell; the rest spills to overflow pages.
pub fn max_local_payload(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE) / 4
        - LEAF_CELL_HEADER_SIZE
        - OVERFLOW_POINTER_SIZE
        - SLOT_DIRECTORY_ENTRY_SIZE
}

fn overflow_chunk_size(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - SLOT_DIRECTORY_ENTRY_SIZE
}

struct LeafCell<'a> {
    key: RowId,
    payload_len: usize,
    local: &'a [u8],
    overflow: Option<PageId>,
}

fn corrupted(page_id: PageId, reason: impl Into<String>) -> DatabaseError {
    DatabaseError::CorruptedPage {
        page_id,
        reason: reason.into(),
    }
}

fn leaf_key(page_id: PageId, cell: &[u8]) -> Result<RowId, DatabaseError> {
    let raw: [u8; 8] = cell
        .get(0..8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| corrupted(page_id, "cell too short for a key"))?;
    Ok(RowId::from_le_bytes(raw))
}

fn decode_leaf_cell(page_id: PageId, cell: &[u8]) -> Result<LeafCell<'_>, DatabaseError> {
    if cell.len() < LEAF_CELL_HEADER_SIZE {
        return Err(corrupted(page_id, "leaf cell shorter than its header"));
    }
    let key = leaf_key(page_id, cell)?;
    let payload_len = u32::from_le_bytes([cell[8], cell[9], cell[10], cell[11]]) as usize;
    match cell[12] {
        0 => Ok(LeafCell {
            key,
            payload_len,
            local: &cell[LEAF_CELL_HEADER_SIZE..],
            overflow: None,
        }),
        1 => {
            let split = cell
                .len()
                .checked_sub(OVERFLOW_POINTER_SIZE)
                .filter(|&at| at >= LEAF_CELL_HEADER_SIZE)
                .ok_or_else(|| corrupted(page_id, "overflow cell without a pointer"))?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&cell[split..]);
            Ok(LeafCell {
                key,
                payload_len,
                local: &cell[LEAF_CELL_HEADER_SIZE..split],
                overflow: Some(u64::from_le_bytes(raw)),
            })
        }
        flag => Err(corrupted(page_id, format!("bad overflow flag {}", flag))),
    }
}

/// Binary search over a leaf page: `Ok(slot)` when found, `Err(insert_at)` otherwise.
fn search_cells(page: &Page, key: RowId) -> Result<Result<usize, usize>, DatabaseError> {
    let (mut lo, mut hi) = (0, page.cell_count());
    while lo < hi {
        let mid = (lo + hi) / 2;
        let cell = page
            .get_cell(mid)
            .ok_or_else(|| corrupted(page.page_id, format!("missing slot {}", mid)))?;
        match leaf_key(page.page_id, cell)?.cmp(&key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(lo))
}

/// Index splitting `cells` into two halves of roughly equal byte size.
fn split_point(cells: &[Vec<u8>]) -> usize {
    let half = Page::space_needed(cells) / 2;
    let mut acc = 0;
    for (i, cell) in cells.iter().enumerate() {
        let size = cell.len() + SLOT_DIRECTORY_ENTRY_SIZE;
        if i > 0 && acc + size > half {
            return i.min(cells.len() - 1);
        }
        acc += size;
    }
    (cells.len() / 2).max(1)
}

#[derive(Debug, Clone)]
struct InteriorNode {
    entries: Vec<(RowId, PageId)>,
    right: PageId,
}

impl InteriorNode {
    fn decode(page: &Page) -> Result<Self, DatabaseError> {
        let right = page
            .right_pointer
            .ok_or_else(|| corrupted(page.page_id, "interior page without a right child"))?;
        let mut entries = Vec::with_capacity(page.cell_count());
        for cell in page.cells() {
            if cell.len() != INTERIOR_CELL_SIZE {
                return Err(corrupted(page.page_id, "interior cell has the wrong size"));
            }
            let key = leaf_key(page.page_id, cell)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&cell[8..16]);
            entries.push((key, u64::from_le_bytes(raw)));
        }
        Ok(Self { entries, right })
    }

    fn encode_into(&self, page: &mut Page) -> Result<(), DatabaseError> {
        let cells: Vec<Vec<u8>> = self
            .entries
            .iter()
            .map(|(key, child)| {
                let mut cell = Vec::with_capacity(INTERIOR_CELL_SIZE);
                cell.extend_from_slice(&key.to_le_bytes());
                cell.extend_from_slice(&child.to_le_bytes());
                cell
            })
            .collect();
        page.page_type = PageType::InteriorTable;
        page.rebuild(&cells)?;
        page.right_pointer = Some(self.right);
        Ok(())
    }

    fn fits(entry_count: usize, page_size: usize) -> bool {
        entry_count * (INTERIOR_CELL_SIZE + SLOT_DIRECTORY_ENTRY_SIZE)
            <= page_size - PAGE_HEADER_SIZE
    }

    fn child_index(&self, key: RowId) -> usize {
        self.entries.partition_point(|(k, _)| *k < key)
    }

    fn child_at(&self, index: usize) -> PageId {
        self.entries.get(index).map(|(_, child)| *child).unwrap_or(self.right)
    }

    fn set_child(&mut self, index: usize, child: PageId) {
        match self.entries.get_mut(index) {
            Some(entry) => entry.1 = child,
            None => self.right = child,
        }
    }

    /// Drops the separator between children `index` and `index + 1`, which
    /// were merged into child `index`.
    fn remove_separator(&mut self, index: usize) {
        let (_, merged) = self.entries.remove(index);
        self.set_child(index, merged);
    }
}

struct Split {
    separator: RowId,
    right: PageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BPlusTree {
    root_page_id: PageId,
}

impl BPlusTree {
    pub fn new(root_page_id: PageId) -> Self {
        Self { root_page_id }
    }

    /// Allocates an empty tree.
    pub fn create(storage: &mut StorageManager) -> Result<Self, DatabaseError> {
        let root = storage.allocate_page(PageType::LeafTable)?;
        Ok(Self::new(root))
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    fn find_leaf(&self, storage: &mut StorageManager, key: RowId) -> Result<Page, DatabaseError> {
        let mut page = storage.read_page(self.root_page_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            match page.page_type {
                PageType::LeafTable => return Ok(page),
                PageType::InteriorTable => {
                    let node = InteriorNode::decode(&page)?;
                    page = storage.read_page(node.child_at(node.child_index(key)))?;
                }
                other => {
                    return Err(corrupted(page.page_id, format!("{:?} page inside a tree", other)));
                }
            }
        }
        Err(corrupted(self.root_page_id, "tree deeper than any valid tree"))
    }

    pub fn get(
        &self,
        storage: &mut StorageManager,
        key: RowId,
    ) -> Result<Option<Vec<u8>>, DatabaseError> {
        let leaf = self.find_leaf(storage, key)?;
        match search_cells(&leaf, key)? {
            Ok(slot) => {
                let cell = leaf
                    .get_cell(slot)
                    .ok_or_else(|| corrupted(leaf.page_id, "slot vanished"))?;
                Ok(Some(assemble_payload(storage, leaf.page_id, cell)?))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn contains(
        &self,
        storage: &mut StorageManager,
        key: RowId,
    ) -> Result<bool, DatabaseError> {
        let leaf = self.find_leaf(storage, key)?;
        Ok(search_cells(&leaf, key)?.is_ok())
    }

    /// Cursor positioned on `key`, or `None` when the key is absent.
    pub fn seek(
        &self,
        storage: &mut StorageManager,
        key: RowId,
    ) -> Result<Option<TreeCursor>, DatabaseError> {
        if self.contains(storage, key)? {
            Ok(Some(self.scan_range(Bound::Included(key), Bound::Unbounded)))
        } else {
            Ok(None)
        }
    }

    /// Lazy ascending scan over `low..high`.
    pub fn scan_range(&self, low: Bound<RowId>, high: Bound<RowId>) -> TreeCursor {
        TreeCursor::new(self.root_page_id, low, high)
    }

    pub fn scan(&self) -> TreeCursor {
        self.scan_range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn insert(
        &self,
        storage: &mut StorageManager,
        key: RowId,
        payload: &[u8],
    ) -> Result<(), DatabaseError> {
        if self.contains(storage, key)? {
            return Err(DatabaseError::ConstraintViolation {
                details: format!("duplicate rowid {}", key),
            });
        }
        let cell = build_leaf_cell(storage, key, payload)?;
        if let Some(split) = self.insert_into(storage, self.root_page_id, key, cell, 0)? {
            self.grow_root(storage, split)?;
        }
        Ok(())
    }

    /// Replaces the payload stored under `key`. Returns false when absent.
    pub fn update(
        &self,
        storage: &mut StorageManager,
        key: RowId,
        payload: &[u8],
    ) -> Result<bool, DatabaseError> {
        if !self.delete(storage, key)? {
            return Ok(false);
        }
        self.insert(storage, key, payload)?;
        Ok(true)
    }

    fn insert_into(
        &self,
        storage: &mut StorageManager,
        page_id: PageId,
        key: RowId,
        cell: Vec<u8>,
        depth: usize,
    ) -> Result<Option<Split>, DatabaseError> {
        if depth > MAX_TREE_DEPTH {
            return Err(corrupted(page_id, "tree deeper than any valid tree"));
        }
        let page_size = storage.page_size();
        let mut page = storage.read_page(page_id)?;
        match page.page_type {
            PageType::LeafTable => {
                let position = match search_cells(&page, key)? {
                    Ok(_) => {
                        return Err(DatabaseError::ConstraintViolation {
                            details: format!("duplicate rowid {}", key),
                        });
                    }
                    Err(position) => position,
                };
                if page.can_fit(cell.len()) {
                    page.insert_cell_at(position, &cell)?;
                    storage.write_page(page)?;
                    return Ok(None);
                }

                let mut cells = page.cell_vec();
                cells.insert(position, cell);
                let right_cells = cells.split_off(split_point(&cells));
                let separator = match cells.last() {
                    Some(last) => leaf_key(page_id, last)?,
                    None => return Err(corrupted(page_id, "leaf split produced an empty half")),
                };

                let right_id = storage.allocate_page(PageType::LeafTable)?;
                let mut right = Page::new(right_id, PageType::LeafTable, page_size);
                right.rebuild(&right_cells)?;
                right.right_pointer = page.right_pointer;
                page.rebuild(&cells)?;
                page.right_pointer = Some(right_id);

                storage.write_page(right)?;
                storage.write_page(page)?;
                Ok(Some(Split {
                    separator,
                    right: right_id,
                }))
            }
            PageType::InteriorTable => {
                let mut node = InteriorNode::decode(&page)?;
                let index = node.child_index(key);
                let child = node.child_at(index);
                let Some(split) = self.insert_into(storage, child, key, cell, depth + 1)? else {
                    return Ok(None);
                };

                node.set_child(index, split.right);
                node.entries.insert(index, (split.separator, child));
                if InteriorNode::fits(node.entries.len(), page_size) {
                    node.encode_into(&mut page)?;
                    storage.write_page(page)?;
                    return Ok(None);
                }

                let middle = node.entries.len() / 2;
                let right_entries = node.entries.split_off(middle + 1);
                let Some((separator, middle_child)) = node.entries.pop() else {
                    return Err(corrupted(page_id, "interior split produced an empty half"));
                };
                let left_node = InteriorNode {
                    entries: node.entries,
                    right: middle_child,
                };
                let right_node = InteriorNode {
                    entries: right_entries,
                    right: node.right,
                };

                let right_id = storage.allocate_page(PageType::InteriorTable)?;
                let mut right = Page::new(right_id, PageType::InteriorTable, page_size);
                right_node.encode_into(&mut right)?;
                left_node.encode_into(&mut page)?;

                storage.write_page(right)?;
                storage.write_page(page)?;
                Ok(Some(Split {
                    separator,
                    right: right_id,
                }))
            }
            other => Err(corrupted(page_id, format!("{:?} page inside a tree", other))),
        }
    }

    /// The root split: its content moves to a new left child and the root
    /// becomes an interior page over the two halves.
    fn grow_root(&self, storage: &mut StorageManager, split: Split) -> Result<(), DatabaseError> {
        let root = storage.read_page(self.root_page_id)?;
        let left_id = storage.allocate_page(root.page_type)?;
        let mut left = root;
        left.page_id = left_id;
        storage.write_page(left)?;

        let mut new_root =
            Page::new(self.root_page_id, PageType::InteriorTable, storage.page_size());
        InteriorNode {
            entries: vec![(split.separator, left_id)],
            right: split.right,
        }
        .encode_into(&mut new_root)?;
        storage.write_page(new_root)
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&self, storage: &mut StorageManager, key: RowId) -> Result<bool, DatabaseError> {
        let removed = self.delete_from(storage, self.root_page_id, key, 0)?;
        if removed {
            self.collapse_root(storage)?;
        }
        Ok(removed)
    }

    fn delete_from(
        &self,
        storage: &mut StorageManager,
        page_id: PageId,
        key: RowId,
        depth: usize,
    ) -> Result<bool, DatabaseError> {
        if depth > MAX_TREE_DEPTH {
            return Err(corrupted(page_id, "tree deeper than any valid tree"));
        }
        let mut page = storage.read_page(page_id)?;
        match page.page_type {
            PageType::LeafTable => {
                let Ok(slot) = search_cells(&page, key)? else {
                    return Ok(false);
                };
                let overflow = match page.get_cell(slot) {
                    Some(cell) => decode_leaf_cell(page_id, cell)?.overflow,
                    None => return Err(corrupted(page_id, "slot vanished")),
                };
                if let Some(first) = overflow {
                    free_overflow_chain(storage, first)?;
                }
                page.delete_cell(slot)?;
                storage.write_page(page)?;
                Ok(true)
            }
            PageType::InteriorTable => {
                let mut node = InteriorNode::decode(&page)?;
                let index = node.child_index(key);
                let child = node.child_at(index);
                if !self.delete_from(storage, child, key, depth + 1)? {
                    return Ok(false);
                }
                if node.entries.is_empty() {
                    return Ok(true);
                }
                let child_page = storage.read_page(child)?;
                if child_page.used_space() < storage.min_fill_bytes() {
                    self.rebalance(storage, &mut node, index)?;
                    node.encode_into(&mut page)?;
                    storage.write_page(page)?;
                }
                Ok(true)
            }
            other => Err(corrupted(page_id, format!("{:?} page inside a tree", other))),
        }
    }

    /// Merges the underfull child at `index` with a sibling, or moves cells
    /// across when the pair does not fit on one page.
    fn rebalance(
        &self,
        storage: &mut StorageManager,
        node: &mut InteriorNode,
        index: usize,
    ) -> Result<(), DatabaseError> {
        let left_index = index.saturating_sub(1);
        let left_id = node.child_at(left_index);
        let right_id = node.child_at(left_index + 1);
        let separator = node.entries[left_index].0;
        let page_size = storage.page_size();

        let mut left = storage.read_page(left_id)?;
        let mut right = storage.read_page(right_id)?;

        match (left.page_type, right.page_type) {
            (PageType::LeafTable, PageType::LeafTable) => {
                let mut cells = left.cell_vec();
                cells.extend(right.cell_vec());
                if Page::fits(&cells, page_size) {
                    left.rebuild(&cells)?;
                    left.right_pointer = right.right_pointer;
                    storage.write_page(left)?;
                    storage.free_page(right_id)?;
                    node.remove_separator(left_index);
                } else {
                    let right_cells = cells.split_off(split_point(&cells));
                    let new_separator = match cells.last() {
                        Some(last) => leaf_key(left_id, last)?,
                        None => return Err(corrupted(left_id, "rebalance emptied a leaf")),
                    };
                    left.rebuild(&cells)?;
                    right.rebuild(&right_cells)?;
                    storage.write_page(left)?;
                    storage.write_page(right)?;
                    node.entries[left_index].0 = new_separator;
                }
            }
            (PageType::InteriorTable, PageType::InteriorTable) => {
                let left_node = InteriorNode::decode(&left)?;
                let right_node = InteriorNode::decode(&right)?;
                let mut entries = left_node.entries;
                entries.push((separator, left_node.right));
                entries.extend(right_node.entries);

                if InteriorNode::fits(entries.len(), page_size) {
                    InteriorNode {
                        entries,
                        right: right_node.right,
                    }
                    .encode_into(&mut left)?;
                    storage.write_page(left)?;
                    storage.free_page(right_id)?;
                    node.remove_separator(left_index);
                } else {
                    let middle = entries.len() / 2;
                    let right_entries = entries.split_off(middle + 1);
                    let Some((new_separator, middle_child)) = entries.pop() else {
                        return Err(corrupted(left_id, "rebalance emptied an interior node"));
                    };
                    InteriorNode {
                        entries,
                        right: middle_child,
                    }
                    .encode_into(&mut left)?;
                    InteriorNode {
                        entries: right_entries,
                        right: right_node.right,
                    }
                    .encode_into(&mut right)?;
                    storage.write_page(left)?;
                    storage.write_page(right)?;
                    node.entries[left_index].0 = new_separator;
                }
            }
            _ => {
                return Err(corrupted(
                    left_id,
                    format!("sibling {} sits at a different depth", right_id),
                ));
            }
        }
        Ok(())
    }

    /// An interior root left with a single child absorbs that child.
    fn collapse_root(&self, storage: &mut StorageManager) -> Result<(), DatabaseError> {
        for _ in 0..MAX_TREE_DEPTH {
            let root = storage.read_page(self.root_page_id)?;
            if root.page_type != PageType::InteriorTable {
                return Ok(());
            }
            let node = InteriorNode::decode(&root)?;
            if !node.entries.is_empty() {
                return Ok(());
            }
            let mut promoted = storage.read_page(node.right)?;
            promoted.page_id = self.root_page_id;
            storage.write_page(promoted)?;
            storage.free_page(node.right)?;
        }
        Ok(())
    }

    pub fn max_key(&self, storage: &mut StorageManager) -> Result<Option<RowId>, DatabaseError> {
        let mut page = storage.read_page(self.root_page_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            match page.page_type {
                PageType::InteriorTable => {
                    let node = InteriorNode::decode(&page)?;
                    page = storage.read_page(node.right)?;
                }
                PageType::LeafTable => {
                    return match page.cell_count().checked_sub(1).and_then(|i| page.get_cell(i)) {
                        Some(cell) => Ok(Some(leaf_key(page.page_id, cell)?)),
                        None => self.max_key_by_scan(storage),
                    };
                }
                other => {
                    return Err(corrupted(page.page_id, format!("{:?} page inside a tree", other)));
                }
            }
        }
        Err(corrupted(self.root_page_id, "tree deeper than any valid tree"))
    }

    fn max_key_by_scan(
        &self,
        storage: &mut StorageManager,
    ) -> Result<Option<RowId>, DatabaseError> {
        let mut cursor = self.scan();
        let mut last = None;
        while let Some((key, _)) = cursor.next(storage)? {
            last = Some(key);
        }
        Ok(last)
    }

    /// Rough leaf count: the fan-out product along the leftmost path.
    pub fn estimated_leaf_count(&self, storage: &mut StorageManager) -> Result<u64, DatabaseError> {
        let mut estimate: u64 = 1;
        let mut page = storage.read_page(self.root_page_id)?;
        for _ in 0..MAX_TREE_DEPTH {
            if page.page_type != PageType::InteriorTable {
                break;
            }
            let node = InteriorNode::decode(&page)?;
            estimate = estimate.saturating_mul(node.entries.len() as u64 + 1);
            page = storage.read_page(node.child_at(0))?;
        }
        Ok(estimate)
    }

    /// Every page owned by the tree, overflow chains included.
    pub fn collect_pages(
        &self,
        storage: &mut StorageManager,
        pages: &mut Vec<PageId>,
    ) -> Result<(), DatabaseError> {
        let mut stack = vec![self.root_page_id];
        while let Some(page_id) = stack.pop() {
            if pages.len() as u64 > storage.page_count() {
                return Err(corrupted(page_id, "tree references more pages than the file holds"));
            }
            pages.push(page_id);
            let page = storage.read_page(page_id)?;
            match page.page_type {
                PageType::InteriorTable => {
                    let node = InteriorNode::decode(&page)?;
                    stack.extend(node.entries.iter().map(|(_, child)| *child));
                    stack.push(node.right);
                }
                PageType::LeafTable => {
                    for cell in page.cells() {
                        let mut next = decode_leaf_cell(page_id, cell)?.overflow;
                        while let Some(overflow_id) = next {
                            pages.push(overflow_id);
                            next = storage.read_page(overflow_id)?.right_pointer;
                            if pages.len() as u64 > storage.page_count() {
                                return Err(corrupted(overflow_id, "overflow chain loops"));
                            }
                        }
                    }
                }
                other => {
                    return Err(corrupted(page_id, format!("{:?} page inside a tree", other)));
                }
            }
        }
        Ok(())
    }

    /// Frees every page of the tree, root included.
    pub fn destroy(&self, storage: &mut StorageManager) -> Result<(), DatabaseError> {
        let mut pages = Vec::new();
        self.collect_pages(storage, &mut pages)?;
        for page_id in pages {
            storage.free_page(page_id)?;
        }
        Ok(())
    }
}

fn build_leaf_cell(
    storage: &mut StorageManager,
    key: RowId,
    payload: &[u8],
) -> Result<Vec<u8>, DatabaseError> {
    let max_local = max_local_payload(storage.page_size());
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        DatabaseError::execution(format!("row of {} bytes is too large", payload.len()))
    })?;

    let mut cell = Vec::with_capacity(LEAF_CELL_HEADER_SIZE + payload.len().min(max_local) + 8);
    cell.extend_from_slice(&key.to_le_bytes());
    cell.extend_from_slice(&payload_len.to_le_bytes());
    if payload.len() <= max_local {
        cell.push(0);
        cell.extend_from_slice(payload);
    } else {
        let first = write_overflow_chain(storage, &payload[max_local..])?;
        cell.push(1);
        cell.extend_from_slice(&payload[..max_local]);
        cell.extend_from_slice(&first.to_le_bytes());
    }
    Ok(cell)
}

fn write_overflow_chain(
    storage: &mut StorageManager,
    data: &[u8],
) -> Result<PageId, DatabaseError> {
    let page_size = storage.page_size();
    let chunks: Vec<&[u8]> = data.chunks(overflow_chunk_size(page_size)).collect();
    let ids = chunks
        .iter()
        .map(|_| storage.allocate_page(PageType::Overflow))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, chunk) in chunks.iter().enumerate() {
        let mut page = Page::new(ids[i], PageType::Overflow, page_size);
        page.insert_cell(chunk)?;
        page.right_pointer = ids.get(i + 1).copied();
        storage.write_page(page)?;
    }
    ids.first()
        .copied()
        .ok_or_else(|| DatabaseError::execution("overflow chain for an empty remainder"))
}

fn free_overflow_chain(storage: &mut StorageManager, first: PageId) -> Result<(), DatabaseError> {
    let mut next = Some(first);
    let mut hops = 0u64;
    while let Some(page_id) = next {
        let page = storage.read_page(page_id)?;
        if page.page_type != PageType::Overflow {
            return Err(corrupted(page_id, "overflow chain points at a non-overflow page"));
        }
        next = page.right_pointer;
        storage.free_page(page_id)?;
        hops += 1;
        if hops > storage.page_count() {
            return Err(corrupted(first, "overflow chain loops"));
        }
    }
    Ok(())
}

/// Full payload of a leaf cell, following its overflow chain.
fn assemble_payload(
    storage: &mut StorageManager,
    page_id: PageId,
    cell: &[u8],
) -> Result<Vec<u8>, DatabaseError> {
    let cell = decode_leaf_cell(page_id, cell)?;
    let mut payload = Vec::with_capacity(cell.payload_len);
    payload.extend_from_slice(cell.local);

    let mut next = cell.overflow;
    let mut hops = 0u64;
    while let Some(overflow_id) = next {
        let page = storage.read_page(overflow_id)?;
        if page.page_type != PageType::Overflow {
            return Err(corrupted(overflow_id, "overflow chain points at a non-overflow page"));
        }
        payload.extend_from_slice(page.get_cell(0).unwrap_or_default());
        next = page.right_pointer;
        hops += 1;
        if hops > storage.page_count() {
            return Err(corrupted(page_id, "overflow chain loops"));
        }
    }

    if payload.len() != cell.payload_len {
        return Err(corrupted(
            page_id,
            format!(
                "row {} has {} payload bytes, header says {}",
                cell.key,
                payload.len(),
                cell.payload_len
            ),
        ));
    }
    Ok(payload)
}

enum Advance {
    End,
    Row(RowId, Vec<u8>),
    Leaf(PageId),
}

/// Position within a tree, remembered as the last key returned. When the
/// storage generation moves (a write, a rollback, another handle's commit)
/// the cursor re-seeks past that key instead of trusting its cached leaf.
#[derive(Debug, Clone)]
pub struct TreeCursor {
    root_page_id: PageId,
    low: Bound<RowId>,
    high: Bound<RowId>,
    page: Option<Page>,
    index: usize,
    last_key: Option<RowId>,
    generation: u64,
    exhausted: bool,
}

impl TreeCursor {
    pub fn new(root_page_id: PageId, low: Bound<RowId>, high: Bound<RowId>) -> Self {
        Self {
            root_page_id,
            low,
            high,
            page: None,
            index: 0,
            last_key: None,
            generation: 0,
            exhausted: false,
        }
    }

    pub fn last_key(&self) -> Option<RowId> {
        self.last_key
    }

    /// Back to the start of the range.
    pub fn reset(&mut self) {
        self.page = None;
        self.index = 0;
        self.last_key = None;
        self.exhausted = false;
    }

    pub fn next(
        &mut self,
        storage: &mut StorageManager,
    ) -> Result<Option<(RowId, Vec<u8>)>, DatabaseError> {
        if self.exhausted {
            return Ok(None);
        }
        if self.page.is_none() || self.generation != storage.generation() {
            self.reposition(storage)?;
        }

        loop {
            let advance = match self.page.as_ref() {
                None => Advance::End,
                Some(page) if self.index < page.cell_count() => {
                    let cell = page
                        .get_cell(self.index)
                        .ok_or_else(|| corrupted(page.page_id, "slot vanished"))?;
                    let key = leaf_key(page.page_id, cell)?;
                    let beyond = match self.high {
                        Bound::Unbounded => false,
                        Bound::Included(high) => key > high,
                        Bound::Excluded(high) => key >= high,
                    };
                    if beyond {
                        Advance::End
                    } else {
                        Advance::Row(key, assemble_payload(storage, page.page_id, cell)?)
                    }
                }
                Some(page) => match page.right_pointer {
                    Some(next) => Advance::Leaf(next),
                    None => Advance::End,
                },
            };

            match advance {
                Advance::End => {
                    self.exhausted = true;
                    self.page = None;
                    return Ok(None);
                }
                Advance::Row(key, payload) => {
                    self.index += 1;
                    self.last_key = Some(key);
                    return Ok(Some((key, payload)));
                }
                Advance::Leaf(next) => {
                    self.page = Some(storage.read_page(next)?);
                    self.index = 0;
                }
            }
        }
    }

    fn reposition(&mut self, storage: &mut StorageManager) -> Result<(), DatabaseError> {
        let start = match self.last_key {
            Some(key) => Bound::Excluded(key),
            None => self.low,
        };

        let mut page = storage.read_page(self.root_page_id)?;
        let mut depth = 0;
        while page.page_type == PageType::InteriorTable {
            let node = InteriorNode::decode(&page)?;
            let child = match start {
                Bound::Unbounded => node.child_at(0),
                Bound::Included(key) | Bound::Excluded(key) => node.child_at(node.child_index(key)),
            };
            page = storage.read_page(child)?;
            depth += 1;
            if depth > MAX_TREE_DEPTH {
                return Err(corrupted(self.root_page_id, "tree deeper than any valid tree"));
            }
        }
        if page.page_type != PageType::LeafTable {
            return Err(corrupted(page.page_id, format!("{:?} page inside a tree", page.page_type)));
        }

        self.index = match start {
            Bound::Unbounded => 0,
            Bound::Included(key) => match search_cells(&page, key)? {
                Ok(slot) | Err(slot) => slot,
            },
            Bound::Excluded(key) => match search_cells(&page, key)? {
                Ok(slot) => slot + 1,
                Err(slot) => slot,
            },
        };
        self.page = Some(page);
        self.generation = storage.generation();
        Ok(())
    }
}
