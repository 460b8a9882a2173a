use crate::{
    types::{PAGE_HEADER_SIZE, PageId, SLOT_DIRECTORY_ENTRY_SIZE, error::DatabaseError},
    utils::hash::{calculate_page_checksum, read_stored_checksum},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Free = 1,
    Overflow = 3,
    InteriorTable = 5,
    LeafTable = 13,
}

impl PageType {
    pub fn from_u8(value: u8) -> Result<Self, DatabaseError> {
        match value {
            1 => Ok(PageType::Free),
            3 => Ok(PageType::Overflow),
            5 => Ok(PageType::InteriorTable),
            13 => Ok(PageType::LeafTable),
            _ => Err(DatabaseError::InvalidPageType(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: u16, // Offset from beginning of page
    pub length: u16, // Length of the cell
}

/*
 * Page Layout on Disk (Slotted Page Structure)
 * ┌─────────────────────────────────────────────────────────────────┐
 * │                    PAGE HEADER (32 bytes)                       │
 * │  page_type(1) | reserved(1) | cell_count(2) |                   │
 * │  free_space_offset(2) | reserved(2) | page_id(8) |              │
 * │  right_pointer(8) | checksum(4) | reserved(4)                   │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                  SLOT DIRECTORY                                 │
 * │  [slot0: offset(2)|len(2)] [slot1: offset(2)|len(2)] ...        │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                    FREE SPACE                                   │
 * ├─────────────────────────────────────────────────────────────────┤
 * │                   CELL DATA                                     │
 * │  [...cell N...] [...cell 2...] [...cell 1...] [...cell 0...]    │
 * └─────────────────────────────────────────────────────────────────┘
 *
 * right_pointer is the next leaf for leaf pages, the rightmost child for
 * interior pages, the next chunk for overflow pages and the next free page
 * for free pages. u64::MAX encodes "none".
 */

const OFFSET_PAGE_TYPE: usize = 0;
const OFFSET_CELL_COUNT: usize = 2;
const OFFSET_FREE_SPACE: usize = 4;
const OFFSET_PAGE_ID: usize = 8;
const OFFSET_RIGHT_POINTER: usize = 16;
pub const OFFSET_CHECKSUM: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page_id: PageId,
    pub page_type: PageType,
    pub right_pointer: Option<PageId>,
    pub is_dirty: bool,

    // Slotted page structure
    pub slots: Vec<SlotEntry>,
    pub free_space_offset: u16,

    // Data storage, the full page image
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(page_id: PageId, page_type: PageType, page_size: usize) -> Self {
        Self {
            page_id,
            page_type,
            right_pointer: None,
            is_dirty: true,
            slots: Vec::new(),
            free_space_offset: page_size as u16,
            data: vec![0; page_size],
        }
    }

    pub fn page_size(&self) -> usize {
        self.data.len()
    }

    pub fn cell_count(&self) -> usize {
        self.slots.len()
    }

    /// Serialize the page to bytes following the documented layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = self.data.clone();
        buffer[..PAGE_HEADER_SIZE].fill(0);

        buffer[OFFSET_PAGE_TYPE] = self.page_type.as_u8();
        buffer[OFFSET_CELL_COUNT..OFFSET_CELL_COUNT + 2]
            .copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        buffer[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 2]
            .copy_from_slice(&self.free_space_offset.to_le_bytes());
        buffer[OFFSET_PAGE_ID..OFFSET_PAGE_ID + 8].copy_from_slice(&self.page_id.to_le_bytes());
        let right = self.right_pointer.unwrap_or(u64::MAX);
        buffer[OFFSET_RIGHT_POINTER..OFFSET_RIGHT_POINTER + 8]
            .copy_from_slice(&right.to_le_bytes());

        let mut offset = PAGE_HEADER_SIZE;
        for slot in &self.slots {
            buffer[offset..offset + 2].copy_from_slice(&slot.offset.to_le_bytes());
            buffer[offset + 2..offset + 4].copy_from_slice(&slot.length.to_le_bytes());
            offset += SLOT_DIRECTORY_ENTRY_SIZE;
        }
        // Clear the gap between the slot directory and the cell area
        let gap_end = (self.free_space_offset as usize).max(offset);
        buffer[offset..gap_end].fill(0);

        let checksum = calculate_page_checksum(&buffer);
        buffer[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
        buffer
    }

    /// Deserialize a page, verifying checksum and structure.
    pub fn from_bytes(bytes: &[u8], expected_id: PageId) -> Result<Self, DatabaseError> {
        let page_size = bytes.len();
        let corrupted = |reason: String| DatabaseError::CorruptedPage {
            page_id: expected_id,
            reason,
        };

        if page_size < PAGE_HEADER_SIZE {
            return Err(corrupted(format!("page image of {} bytes is too short", page_size)));
        }

        let stored = read_stored_checksum(bytes);
        let computed = calculate_page_checksum(bytes);
        if stored != computed {
            return Err(corrupted(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }

        let page_type = PageType::from_u8(bytes[OFFSET_PAGE_TYPE])
            .map_err(|_| corrupted(format!("unknown page type {}", bytes[OFFSET_PAGE_TYPE])))?;
        let cell_count = read_u16(bytes, OFFSET_CELL_COUNT) as usize;
        let free_space_offset = read_u16(bytes, OFFSET_FREE_SPACE);
        let page_id = read_u64(bytes, OFFSET_PAGE_ID);
        let right_raw = read_u64(bytes, OFFSET_RIGHT_POINTER);

        if page_id != expected_id {
            return Err(corrupted(format!("page claims id {}", page_id)));
        }

        let slot_end = PAGE_HEADER_SIZE + cell_count * SLOT_DIRECTORY_ENTRY_SIZE;
        if slot_end > free_space_offset as usize || free_space_offset as usize > page_size {
            return Err(corrupted(format!(
                "slot directory ({} cells) overlaps cell area at {}",
                cell_count, free_space_offset
            )));
        }

        let mut slots = Vec::with_capacity(cell_count);
        for i in 0..cell_count {
            let at = PAGE_HEADER_SIZE + i * SLOT_DIRECTORY_ENTRY_SIZE;
            let slot = SlotEntry {
                offset: read_u16(bytes, at),
                length: read_u16(bytes, at + 2),
            };
            if (slot.offset as usize) < free_space_offset as usize
                || slot.offset as usize + slot.length as usize > page_size
            {
                return Err(corrupted(format!(
                    "Slot {} at offset {} with length {} exceeds cell area",
                    i, slot.offset, slot.length
                )));
            }
            slots.push(slot);
        }

        Ok(Page {
            page_id,
            page_type,
            right_pointer: (right_raw != u64::MAX).then_some(right_raw),
            is_dirty: false,
            slots,
            free_space_offset,
            data: bytes.to_vec(),
        })
    }

    pub fn available_space(&self) -> usize {
        let slot_directory_size = self.slots.len() * SLOT_DIRECTORY_ENTRY_SIZE;
        (self.free_space_offset as usize).saturating_sub(PAGE_HEADER_SIZE + slot_directory_size)
    }

    /// Bytes taken by cells and their slots; the fill-factor measure.
    pub fn used_space(&self) -> usize {
        self.slots.len() * SLOT_DIRECTORY_ENTRY_SIZE
            + (self.page_size() - self.free_space_offset as usize)
    }

    pub fn can_fit(&self, data_size: usize) -> bool {
        self.available_space() >= data_size + SLOT_DIRECTORY_ENTRY_SIZE
    }

    /// Whether `cells` laid out fresh would fit on a page of `page_size`.
    pub fn fits(cells: &[Vec<u8>], page_size: usize) -> bool {
        Self::space_needed(cells) <= page_size - PAGE_HEADER_SIZE
    }

    pub fn space_needed(cells: &[Vec<u8>]) -> usize {
        cells
            .iter()
            .map(|c| c.len() + SLOT_DIRECTORY_ENTRY_SIZE)
            .sum()
    }

    /// Appends a cell, returning its slot index.
    pub fn insert_cell(&mut self, data: &[u8]) -> Result<usize, DatabaseError> {
        let index = self.slots.len();
        self.insert_cell_at(index, data)?;
        Ok(index)
    }

    /// Inserts a cell so that it becomes slot `index`.
    pub fn insert_cell_at(&mut self, index: usize, data: &[u8]) -> Result<(), DatabaseError> {
        if index > self.slots.len() {
            return Err(DatabaseError::execution(format!(
                "slot index {} out of range (max {})",
                index,
                self.slots.len()
            )));
        }
        if !self.can_fit(data.len()) {
            return Err(DatabaseError::PageFull {
                page_id: self.page_id,
            });
        }

        // Cells grow downward from the end of the page
        let new_offset = self.free_space_offset - data.len() as u16;
        let start = new_offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);

        self.slots.insert(
            index,
            SlotEntry {
                offset: new_offset,
                length: data.len() as u16,
            },
        );
        self.free_space_offset = new_offset;
        self.is_dirty = true;
        Ok(())
    }

    pub fn get_cell(&self, slot_index: usize) -> Option<&[u8]> {
        let slot = self.slots.get(slot_index)?;
        let start = slot.offset as usize;
        self.data.get(start..start + slot.length as usize)
    }

    pub fn cells(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.slots.len()).filter_map(move |i| self.get_cell(i))
    }

    /// Owned copies of every cell in slot order.
    pub fn cell_vec(&self) -> Vec<Vec<u8>> {
        self.cells().map(<[u8]>::to_vec).collect()
    }

    pub fn delete_cell(&mut self, slot_index: usize) -> Result<(), DatabaseError> {
        if slot_index >= self.slots.len() {
            return Err(DatabaseError::execution(format!(
                "Invalid slot index {} (max: {})",
                slot_index,
                self.slots.len()
            )));
        }
        let mut cells = self.cell_vec();
        cells.remove(slot_index);
        self.rebuild(&cells)
    }

    /// Empties the cell area; type and right pointer stay.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_space_offset = self.page_size() as u16;
        self.data.fill(0);
        self.is_dirty = true;
    }

    /// Rewrites the page to hold exactly `cells`, compacting as a side effect.
    pub fn rebuild(&mut self, cells: &[Vec<u8>]) -> Result<(), DatabaseError> {
        if !Self::fits(cells, self.page_size()) {
            return Err(DatabaseError::PageFull {
                page_id: self.page_id,
            });
        }
        self.clear();
        for cell in cells {
            self.insert_cell(cell)?;
        }
        Ok(())
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
