use crate::{
    storage::{LUMBUNG_MAGIC, FORMAT_VERSION},
    types::{
        HEADER_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageId, SCHEMA_ROOT_PAGE,
        error::DatabaseError,
    },
    utils::hash::calculate_checksum,
};

/*
 * Database header, big-endian, at the start of page 0
 * ┌──────────────────────────────────────────────────────────┐
 * │ magic(16) | write_version(1) | read_version(1) | pad(2)  │
 * │ page_size(4) | change_counter(4) | page_count(8)         │
 * │ schema_root(8) | freelist_head(8) | freelist_count(8)    │
 * │ schema_cookie(4) | user_version(4) | reserved(24)        │
 * │ checksum(4) over bytes 0..96                             │
 * └──────────────────────────────────────────────────────────┘
 */
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub magic: [u8; 16],
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub page_size: u32,
    pub change_counter: u32,
    /// Number of pages in the file, page 0 included.
    pub page_count: u64,
    pub schema_root: PageId,
    /// First page of the free list, 0 when the list is empty.
    pub freelist_head: PageId,
    pub freelist_count: u64,
    pub schema_cookie: u32,
    pub user_version: u32,
}

impl DatabaseHeader {
    pub fn new(page_size: usize) -> Self {
        Self {
            magic: *LUMBUNG_MAGIC,
            file_format_write_version: FORMAT_VERSION,
            file_format_read_version: FORMAT_VERSION,
            page_size: page_size as u32,
            change_counter: 0,
            page_count: SCHEMA_ROOT_PAGE + 1,
            schema_root: SCHEMA_ROOT_PAGE,
            freelist_head: 0,
            freelist_count: 0,
            schema_cookie: 0,
            user_version: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE);

        buffer.extend_from_slice(&self.magic);
        buffer.push(self.file_format_write_version);
        buffer.push(self.file_format_read_version);
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.page_size.to_be_bytes());
        buffer.extend_from_slice(&self.change_counter.to_be_bytes());
        buffer.extend_from_slice(&self.page_count.to_be_bytes());
        buffer.extend_from_slice(&self.schema_root.to_be_bytes());
        buffer.extend_from_slice(&self.freelist_head.to_be_bytes());
        buffer.extend_from_slice(&self.freelist_count.to_be_bytes());
        buffer.extend_from_slice(&self.schema_cookie.to_be_bytes());
        buffer.extend_from_slice(&self.user_version.to_be_bytes());

        buffer.resize(CHECKSUM_OFFSET, 0);
        let checksum = calculate_checksum(&buffer);
        buffer.extend_from_slice(&checksum.to_be_bytes());
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DatabaseError::InvalidHeader {
                reason: "Header too short".to_string(),
            });
        }

        let mut magic = [0u8; 16];
        magic.copy_from_slice(&bytes[0..16]);
        if &magic != LUMBUNG_MAGIC {
            return Err(DatabaseError::InvalidHeader {
                reason: "Invalid lumbung magic number".to_string(),
            });
        }

        let stored = u32::from_be_bytes(be_array(bytes, CHECKSUM_OFFSET));
        if stored != calculate_checksum(&bytes[..CHECKSUM_OFFSET]) {
            return Err(DatabaseError::InvalidHeader {
                reason: "header checksum mismatch".to_string(),
            });
        }

        let file_format_write_version = bytes[16];
        let file_format_read_version = bytes[17];
        if file_format_read_version > FORMAT_VERSION {
            return Err(DatabaseError::InvalidHeader {
                reason: format!("Unsupported file format version {}", file_format_read_version),
            });
        }

        let page_size = u32::from_be_bytes(be_array(bytes, 20));
        let size = page_size as usize;
        if !size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
            return Err(DatabaseError::InvalidHeader {
                reason: format!("Unsupported page size: {}", page_size),
            });
        }

        let header = Self {
            magic,
            file_format_write_version,
            file_format_read_version,
            page_size,
            change_counter: u32::from_be_bytes(be_array(bytes, 24)),
            page_count: u64::from_be_bytes(be_array(bytes, 28)),
            schema_root: u64::from_be_bytes(be_array(bytes, 36)),
            freelist_head: u64::from_be_bytes(be_array(bytes, 44)),
            freelist_count: u64::from_be_bytes(be_array(bytes, 52)),
            schema_cookie: u32::from_be_bytes(be_array(bytes, 60)),
            user_version: u32::from_be_bytes(be_array(bytes, 64)),
        };

        if header.schema_root == 0 || header.schema_root >= header.page_count {
            return Err(DatabaseError::InvalidHeader {
                reason: format!(
                    "schema root {} outside of {} pages",
                    header.schema_root, header.page_count
                ),
            });
        }
        if header.freelist_head >= header.page_count {
            return Err(DatabaseError::InvalidHeader {
                reason: format!(
                    "free list head {} is past the end of the file",
                    header.freelist_head
                ),
            });
        }

        Ok(header)
    }
}

fn be_array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[at..at + N]);
    raw
}
