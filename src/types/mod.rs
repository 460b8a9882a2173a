pub mod error;
pub mod page;
pub mod row;
pub mod value;

// Common type aliases
pub type PageId = u64;
pub type RowId = i64;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 32768; // largest size whose offsets still fit a u16 slot entry
pub const HEADER_SIZE: usize = 100; // Database header size, stored at the start of page 0
pub const PAGE_HEADER_SIZE: usize = 32; // Per-page header

pub const SLOT_DIRECTORY_ENTRY_SIZE: usize = 4; // offset (2 bytes) + length (2 bytes)
pub const CHECKSUM_SIZE: usize = 4; // CRC32 checksum size
pub const OVERFLOW_POINTER_SIZE: usize = 8; // PageId for overflow page

/// Name of the reserved table holding the catalog.
pub const SCHEMA_TABLE_NAME: &str = "lumbung_schema";
/// The catalog B-tree always lives on page 1.
pub const SCHEMA_ROOT_PAGE: PageId = 1;
