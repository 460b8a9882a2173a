use crc32fast::Hasher;

use crate::types::{CHECKSUM_SIZE, page::OFFSET_CHECKSUM};

/// CRC32 over a full page image, skipping the checksum field itself.
pub fn calculate_page_checksum(page: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page[..OFFSET_CHECKSUM]);
    hasher.update(&page[OFFSET_CHECKSUM + CHECKSUM_SIZE..]);
    hasher.finalize()
}

pub fn read_stored_checksum(page: &[u8]) -> u32 {
    let mut raw = [0u8; CHECKSUM_SIZE];
    raw.copy_from_slice(&page[OFFSET_CHECKSUM..OFFSET_CHECKSUM + CHECKSUM_SIZE]);
    u32::from_le_bytes(raw)
}

/// CRC32 of a journal record: the page id followed by the page image.
pub fn calculate_record_checksum(page_id: u64, image: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page_id.to_be_bytes());
    hasher.update(image);
    hasher.finalize()
}

pub fn calculate_checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
