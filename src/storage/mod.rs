pub mod bplus_tree;
pub mod header;
pub mod journal;
pub mod lock;
pub mod schema;
pub mod storage_manager;

const LUMBUNG_MAGIC: &[u8; 16] = b"LUMBUNG DB v1\0\0\0";
const FORMAT_VERSION: u8 = 1;
