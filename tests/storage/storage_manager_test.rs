use std::fs;

use lumbung::{
    config::StorageConfig,
    storage::storage_manager::StorageManager,
    types::{
        DEFAULT_PAGE_SIZE, SCHEMA_ROOT_PAGE,
        error::DatabaseError,
        page::{Page, PageType},
    },
    utils::mock::TempDatabase,
};

fn write_cell(storage: &mut StorageManager, page_id: u64, cell: &[u8]) {
    let mut page = storage.read_page(page_id).unwrap();
    page.insert_cell(cell).unwrap();
    storage.write_page(page).unwrap();
}

#[test]
fn test_new_database_layout() {
    let mut temp_db = TempDatabase::with_prefix("sm_layout");
    let storage = temp_db.create_storage_manager().unwrap();

    assert_eq!(storage.page_size(), DEFAULT_PAGE_SIZE);
    assert_eq!(storage.page_count(), 2);
    assert_eq!(storage.schema_root(), SCHEMA_ROOT_PAGE);
    assert!(!storage.has_pending_changes());

    let catalog = storage.read_page(SCHEMA_ROOT_PAGE).unwrap();
    assert_eq!(catalog.page_type, PageType::LeafTable);
    assert_eq!(catalog.cell_count(), 0);

    let len = fs::metadata(temp_db.path()).unwrap().len();
    assert_eq!(len, 2 * DEFAULT_PAGE_SIZE as u64);
}

#[test]
fn test_flushed_pages_survive_reopen() {
    let mut temp_db = TempDatabase::with_prefix("sm_reopen");
    let page_id = {
        let storage = temp_db.create_storage_manager().unwrap();
        let page_id = storage.allocate_page(PageType::LeafTable).unwrap();
        write_cell(storage, page_id, b"persisted");
        assert!(storage.has_pending_changes());
        storage.flush().unwrap();
        assert!(!storage.has_pending_changes());
        page_id
    };
    temp_db.close_storage_manager();

    let storage = temp_db.create_storage_manager().unwrap();
    assert_eq!(storage.page_count(), 3);
    let page = storage.read_page(page_id).unwrap();
    assert_eq!(page.get_cell(0), Some(&b"persisted"[..]));
}

#[test]
fn test_rollback_discards_writes_and_allocations() {
    let mut temp_db = TempDatabase::with_prefix("sm_rollback");
    let storage = temp_db.create_storage_manager().unwrap();

    write_cell(storage, SCHEMA_ROOT_PAGE, b"uncommitted");
    storage.allocate_page(PageType::LeafTable).unwrap();
    assert_eq!(storage.page_count(), 3);

    storage.rollback();
    assert_eq!(storage.page_count(), 2);
    assert!(!storage.has_pending_changes());
    assert_eq!(storage.read_page(SCHEMA_ROOT_PAGE).unwrap().cell_count(), 0);
    assert!(storage.read_page(2).is_err());
}

#[test]
fn test_savepoint_restores_partial_state() {
    let mut temp_db = TempDatabase::with_prefix("sm_savepoint");
    let storage = temp_db.create_storage_manager().unwrap();

    write_cell(storage, SCHEMA_ROOT_PAGE, b"kept");
    let savepoint = storage.savepoint();
    write_cell(storage, SCHEMA_ROOT_PAGE, b"undone");
    storage.allocate_page(PageType::LeafTable).unwrap();

    storage.rollback_to(savepoint);
    let page = storage.read_page(SCHEMA_ROOT_PAGE).unwrap();
    assert_eq!(page.cell_vec(), vec![b"kept".to_vec()]);
    assert_eq!(storage.page_count(), 2);
    assert!(storage.has_pending_changes());
}

#[test]
fn test_free_list_reuses_pages() {
    let mut temp_db = TempDatabase::with_prefix("sm_freelist");
    let storage = temp_db.create_storage_manager().unwrap();

    let a = storage.allocate_page(PageType::LeafTable).unwrap();
    let b = storage.allocate_page(PageType::LeafTable).unwrap();
    storage.flush().unwrap();

    storage.free_page(a).unwrap();
    storage.free_page(b).unwrap();
    assert_eq!(storage.freelist_pages().unwrap(), vec![b, a]);
    storage.flush().unwrap();

    let reused = storage.allocate_page(PageType::InteriorTable).unwrap();
    assert_eq!(reused, b);
    assert_eq!(storage.read_page(reused).unwrap().page_type, PageType::InteriorTable);
    assert_eq!(storage.freelist_pages().unwrap(), vec![a]);
    assert_eq!(storage.page_count(), 4);
}

#[test]
fn test_reserved_pages_cannot_be_freed() {
    let mut temp_db = TempDatabase::with_prefix("sm_reserved");
    let storage = temp_db.create_storage_manager().unwrap();
    assert!(storage.free_page(0).is_err());
    assert!(storage.free_page(SCHEMA_ROOT_PAGE).is_err());
}

#[test]
fn test_out_of_range_pages_are_rejected() {
    let mut temp_db = TempDatabase::with_prefix("sm_range");
    let storage = temp_db.create_storage_manager().unwrap();

    assert!(matches!(
        storage.read_page(0),
        Err(DatabaseError::CorruptedPage { page_id: 0, .. })
    ));
    assert!(matches!(
        storage.read_page(17),
        Err(DatabaseError::CorruptedPage { page_id: 17, .. })
    ));
    let stray = Page::new(17, PageType::LeafTable, DEFAULT_PAGE_SIZE);
    assert!(storage.write_page(stray).is_err());
}

#[test]
fn test_wrong_sized_page_is_rejected() {
    let mut temp_db = TempDatabase::with_prefix("sm_size");
    let storage = temp_db.create_storage_manager().unwrap();
    let page = Page::new(SCHEMA_ROOT_PAGE, PageType::LeafTable, 1024);
    assert!(storage.write_page(page).is_err());
}

#[test]
fn test_page_size_comes_from_existing_file() {
    let temp_db = TempDatabase::with_prefix("sm_page_size");
    let config = StorageConfig::default().with_page_size(8192);
    {
        let storage = StorageManager::open(temp_db.path(), &config).unwrap();
        assert_eq!(storage.page_size(), 8192);
    }
    let storage = StorageManager::new(temp_db.path()).unwrap();
    assert_eq!(storage.page_size(), 8192);
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_db = TempDatabase::with_prefix("sm_bad_config");
    let config = StorageConfig::default().with_page_size(1000);
    let err = StorageManager::open(temp_db.path(), &config).err().unwrap();
    assert!(matches!(err, DatabaseError::InvalidConfig { .. }));
}

#[test]
fn test_foreign_file_is_rejected() {
    let temp_db = TempDatabase::with_prefix("sm_foreign");
    fs::write(temp_db.path(), vec![0x42u8; 8192]).unwrap();
    let err = StorageManager::new(temp_db.path()).err().unwrap();
    assert!(matches!(err, DatabaseError::InvalidHeader { .. }));
}

#[test]
fn test_truncated_file_is_corruption() {
    let temp_db = TempDatabase::with_prefix("sm_truncated");
    {
        let mut storage = StorageManager::new(temp_db.path()).unwrap();
        storage.allocate_page(PageType::LeafTable).unwrap();
        storage.flush().unwrap();
    }
    let file = fs::OpenOptions::new().write(true).open(temp_db.path()).unwrap();
    file.set_len(2 * DEFAULT_PAGE_SIZE as u64).unwrap();
    drop(file);

    let err = StorageManager::new(temp_db.path()).err().unwrap();
    assert!(matches!(err, DatabaseError::Corruption { .. }));
}

#[test]
fn test_refresh_sees_commits_of_other_handles() {
    let temp_db = TempDatabase::with_prefix("sm_refresh");
    let mut writer = StorageManager::new(temp_db.path()).unwrap();
    let mut reader = StorageManager::new(temp_db.path()).unwrap();
    assert_eq!(reader.read_page(SCHEMA_ROOT_PAGE).unwrap().cell_count(), 0);

    write_cell(&mut writer, SCHEMA_ROOT_PAGE, b"news");
    writer.flush().unwrap();

    let before = reader.generation();
    assert!(reader.refresh_if_changed().unwrap());
    assert!(reader.generation() > before);
    assert_eq!(reader.read_page(SCHEMA_ROOT_PAGE).unwrap().cell_count(), 1);
    assert!(!reader.refresh_if_changed().unwrap());
}

#[test]
fn test_schema_cookie_is_committed_with_header() {
    let temp_db = TempDatabase::with_prefix("sm_cookie");
    {
        let mut storage = StorageManager::new(temp_db.path()).unwrap();
        assert_eq!(storage.schema_cookie(), 0);
        storage.bump_schema_cookie();
        assert!(storage.has_pending_changes());
        storage.flush().unwrap();
    }
    let storage = StorageManager::new(temp_db.path()).unwrap();
    assert_eq!(storage.schema_cookie(), 1);
}
