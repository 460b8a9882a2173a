use lumbung::types::{
    DEFAULT_PAGE_SIZE, PAGE_HEADER_SIZE, SLOT_DIRECTORY_ENTRY_SIZE,
    error::DatabaseError,
    page::{Page, PageType},
};

fn leaf(page_id: u64) -> Page {
    Page::new(page_id, PageType::LeafTable, DEFAULT_PAGE_SIZE)
}

#[test]
fn test_new_page_is_empty() {
    let page = leaf(3);
    assert_eq!(page.cell_count(), 0);
    assert_eq!(page.page_size(), DEFAULT_PAGE_SIZE);
    assert_eq!(page.available_space(), DEFAULT_PAGE_SIZE - PAGE_HEADER_SIZE);
    assert_eq!(page.used_space(), 0);
    assert!(page.is_dirty);
}

#[test]
fn test_page_type_codes() {
    for page_type in [
        PageType::Free,
        PageType::Overflow,
        PageType::InteriorTable,
        PageType::LeafTable,
    ] {
        assert_eq!(PageType::from_u8(page_type.as_u8()).unwrap(), page_type);
    }
    assert!(matches!(
        PageType::from_u8(2),
        Err(DatabaseError::InvalidPageType(2))
    ));
}

#[test]
fn test_cells_keep_slot_order() {
    let mut page = leaf(1);
    page.insert_cell(b"first").unwrap();
    page.insert_cell(b"third").unwrap();
    page.insert_cell_at(1, b"second").unwrap();

    let cells: Vec<&[u8]> = page.cells().collect();
    assert_eq!(cells, vec![&b"first"[..], &b"second"[..], &b"third"[..]]);
    assert_eq!(page.get_cell(3), None);

    let used = 16 + 3 * SLOT_DIRECTORY_ENTRY_SIZE;
    assert_eq!(page.used_space(), used);
    assert!(page.insert_cell_at(5, b"x").is_err());
}

#[test]
fn test_delete_cell_compacts() {
    let mut page = leaf(1);
    for cell in [&b"aa"[..], b"bbb", b"c"] {
        page.insert_cell(cell).unwrap();
    }
    let before = page.available_space();
    page.delete_cell(1).unwrap();

    assert_eq!(page.cell_vec(), vec![b"aa".to_vec(), b"c".to_vec()]);
    assert_eq!(page.available_space(), before + 3 + SLOT_DIRECTORY_ENTRY_SIZE);
    assert!(page.delete_cell(2).is_err());
}

#[test]
fn test_full_page_rejects_cell() {
    let mut page = leaf(2);
    let cell = vec![7u8; 1000];
    while page.can_fit(cell.len()) {
        page.insert_cell(&cell).unwrap();
    }
    let err = page.insert_cell(&cell).unwrap_err();
    assert!(matches!(err, DatabaseError::PageFull { page_id: 2 }));
}

#[test]
fn test_rebuild_rejects_oversized_cell_set() {
    let mut page = leaf(4);
    let cells = vec![vec![1u8; 3000], vec![2u8; 3000]];
    assert!(!Page::fits(&cells, DEFAULT_PAGE_SIZE));
    assert!(page.rebuild(&cells).is_err());

    let small = vec![vec![1u8; 10], vec![2u8; 20]];
    page.rebuild(&small).unwrap();
    assert_eq!(page.cell_vec(), small);
}

#[test]
fn test_serialization_keeps_header_and_cells() {
    let mut page = Page::new(9, PageType::InteriorTable, DEFAULT_PAGE_SIZE);
    page.right_pointer = Some(12);
    page.insert_cell(b"hello").unwrap();
    page.insert_cell(b"world").unwrap();

    let bytes = page.to_bytes();
    assert_eq!(bytes.len(), DEFAULT_PAGE_SIZE);

    let decoded = Page::from_bytes(&bytes, 9).unwrap();
    assert_eq!(decoded.page_type, PageType::InteriorTable);
    assert_eq!(decoded.right_pointer, Some(12));
    assert_eq!(decoded.cell_vec(), page.cell_vec());
    assert!(!decoded.is_dirty);
}

#[test]
fn test_missing_right_pointer_survives_serialization() {
    let page = leaf(5);
    let decoded = Page::from_bytes(&page.to_bytes(), 5).unwrap();
    assert_eq!(decoded.right_pointer, None);
}

#[test]
fn test_checksum_detects_flipped_byte() {
    let mut page = leaf(6);
    page.insert_cell(b"payload").unwrap();
    let mut bytes = page.to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = Page::from_bytes(&bytes, 6).unwrap_err();
    assert!(matches!(err, DatabaseError::CorruptedPage { page_id: 6, .. }));
}

#[test]
fn test_page_id_mismatch_is_corruption() {
    let bytes = leaf(7).to_bytes();
    let err = Page::from_bytes(&bytes, 8).unwrap_err();
    assert!(matches!(err, DatabaseError::CorruptedPage { page_id: 8, .. }));
}

#[test]
fn test_short_image_is_corruption() {
    assert!(Page::from_bytes(&[0u8; 8], 1).is_err());
}

#[test]
fn test_other_page_sizes() {
    for size in [512, 8192, 32768] {
        let mut page = Page::new(1, PageType::LeafTable, size);
        page.insert_cell(b"abc").unwrap();
        let decoded = Page::from_bytes(&page.to_bytes(), 1).unwrap();
        assert_eq!(decoded.page_size(), size);
        assert_eq!(decoded.get_cell(0), Some(&b"abc"[..]));
    }
}
