use std::{
    fs::{self, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use lumbung::{
    Connection, DatabaseError, ErrorKind, QueryFormat,
    storage::journal::Journal,
    types::DEFAULT_PAGE_SIZE,
    utils::mock::TempDatabase,
};

const PAGE: usize = DEFAULT_PAGE_SIZE;

fn seeded(temp_db: &TempDatabase) {
    let mut conn = temp_db.connect().unwrap();
    conn.execute(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes (body) VALUES ('one'), ('two'), ('three');",
    )
    .unwrap();
    conn.close().unwrap();
}

fn page_images(path: &Path) -> Vec<Vec<u8>> {
    fs::read(path)
        .unwrap()
        .chunks(PAGE)
        .map(|chunk| chunk.to_vec())
        .collect()
}

fn scribble(path: &Path, page_id: u64) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(page_id * PAGE as u64)).unwrap();
    file.write_all(&vec![0xEE; PAGE]).unwrap();
    file.sync_all().unwrap();
}

fn bodies(conn: &mut Connection) -> String {
    conn.query_json("SELECT body FROM notes ORDER BY id", QueryFormat::Json)
        .unwrap()
}

#[test]
fn test_hot_journal_restores_the_last_commit() -> Result<(), DatabaseError> {
    let temp_db = TempDatabase::with_prefix("recovery_hot");
    seeded(&temp_db);
    let images = page_images(temp_db.path());
    let original_len = fs::metadata(temp_db.path())?.len();

    // A writer journaled every page, then crashed mid-way through the file
    let mut journal = Journal::create(temp_db.path(), PAGE, images.len() as u64)?;
    for (page_id, image) in images.iter().enumerate() {
        journal.append(page_id as u64, image)?;
    }
    journal.seal(true)?;
    drop(journal);
    for page_id in 1..=images.len() as u64 {
        scribble(temp_db.path(), page_id);
    }

    let mut conn = temp_db.connect()?;
    assert!(!Journal::path_for(temp_db.path()).exists());
    assert_eq!(fs::metadata(temp_db.path())?.len(), original_len);
    assert_eq!(
        bodies(&mut conn),
        r#"[{"body":"one"},{"body":"two"},{"body":"three"}]"#
    );
    assert!(conn.integrity_check()?.is_empty());

    conn.execute("INSERT INTO notes (body) VALUES ('four')")?;
    assert_eq!(conn.last_insert_rowid(), 4);
    Ok(())
}

#[test]
fn test_unsealed_journal_is_discarded() -> Result<(), DatabaseError> {
    let temp_db = TempDatabase::with_prefix("recovery_unsealed");
    seeded(&temp_db);
    let images = page_images(temp_db.path());

    let mut journal = Journal::create(temp_db.path(), PAGE, images.len() as u64)?;
    journal.append(1, &vec![0u8; PAGE])?;
    drop(journal);

    let mut conn = temp_db.connect()?;
    assert!(!Journal::path_for(temp_db.path()).exists());
    assert_eq!(
        bodies(&mut conn),
        r#"[{"body":"one"},{"body":"two"},{"body":"three"}]"#
    );
    Ok(())
}

#[test]
fn test_crashed_transaction_leaves_no_trace() -> Result<(), DatabaseError> {
    let temp_db = TempDatabase::with_prefix("recovery_uncommitted");
    seeded(&temp_db);
    {
        let mut conn = temp_db.connect()?;
        conn.execute("BEGIN; INSERT INTO notes (body) VALUES ('lost'); DELETE FROM notes WHERE id = 1")?;
        // Dropped without COMMIT
    }
    let mut conn = temp_db.connect()?;
    assert_eq!(
        bodies(&mut conn),
        r#"[{"body":"one"},{"body":"two"},{"body":"three"}]"#
    );
    assert!(!conn.in_transaction());
    Ok(())
}

#[test]
fn test_integrity_check_reports_damaged_pages() -> Result<(), DatabaseError> {
    let temp_db = TempDatabase::with_prefix("recovery_damaged");
    seeded(&temp_db);

    let root = {
        let conn = temp_db.connect()?;
        let root = conn.schemas().lookup_table("notes")?.root_page_id;
        conn.close()?;
        root
    };
    scribble(temp_db.path(), root);

    let mut conn = temp_db.connect()?;
    let problems = conn.integrity_check()?;
    assert!(!problems.is_empty());
    assert!(problems.iter().any(|problem| problem.contains("notes")));

    let err = conn
        .query_json("SELECT * FROM notes", QueryFormat::Raw)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corruption);
    Ok(())
}
