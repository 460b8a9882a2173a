use std::thread;

use lumbung::{
    Config, Connection, DatabaseError, ErrorKind, QueryFormat, StepResult, StorageConfig,
    utils::mock::TempDatabase,
};

fn count(conn: &mut Connection, table: &str) -> i64 {
    conn.query_json(&format!("SELECT count(*) FROM {}", table), QueryFormat::Raw)
        .unwrap()
        .parse()
        .unwrap()
}

fn two_handles(prefix: &str) -> (TempDatabase, Connection, Connection) {
    let temp_db = TempDatabase::with_prefix(prefix);
    let mut first = temp_db.connect().unwrap();
    first
        .execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
             CREATE TABLE u (id INTEGER PRIMARY KEY);
             INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e');
             INSERT INTO u VALUES (1), (2);",
        )
        .unwrap();
    let second = temp_db.connect().unwrap();
    (temp_db, first, second)
}

#[test]
fn test_second_writer_gets_busy() -> Result<(), DatabaseError> {
    let (_temp_db, mut writer, mut other) = two_handles("conc_busy");

    writer.execute("BEGIN; INSERT INTO t (v) VALUES ('pending')")?;
    let err = other.execute("INSERT INTO t (v) VALUES ('blocked')").unwrap_err();
    assert!(matches!(err, DatabaseError::Busy));
    assert_eq!(err.kind(), ErrorKind::Busy);
    assert!(err.is_retryable());

    // Readers see only committed rows while the writer works
    assert_eq!(count(&mut other, "t"), 5);
    assert_eq!(count(&mut writer, "t"), 6);

    writer.execute("COMMIT")?;
    assert_eq!(count(&mut other, "t"), 6);
    other.execute("INSERT INTO t (v) VALUES ('now')")?;
    assert_eq!(count(&mut writer, "t"), 7);
    Ok(())
}

#[test]
fn test_begin_defers_the_write_lock() -> Result<(), DatabaseError> {
    let (_temp_db, mut first, mut second) = two_handles("conc_deferred");

    first.execute("BEGIN")?;
    second.execute("INSERT INTO t VALUES (6, 'second')")?;
    first.execute("INSERT INTO t VALUES (7, 'first')")?;
    assert!(matches!(
        second.execute("INSERT INTO t VALUES (8, 'late')"),
        Err(DatabaseError::Busy)
    ));
    first.execute("COMMIT")?;

    assert_eq!(
        second.query_json("SELECT id FROM t WHERE id > 5", QueryFormat::Json)?,
        r#"[{"id":6},{"id":7}]"#
    );
    Ok(())
}

#[test]
fn test_schema_change_invalidates_other_statements() -> Result<(), DatabaseError> {
    let (_temp_db, mut writer, mut reader) = two_handles("conc_invalidate");

    let on_t = reader.prepare("SELECT id FROM t")?;
    let on_u = reader.prepare("SELECT id FROM u")?;
    let unstarted = reader.prepare("SELECT v FROM t")?;
    assert_eq!(reader.step(on_t)?, StepResult::Row);
    assert_eq!(reader.step(on_u)?, StepResult::Row);

    writer.execute("ALTER TABLE t ADD COLUMN extra INTEGER DEFAULT 0")?;

    match reader.step(on_t) {
        Err(DatabaseError::StatementInvalidated { table }) => assert_eq!(table, "t"),
        other => panic!("expected invalidation, got {:?}", other),
    }
    assert_eq!(reader.statement_state(on_t), None);
    assert_eq!(
        reader.step(unstarted).unwrap_err().kind(),
        ErrorKind::StatementInvalidated
    );
    // Statements on other tables carry on
    assert_eq!(reader.step(on_u)?, StepResult::Row);
    assert_eq!(reader.get_long(on_u, "id")?, 2);

    let fresh = reader.prepare("SELECT extra FROM t WHERE id = 1")?;
    assert_eq!(reader.step(fresh)?, StepResult::Row);
    assert_eq!(reader.get_long(fresh, "extra")?, 0);
    Ok(())
}

#[test]
fn test_drop_invalidates_own_statements_too() -> Result<(), DatabaseError> {
    let (_temp_db, mut conn, _other) = two_handles("conc_drop");
    let id = conn.prepare("SELECT * FROM u")?;
    conn.step(id)?;
    conn.execute("DROP TABLE u")?;
    assert!(matches!(
        conn.step(id),
        Err(DatabaseError::StatementInvalidated { .. })
    ));
    Ok(())
}

#[test]
fn test_scan_sees_commits_ahead_of_its_position() -> Result<(), DatabaseError> {
    let (_temp_db, mut writer, mut reader) = two_handles("conc_read_committed");

    let id = reader.prepare("SELECT id FROM t")?;
    let mut seen = Vec::new();
    for _ in 0..2 {
        assert_eq!(reader.step(id)?, StepResult::Row);
        seen.push(reader.get_long(id, "id")?);
    }

    writer.execute("INSERT INTO t VALUES (10, 'new'); DELETE FROM t WHERE id = 4; INSERT INTO t VALUES (0, 'behind')")?;

    while reader.step(id)? == StepResult::Row {
        seen.push(reader.get_long(id, "id")?);
    }
    assert_eq!(seen, vec![1, 2, 3, 5, 10]);
    Ok(())
}

#[test]
fn test_handles_on_threads() {
    let temp_db = TempDatabase::with_prefix("conc_threads");
    {
        let mut conn = temp_db.connect().unwrap();
        conn.execute("CREATE TABLE log (worker INTEGER, seq INTEGER)").unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let path = temp_db.path().to_path_buf();
            thread::spawn(move || {
                let mut conn = Connection::open(&path).unwrap();
                for seq in 0..25 {
                    let sql = format!("INSERT INTO log VALUES ({}, {})", worker, seq);
                    loop {
                        match conn.execute(&sql) {
                            Ok(()) => break,
                            Err(e) if e.is_retryable() => thread::yield_now(),
                            Err(e) => panic!("worker {} failed: {}", worker, e),
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut conn = temp_db.connect().unwrap();
    assert_eq!(count(&mut conn, "log"), 100);
    assert_eq!(
        conn.query_json(
            "SELECT count(DISTINCT worker) FROM log WHERE seq = 24",
            QueryFormat::Raw
        )
        .unwrap(),
        "4"
    );
    assert!(conn.integrity_check().unwrap().is_empty());
}

#[test]
fn test_readers_never_see_a_commit_half_applied() {
    let temp_db = TempDatabase::with_prefix("conc_consistent_reads");
    let config = Config::default().with_storage(StorageConfig::default().with_page_size(512));
    let mut setup = temp_db.connect_with_config(&config).unwrap();
    setup
        .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, pad TEXT)")
        .unwrap();
    let rows: Vec<String> = (1..=400)
        .map(|id| format!("({}, '{}')", id, "p".repeat(40)))
        .collect();
    setup
        .execute(&format!("INSERT INTO t VALUES {}", rows.join(", ")))
        .unwrap();
    drop(setup);

    let writer = {
        let path = temp_db.path().to_path_buf();
        let config = config.clone();
        thread::spawn(move || {
            let mut conn = Connection::open_with_config(&path, &config).unwrap();
            for round in 0..60 {
                let k = round % 7;
                let reinsert: Vec<String> = (1..=400)
                    .filter(|id| id % 7 == k)
                    .map(|id| format!("({}, '{}')", id, "q".repeat(40 + round)))
                    .collect();
                conn.execute(&format!(
                    "BEGIN; DELETE FROM t WHERE id % 7 = {}; INSERT INTO t VALUES {}; COMMIT",
                    k,
                    reinsert.join(", ")
                ))
                .unwrap();
            }
        })
    };

    let mut reader = temp_db.connect_with_config(&config).unwrap();
    let mut reads = 0;
    while !writer.is_finished() || reads < 10 {
        let summary = reader
            .query_json("SELECT count(*) AS n, sum(id) AS s FROM t", QueryFormat::Json)
            .unwrap();
        assert_eq!(summary, r#"[{"n":400,"s":80200}]"#);
        reads += 1;
    }
    writer.join().unwrap();
    assert!(reader.integrity_check().unwrap().is_empty());
}
