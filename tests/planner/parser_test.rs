use lumbung::{
    planner::{
        ast::*,
        parse_statement, parse_statements,
        parser::Parser,
    },
    types::{error::DatabaseError, value::Value},
};

fn select(sql: &str) -> SelectStatement {
    match parse_statement(sql).unwrap() {
        Statement::Select(select) => select,
        other => panic!("expected SELECT, got {:?}", other),
    }
}

fn single_expr(sql: &str) -> Expr {
    let mut statement = select(sql);
    match statement.items.remove(0) {
        SelectItem::Expr { expr, .. } => expr,
        other => panic!("expected an expression item, got {:?}", other),
    }
}

fn lit(i: i64) -> Expr {
    Expr::Literal(Value::Integer(i))
}

fn unsupported(sql: &str) -> String {
    match parse_statement(sql) {
        Err(DatabaseError::UnsupportedSyntax { feature, .. }) => feature,
        other => panic!("expected unsupported syntax for {:?}, got {:?}", sql, other),
    }
}

#[test]
fn test_create_table_with_constraints() {
    let sql = "CREATE TABLE IF NOT EXISTS users (\
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               name VARCHAR(40) NOT NULL, \
               email TEXT UNIQUE, \
               score REAL DEFAULT -1.5, \
               misc)";
    let Statement::CreateTable(create) = parse_statement(sql).unwrap() else {
        panic!("expected CREATE TABLE");
    };
    assert_eq!(create.name, "users");
    assert!(create.if_not_exists);
    assert_eq!(create.sql, sql);
    assert_eq!(create.columns.len(), 5);

    let id = &create.columns[0];
    assert!(id.primary_key && id.autoincrement);
    assert_eq!(id.type_name, "INTEGER");
    assert_eq!(create.columns[1].type_name, "VARCHAR(40)");
    assert!(create.columns[1].not_null);
    assert!(create.columns[2].unique);
    assert_eq!(
        create.columns[3].default,
        Some(Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(Expr::Literal(Value::Real(1.5))),
        })
    );
    assert_eq!(create.columns[4].type_name, "");
}

#[test]
fn test_drop_and_alter() {
    assert_eq!(
        parse_statement("DROP TABLE IF EXISTS t").unwrap(),
        Statement::DropTable {
            name: "t".into(),
            if_exists: true
        }
    );
    assert_eq!(
        parse_statement("ALTER TABLE t RENAME TO u").unwrap(),
        Statement::AlterTable {
            table: "t".into(),
            action: AlterTableAction::RenameTo("u".into()),
        }
    );
    let Statement::AlterTable {
        action: AlterTableAction::AddColumn(column),
        ..
    } = parse_statement("ALTER TABLE t ADD COLUMN age INT DEFAULT 0").unwrap()
    else {
        panic!("expected ADD COLUMN");
    };
    assert_eq!(column.name, "age");
    assert_eq!(column.default, Some(lit(0)));
}

#[test]
fn test_insert_forms() {
    let Statement::Insert(insert) =
        parse_statement("INSERT INTO main.t (a, b) VALUES (1, 'x'), (2, NULL)").unwrap()
    else {
        panic!("expected INSERT");
    };
    assert_eq!(insert.table, "t");
    assert_eq!(insert.columns, Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(insert.rows.len(), 2);
    assert_eq!(insert.rows[1][1], Expr::Literal(Value::Null));

    let Statement::Insert(defaults) = parse_statement("INSERT INTO t DEFAULT VALUES").unwrap() else {
        panic!("expected INSERT");
    };
    assert_eq!(defaults.columns, Some(Vec::new()));
    assert_eq!(defaults.rows, vec![Vec::<Expr>::new()]);
}

#[test]
fn test_update_and_delete() {
    let Statement::Update(update) =
        parse_statement("UPDATE t SET a = a + 1, b = 'z' WHERE id = 3").unwrap()
    else {
        panic!("expected UPDATE");
    };
    assert_eq!(update.assignments.len(), 2);
    assert_eq!(update.assignments[1], ("b".to_string(), Expr::Literal(Value::Text("z".into()))));
    assert!(update.where_clause.is_some());

    let Statement::Delete(delete) = parse_statement("DELETE FROM t").unwrap() else {
        panic!("expected DELETE");
    };
    assert_eq!(delete.table, "t");
    assert_eq!(delete.where_clause, None);
}

#[test]
fn test_select_clauses() {
    let statement = select(
        "SELECT DISTINCT u.name AS who, count(*) n FROM users u \
         LEFT JOIN orders o ON o.user_id = u.id, tags \
         WHERE u.age >= 18 GROUP BY u.name HAVING count(*) > 1 \
         ORDER BY n DESC, who LIMIT 10 OFFSET 5",
    );
    assert!(statement.distinct);
    assert_eq!(statement.items.len(), 2);
    let SelectItem::Expr { alias, .. } = &statement.items[1] else {
        panic!("expected an expression item");
    };
    assert_eq!(alias.as_deref(), Some("n"));

    let from = statement.from.unwrap();
    assert_eq!(from.first.binding_name(), "u");
    assert_eq!(from.joins.len(), 2);
    assert_eq!(from.joins[0].kind, JoinKind::Left);
    assert!(from.joins[0].on.is_some());
    assert_eq!(from.joins[1].kind, JoinKind::Cross);
    assert_eq!(from.joins[1].table.binding_name(), "tags");

    assert_eq!(statement.group_by.len(), 1);
    assert!(statement.having.is_some());
    assert_eq!(statement.order_by.len(), 2);
    assert!(statement.order_by[0].descending);
    assert!(!statement.order_by[1].descending);
    assert_eq!(statement.limit, Some(lit(10)));
    assert_eq!(statement.offset, Some(lit(5)));
}

#[test]
fn test_limit_with_comma_puts_offset_first() {
    let statement = select("SELECT * FROM t LIMIT 5, 10");
    assert_eq!(statement.offset, Some(lit(5)));
    assert_eq!(statement.limit, Some(lit(10)));
    assert_eq!(statement.items, vec![SelectItem::Wildcard]);
}

#[test]
fn test_qualified_wildcard() {
    let statement = select("SELECT t.*, 1 FROM t");
    assert_eq!(statement.items[0], SelectItem::QualifiedWildcard("t".into()));
}

#[test]
fn test_select_item_span_covers_expression_text() {
    let sql = "SELECT a + 1 AS x, upper(name) FROM t";
    let statement = select(sql);
    let SelectItem::Expr { span, .. } = &statement.items[1] else {
        panic!("expected an expression item");
    };
    assert_eq!(&sql[span.start..span.end], "upper(name)");
}

#[test]
fn test_operator_precedence() {
    // 1 + 2 * 3 parses as 1 + (2 * 3)
    assert_eq!(
        single_expr("SELECT 1 + 2 * 3"),
        Expr::binary(lit(1), BinaryOp::Add, Expr::binary(lit(2), BinaryOp::Mul, lit(3)))
    );
    // a OR b AND c parses as a OR (b AND c)
    assert_eq!(
        single_expr("SELECT a OR b AND c"),
        Expr::binary(
            Expr::column("a"),
            BinaryOp::Or,
            Expr::binary(Expr::column("b"), BinaryOp::And, Expr::column("c"))
        )
    );
    // comparison binds tighter than equality
    assert_eq!(
        single_expr("SELECT 1 < 2 = 1"),
        Expr::binary(Expr::binary(lit(1), BinaryOp::Lt, lit(2)), BinaryOp::Eq, lit(1))
    );
    // || binds tighter than *
    assert_eq!(
        single_expr("SELECT 2 * 'a' || 'b'"),
        Expr::binary(
            lit(2),
            BinaryOp::Mul,
            Expr::binary(
                Expr::Literal(Value::Text("a".into())),
                BinaryOp::Concat,
                Expr::Literal(Value::Text("b".into()))
            )
        )
    );
}

#[test]
fn test_postfix_predicates() {
    assert!(matches!(
        single_expr("SELECT a NOT LIKE 'x%'"),
        Expr::Like { negated: true, .. }
    ));
    assert!(matches!(
        single_expr("SELECT a IN (1, 2, 3)"),
        Expr::InList { ref list, negated: false, .. } if list.len() == 3
    ));
    assert!(matches!(
        single_expr("SELECT a NOT BETWEEN 1 AND 5"),
        Expr::Between { negated: true, .. }
    ));
    assert!(matches!(
        single_expr("SELECT a IS NOT NULL"),
        Expr::IsNull { negated: true, .. }
    ));
    assert!(matches!(
        single_expr("SELECT a ISNULL"),
        Expr::IsNull { negated: false, .. }
    ));
    assert!(matches!(
        single_expr("SELECT a IS NOT b"),
        Expr::Binary { op: BinaryOp::IsNot, .. }
    ));
}

#[test]
fn test_literals_and_functions() {
    assert_eq!(
        single_expr("SELECT -9223372036854775808"),
        Expr::Literal(Value::Integer(i64::MIN))
    );
    assert_eq!(
        single_expr("SELECT 9223372036854775808"),
        Expr::Literal(Value::Real(9223372036854775808.0))
    );
    assert_eq!(single_expr("SELECT TRUE"), lit(1));
    assert_eq!(single_expr("SELECT x'00ff'"), Expr::Literal(Value::Blob(vec![0, 255])));
    assert_eq!(
        single_expr("SELECT CAST(a AS INTEGER)"),
        Expr::Cast {
            expr: Box::new(Expr::column("a")),
            type_name: "INTEGER".into(),
        }
    );
    assert_eq!(
        single_expr("SELECT COUNT(DISTINCT a)"),
        Expr::Function {
            name: "count".into(),
            args: vec![Expr::column("a")],
            distinct: true,
            star: false,
        }
    );
    assert!(single_expr("SELECT sum(a) + 1").contains_aggregate());
    assert!(!single_expr("SELECT max(a, b)").contains_aggregate());
}

#[test]
fn test_transaction_statements() {
    assert_eq!(parse_statement("BEGIN").unwrap(), Statement::Begin);
    assert_eq!(parse_statement("begin immediate transaction").unwrap(), Statement::Begin);
    assert_eq!(parse_statement("COMMIT").unwrap(), Statement::Commit);
    assert_eq!(parse_statement("END TRANSACTION").unwrap(), Statement::Commit);
    assert_eq!(parse_statement("ROLLBACK;").unwrap(), Statement::Rollback);
}

#[test]
fn test_scripts() {
    let statements =
        parse_statements(";CREATE TABLE t (a); INSERT INTO t VALUES (1);; SELECT a FROM t;").unwrap();
    assert_eq!(statements.len(), 3);
    assert!(statements[2].is_read_only());
    assert!(parse_statements("  -- nothing here\n").unwrap().is_empty());

    let mut parser = Parser::new("SELECT 1; SELECT 2").unwrap();
    assert!(parser.next_statement().unwrap().is_some());
    assert!(parser.next_statement().unwrap().is_some());
    assert!(parser.next_statement().unwrap().is_none());
}

#[test]
fn test_single_statement_rejects_trailing_input() {
    assert!(matches!(
        parse_statement("SELECT 1; SELECT 2"),
        Err(DatabaseError::Syntax { offset: 10, .. })
    ));
    assert!(matches!(
        parse_statement(""),
        Err(DatabaseError::Syntax { offset: 0, .. })
    ));
}

#[test]
fn test_syntax_errors_name_what_was_expected() {
    let Err(DatabaseError::Syntax {
        offset,
        expected,
        found,
    }) = parse_statement("SELECT FROM t")
    else {
        panic!("expected a syntax error");
    };
    assert_eq!(offset, 7);
    assert_eq!(expected, "expression");
    assert_eq!(found, "keyword FROM");

    assert!(matches!(
        parse_statement("CREATE TABLE t (a INTEGER"),
        Err(DatabaseError::Syntax { .. })
    ));
    assert!(matches!(
        parse_statement("INSERT t VALUES (1)"),
        Err(DatabaseError::Syntax { offset: 7, .. })
    ));
}

#[test]
fn test_unsupported_features_are_reported() {
    assert_eq!(unsupported("CREATE INDEX i ON t (a)"), "CREATE INDEX");
    assert_eq!(unsupported("SELECT * FROM a RIGHT JOIN b"), "RIGHT and FULL joins");
    assert_eq!(unsupported("SELECT 1 UNION SELECT 2"), "compound SELECT");
    assert_eq!(unsupported("SELECT (SELECT 1)"), "subqueries");
    assert_eq!(unsupported("SELECT * FROM t WHERE a = ?"), "parameters");
    assert_eq!(unsupported("PRAGMA table_info(t)"), "PRAGMA statements");
    assert_eq!(unsupported("INSERT OR REPLACE INTO t VALUES (1)"), "conflict clauses");
    assert_eq!(unsupported("WITH x AS (SELECT 1) SELECT * FROM x"), "WITH clauses");
    assert_eq!(unsupported("ALTER TABLE t DROP COLUMN a"), "DROP COLUMN");
    assert_eq!(unsupported("SELECT CASE WHEN 1 THEN 2 END"), "CASE expressions");
}
