//! Recursive-descent SQL parser.
//!
//! Expression precedence, loosest first:
//! `OR`, `AND`, `NOT`, equality (`= <> IS IN LIKE BETWEEN ISNULL NOTNULL`),
//! comparison (`< <= > >=`), additive, multiplicative, `||`, unary.

use crate::{
    planner::{
        ast::*,
        lexer::tokenize,
        token::{Keyword, Span, Token, TokenKind},
    },
    types::{error::DatabaseError, value::Value},
};

pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

/// Parses a whole script.
pub fn parse_statements(sql: &str) -> Result<Vec<Statement>, DatabaseError> {
    let mut parser = Parser::new(sql)?;
    let mut statements = Vec::new();
    while let Some(statement) = parser.next_statement()? {
        statements.push(statement);
    }
    Ok(statements)
}

/// Parses exactly one statement; anything but semicolons after it is an error.
pub fn parse_statement(sql: &str) -> Result<Statement, DatabaseError> {
    let mut parser = Parser::new(sql)?;
    let Some(statement) = parser.next_statement()? else {
        return Err(DatabaseError::Syntax {
            offset: sql.len(),
            expected: "statement".to_string(),
            found: "end of input".to_string(),
        });
    };
    while parser.consume(&TokenKind::Semicolon) {}
    if parser.peek_kind() != &TokenKind::Eof {
        return Err(parser.error("end of input"));
    }
    Ok(statement)
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Result<Self, DatabaseError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    /// The next statement of the script, or `None` once only separators remain.
    pub fn next_statement(&mut self) -> Result<Option<Statement>, DatabaseError> {
        while self.consume(&TokenKind::Semicolon) {}
        if self.peek_kind() == &TokenKind::Eof {
            return Ok(None);
        }
        let statement = self.statement()?;
        if !matches!(self.peek_kind(), TokenKind::Semicolon | TokenKind::Eof) {
            return Err(self.error("';' or end of input"));
        }
        Ok(Some(statement))
    }

    // ----- token helpers -----

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn previous_end(&self) -> usize {
        match self.pos.checked_sub(1) {
            Some(prev) => self.tokens[prev].span.end,
            None => 0,
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Span, DatabaseError> {
        if self.check(&kind) {
            Ok(self.advance().span)
        } else {
            Err(self.error(&kind.display_name()))
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek_kind() == &TokenKind::Keyword(keyword)
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> bool {
        self.consume(&TokenKind::Keyword(keyword))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), DatabaseError> {
        self.expect(TokenKind::Keyword(keyword)).map(|_| ())
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Identifier(w) if w.eq_ignore_ascii_case(word))
    }

    fn error(&self, expected: &str) -> DatabaseError {
        let token = self.peek();
        DatabaseError::Syntax {
            offset: token.span.start,
            expected: expected.to_string(),
            found: token.kind.display_name(),
        }
    }

    fn unsupported(&self, feature: &str) -> DatabaseError {
        DatabaseError::UnsupportedSyntax {
            offset: self.peek().span.start,
            feature: feature.to_string(),
        }
    }

    fn identifier_text(kind: &TokenKind) -> Option<String> {
        match kind {
            TokenKind::Identifier(name) | TokenKind::QuotedIdentifier(name) => Some(name.clone()),
            TokenKind::Keyword(kw) if kw.usable_as_identifier() => Some(kw.as_str().to_lowercase()),
            _ => None,
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String, DatabaseError> {
        match Self::identifier_text(self.peek_kind()) {
            Some(name) => {
                self.advance();
                Ok(name)
            }
            None => Err(self.error(what)),
        }
    }

    /// Optional `AS name` or bare alias.
    fn alias(&mut self) -> Result<Option<String>, DatabaseError> {
        if self.consume_keyword(Keyword::As) {
            if let TokenKind::String(name) = self.peek_kind() {
                let name = name.clone();
                self.advance();
                return Ok(Some(name));
            }
            return self.expect_identifier("alias").map(Some);
        }
        match self.peek_kind() {
            TokenKind::Identifier(name) | TokenKind::QuotedIdentifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(Some(name))
            }
            _ => Ok(None),
        }
    }

    fn table_name(&mut self) -> Result<String, DatabaseError> {
        let name = self.expect_identifier("table name")?;
        if self.check(&TokenKind::Dot) {
            if !name.eq_ignore_ascii_case("main") {
                return Err(self.unsupported("attached databases"));
            }
            self.advance();
            return self.expect_identifier("table name");
        }
        Ok(name)
    }

    fn comma_list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut items = vec![item(self)?];
        while self.consume(&TokenKind::Comma) {
            items.push(item(self)?);
        }
        Ok(items)
    }

    // ----- statements -----

    fn statement(&mut self) -> Result<Statement, DatabaseError> {
        let start = self.peek().span.start;
        let TokenKind::Keyword(keyword) = self.peek_kind().clone() else {
            const UNSUPPORTED_COMMANDS: [&str; 9] = [
                "PRAGMA", "EXPLAIN", "SAVEPOINT", "RELEASE", "VACUUM", "ATTACH", "DETACH",
                "ANALYZE", "REINDEX",
            ];
            if let TokenKind::Identifier(word) = self.peek_kind() {
                if UNSUPPORTED_COMMANDS.iter().any(|c| word.eq_ignore_ascii_case(c)) {
                    return Err(self.unsupported(&format!("{} statements", word.to_uppercase())));
                }
            }
            return Err(self.error("statement"));
        };

        match keyword {
            Keyword::Create => {
                self.advance();
                self.create(start)
            }
            Keyword::Drop => {
                self.advance();
                self.drop()
            }
            Keyword::Alter => {
                self.advance();
                self.alter()
            }
            Keyword::Insert => {
                self.advance();
                self.insert()
            }
            Keyword::Replace => Err(self.unsupported("REPLACE statements")),
            Keyword::Update => {
                self.advance();
                self.update()
            }
            Keyword::Delete => {
                self.advance();
                self.delete()
            }
            Keyword::Select => Ok(Statement::Select(self.select()?)),
            Keyword::Values => Err(self.unsupported("VALUES as a statement")),
            Keyword::With => Err(self.unsupported("WITH clauses")),
            Keyword::Begin => {
                self.advance();
                if ["DEFERRED", "IMMEDIATE", "EXCLUSIVE"].iter().any(|w| self.check_word(w)) {
                    self.advance();
                }
                self.consume_keyword(Keyword::Transaction);
                Ok(Statement::Begin)
            }
            Keyword::Commit | Keyword::End => {
                self.advance();
                self.consume_keyword(Keyword::Transaction);
                Ok(Statement::Commit)
            }
            Keyword::Rollback => {
                self.advance();
                self.consume_keyword(Keyword::Transaction);
                if self.check_keyword(Keyword::To) {
                    return Err(self.unsupported("savepoints"));
                }
                Ok(Statement::Rollback)
            }
            _ => Err(self.error("statement")),
        }
    }

    fn create(&mut self, start: usize) -> Result<Statement, DatabaseError> {
        if self.consume_keyword(Keyword::Temp) || self.consume_keyword(Keyword::Temporary) {
            if !self.check_keyword(Keyword::Table) {
                return Err(self.error("TABLE"));
            }
        }
        if self.consume_keyword(Keyword::Table) {
            return self.create_table(start);
        }
        if self.check_keyword(Keyword::Unique) || self.check_keyword(Keyword::Index) {
            return Err(self.unsupported("CREATE INDEX"));
        }
        if self.check_keyword(Keyword::View) {
            return Err(self.unsupported("CREATE VIEW"));
        }
        if self.check_keyword(Keyword::Trigger) {
            return Err(self.unsupported("CREATE TRIGGER"));
        }
        if self.check_word("VIRTUAL") {
            return Err(self.unsupported("virtual tables"));
        }
        Err(self.error("TABLE"))
    }

    fn create_table(&mut self, start: usize) -> Result<Statement, DatabaseError> {
        let if_not_exists = if self.consume_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Not)?;
            self.expect_keyword(Keyword::Exists)?;
            true
        } else {
            false
        };
        let name = self.table_name()?;
        if self.check_keyword(Keyword::As) {
            return Err(self.unsupported("CREATE TABLE .. AS SELECT"));
        }

        self.expect(TokenKind::LParen)?;
        let mut columns = Vec::new();
        loop {
            if [
                Keyword::Primary,
                Keyword::Unique,
                Keyword::Constraint,
                Keyword::Check,
                Keyword::Foreign,
            ]
            .iter()
            .any(|kw| self.check_keyword(*kw))
            {
                return Err(self.unsupported("table constraints"));
            }
            columns.push(self.column_definition()?);
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        if self.check_word("WITHOUT") || self.check_word("STRICT") {
            return Err(self.unsupported("table options"));
        }

        Ok(Statement::CreateTable(CreateTableStatement {
            name,
            if_not_exists,
            columns,
            sql: self.input[start..self.previous_end()].to_string(),
        }))
    }

    fn column_definition(&mut self) -> Result<ColumnDefinition, DatabaseError> {
        let mut column = ColumnDefinition {
            name: self.expect_identifier("column name")?,
            type_name: self.type_name()?,
            ..ColumnDefinition::default()
        };

        loop {
            let TokenKind::Keyword(keyword) = self.peek_kind().clone() else {
                break;
            };
            match keyword {
                Keyword::Constraint => {
                    self.advance();
                    self.expect_identifier("constraint name")?;
                }
                Keyword::Primary => {
                    self.advance();
                    self.expect_keyword(Keyword::Key)?;
                    if !self.consume_keyword(Keyword::Asc) {
                        self.consume_keyword(Keyword::Desc);
                    }
                    if self.check_keyword(Keyword::On) {
                        return Err(self.unsupported("conflict clauses"));
                    }
                    column.primary_key = true;
                    column.autoincrement = self.consume_keyword(Keyword::Autoincrement);
                }
                Keyword::Not => {
                    self.advance();
                    self.expect_keyword(Keyword::Null)?;
                    column.not_null = true;
                }
                Keyword::Null => {
                    self.advance();
                }
                Keyword::Unique => {
                    self.advance();
                    column.unique = true;
                }
                Keyword::Default => {
                    self.advance();
                    column.default = Some(self.unary()?);
                }
                Keyword::Check => return Err(self.unsupported("CHECK constraints")),
                Keyword::References => return Err(self.unsupported("foreign keys")),
                Keyword::Collate => return Err(self.unsupported("collations")),
                _ => break,
            }
        }
        Ok(column)
    }

    /// Declared type: words optionally followed by `(n)` or `(n, m)`.
    /// Returns the text as written, or an empty string.
    fn type_name(&mut self) -> Result<String, DatabaseError> {
        let start = self.peek().span.start;
        let mut any = false;
        while let TokenKind::Identifier(_) = self.peek_kind() {
            self.advance();
            any = true;
        }
        if !any {
            return Ok(String::new());
        }
        if self.consume(&TokenKind::LParen) {
            for i in 0..2 {
                if i == 1 && !self.consume(&TokenKind::Comma) {
                    break;
                }
                if !self.consume(&TokenKind::Plus) {
                    self.consume(&TokenKind::Minus);
                }
                match self.peek_kind() {
                    TokenKind::Number(_) => {
                        self.advance();
                    }
                    _ => return Err(self.error("type size")),
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(self.input[start..self.previous_end()].to_string())
    }

    fn drop(&mut self) -> Result<Statement, DatabaseError> {
        if self.check_keyword(Keyword::Index) {
            return Err(self.unsupported("DROP INDEX"));
        }
        if self.check_keyword(Keyword::View) {
            return Err(self.unsupported("DROP VIEW"));
        }
        if self.check_keyword(Keyword::Trigger) {
            return Err(self.unsupported("DROP TRIGGER"));
        }
        self.expect_keyword(Keyword::Table)?;
        let if_exists = if self.consume_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Exists)?;
            true
        } else {
            false
        };
        Ok(Statement::DropTable {
            name: self.table_name()?,
            if_exists,
        })
    }

    fn alter(&mut self) -> Result<Statement, DatabaseError> {
        self.expect_keyword(Keyword::Table)?;
        let table = self.table_name()?;
        let action = if self.consume_keyword(Keyword::Add) {
            self.consume_keyword(Keyword::Column);
            if [Keyword::Primary, Keyword::Constraint, Keyword::Foreign, Keyword::Check]
                .iter()
                .any(|kw| self.check_keyword(*kw))
            {
                return Err(self.unsupported("table constraints"));
            }
            AlterTableAction::AddColumn(self.column_definition()?)
        } else if self.consume_keyword(Keyword::Rename) {
            if !self.consume_keyword(Keyword::To) {
                return Err(self.unsupported("RENAME COLUMN"));
            }
            AlterTableAction::RenameTo(self.expect_identifier("table name")?)
        } else if self.check_keyword(Keyword::Drop) {
            return Err(self.unsupported("DROP COLUMN"));
        } else {
            return Err(self.error("ADD or RENAME"));
        };
        Ok(Statement::AlterTable { table, action })
    }

    fn insert(&mut self) -> Result<Statement, DatabaseError> {
        if self.check_keyword(Keyword::Or) {
            return Err(self.unsupported("conflict clauses"));
        }
        self.expect_keyword(Keyword::Into)?;
        let table = self.table_name()?;
        if self.check_keyword(Keyword::As) {
            return Err(self.unsupported("table aliases in INSERT"));
        }

        let mut columns = if self.consume(&TokenKind::LParen) {
            let names = self.comma_list(|p| p.expect_identifier("column name"))?;
            self.expect(TokenKind::RParen)?;
            Some(names)
        } else {
            None
        };

        if self.check_keyword(Keyword::Select) || self.check_keyword(Keyword::With) {
            return Err(self.unsupported("INSERT .. SELECT"));
        }
        let rows = if self.consume_keyword(Keyword::Default) {
            self.expect_keyword(Keyword::Values)?;
            columns = Some(Vec::new());
            vec![Vec::new()]
        } else {
            self.expect_keyword(Keyword::Values)?;
            self.comma_list(|p| {
                p.expect(TokenKind::LParen)?;
                let values = p.comma_list(Self::expr)?;
                p.expect(TokenKind::RParen)?;
                Ok(values)
            })?
        };
        if self.check_keyword(Keyword::On) || self.check_word("RETURNING") {
            return Err(self.unsupported("INSERT clauses after VALUES"));
        }

        Ok(Statement::Insert(InsertStatement {
            table,
            columns,
            rows,
        }))
    }

    fn update(&mut self) -> Result<Statement, DatabaseError> {
        if self.check_keyword(Keyword::Or) {
            return Err(self.unsupported("conflict clauses"));
        }
        let table = self.table_name()?;
        self.expect_keyword(Keyword::Set)?;
        let assignments = self.comma_list(|p| {
            if p.check(&TokenKind::LParen) {
                return Err(p.unsupported("row value assignments"));
            }
            let column = p.expect_identifier("column name")?;
            p.expect(TokenKind::Eq)?;
            Ok((column, p.expr()?))
        })?;
        if self.check_keyword(Keyword::From) {
            return Err(self.unsupported("UPDATE .. FROM"));
        }
        let where_clause = self.where_clause()?;
        Ok(Statement::Update(UpdateStatement {
            table,
            assignments,
            where_clause,
        }))
    }

    fn delete(&mut self) -> Result<Statement, DatabaseError> {
        self.expect_keyword(Keyword::From)?;
        let table = self.table_name()?;
        let where_clause = self.where_clause()?;
        Ok(Statement::Delete(DeleteStatement {
            table,
            where_clause,
        }))
    }

    fn where_clause(&mut self) -> Result<Option<Expr>, DatabaseError> {
        if self.consume_keyword(Keyword::Where) {
            Ok(Some(self.expr()?))
        } else {
            Ok(None)
        }
    }

    fn select(&mut self) -> Result<SelectStatement, DatabaseError> {
        self.expect_keyword(Keyword::Select)?;
        let mut select = SelectStatement {
            distinct: self.consume_keyword(Keyword::Distinct),
            ..SelectStatement::default()
        };
        if !select.distinct {
            self.consume_keyword(Keyword::All);
        }

        select.items = self.comma_list(Self::select_item)?;
        if self.consume_keyword(Keyword::From) {
            select.from = Some(self.from_clause()?);
        }
        select.where_clause = self.where_clause()?;
        if self.consume_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            select.group_by = self.comma_list(Self::expr)?;
        }
        if self.consume_keyword(Keyword::Having) {
            select.having = Some(self.expr()?);
        }
        if self.check_word("WINDOW") {
            return Err(self.unsupported("window functions"));
        }
        if self.consume_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            select.order_by = self.comma_list(|p| {
                let expr = p.expr()?;
                if p.check_keyword(Keyword::Collate) {
                    return Err(p.unsupported("collations"));
                }
                let descending = if p.consume_keyword(Keyword::Desc) {
                    true
                } else {
                    p.consume_keyword(Keyword::Asc);
                    false
                };
                if p.check_word("NULLS") {
                    return Err(p.unsupported("NULLS FIRST/LAST"));
                }
                Ok(OrderByItem { expr, descending })
            })?;
        }
        if self.consume_keyword(Keyword::Limit) {
            let first = self.expr()?;
            if self.consume_keyword(Keyword::Offset) {
                select.limit = Some(first);
                select.offset = Some(self.expr()?);
            } else if self.consume(&TokenKind::Comma) {
                select.offset = Some(first);
                select.limit = Some(self.expr()?);
            } else {
                select.limit = Some(first);
            }
        }
        if [Keyword::Union, Keyword::Intersect, Keyword::Except]
            .iter()
            .any(|kw| self.check_keyword(*kw))
        {
            return Err(self.unsupported("compound SELECT"));
        }
        Ok(select)
    }

    fn select_item(&mut self) -> Result<SelectItem, DatabaseError> {
        let start = self.peek().span.start;
        if self.consume(&TokenKind::Asterisk) {
            return Ok(SelectItem::Wildcard);
        }
        if let Some(table) = Self::identifier_text(self.peek_kind()) {
            if self.peek_nth(1) == &TokenKind::Dot && self.peek_nth(2) == &TokenKind::Asterisk {
                self.pos += 3;
                return Ok(SelectItem::QualifiedWildcard(table));
            }
        }
        let expr = self.expr()?;
        let span = Span::new(start, self.previous_end());
        let alias = self.alias()?;
        Ok(SelectItem::Expr { expr, alias, span })
    }

    fn from_clause(&mut self) -> Result<FromClause, DatabaseError> {
        let first = self.table_reference()?;
        let mut joins = Vec::new();
        loop {
            let kind = if self.consume(&TokenKind::Comma) {
                JoinKind::Cross
            } else if self.check_keyword(Keyword::Natural) {
                return Err(self.unsupported("NATURAL JOIN"));
            } else if self.check_keyword(Keyword::Right) || self.check_keyword(Keyword::Full) {
                return Err(self.unsupported("RIGHT and FULL joins"));
            } else if self.consume_keyword(Keyword::Join) {
                JoinKind::Inner
            } else if self.consume_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                JoinKind::Inner
            } else if self.consume_keyword(Keyword::Left) {
                self.consume_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinKind::Left
            } else if self.consume_keyword(Keyword::Cross) {
                self.expect_keyword(Keyword::Join)?;
                JoinKind::Cross
            } else {
                break;
            };

            let table = self.table_reference()?;
            let on = if self.consume_keyword(Keyword::On) {
                Some(self.expr()?)
            } else if self.check_keyword(Keyword::Using) {
                return Err(self.unsupported("JOIN .. USING"));
            } else {
                None
            };
            joins.push(Join { kind, table, on });
        }
        Ok(FromClause { first, joins })
    }

    fn table_reference(&mut self) -> Result<TableReference, DatabaseError> {
        if self.check(&TokenKind::LParen) {
            return Err(self.unsupported("subqueries"));
        }
        let name = self.table_name()?;
        if self.check(&TokenKind::LParen) {
            return Err(self.unsupported("table-valued functions"));
        }
        let alias = self.alias()?;
        Ok(TableReference { name, alias })
    }

    // ----- expressions -----

    pub fn expr(&mut self) -> Result<Expr, DatabaseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.and_expr()?;
        while self.consume_keyword(Keyword::Or) {
            left = Expr::binary(left, BinaryOp::Or, self.and_expr()?);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.not_expr()?;
        while self.consume_keyword(Keyword::And) {
            left = Expr::binary(left, BinaryOp::And, self.not_expr()?);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, DatabaseError> {
        if self.consume_keyword(Keyword::Not) {
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(self.not_expr()?),
            });
        }
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.comparison()?;
        loop {
            left = match self.peek_kind().clone() {
                TokenKind::Eq => {
                    self.advance();
                    Expr::binary(left, BinaryOp::Eq, self.comparison()?)
                }
                TokenKind::Neq => {
                    self.advance();
                    Expr::binary(left, BinaryOp::NotEq, self.comparison()?)
                }
                TokenKind::Keyword(Keyword::Is) => {
                    self.advance();
                    let negated = self.consume_keyword(Keyword::Not);
                    if self.consume_keyword(Keyword::Null) {
                        Expr::IsNull {
                            expr: Box::new(left),
                            negated,
                        }
                    } else {
                        let op = if negated { BinaryOp::IsNot } else { BinaryOp::Is };
                        Expr::binary(left, op, self.comparison()?)
                    }
                }
                TokenKind::Keyword(Keyword::Isnull) => {
                    self.advance();
                    Expr::IsNull {
                        expr: Box::new(left),
                        negated: false,
                    }
                }
                TokenKind::Keyword(Keyword::Notnull) => {
                    self.advance();
                    Expr::IsNull {
                        expr: Box::new(left),
                        negated: true,
                    }
                }
                TokenKind::Keyword(Keyword::Not)
                    if matches!(
                        self.peek_nth(1),
                        TokenKind::Keyword(
                            Keyword::Like | Keyword::In | Keyword::Between | Keyword::Null
                        )
                    ) =>
                {
                    self.advance();
                    self.negatable_postfix(left, true)?
                }
                TokenKind::Keyword(Keyword::Like | Keyword::In | Keyword::Between) => {
                    self.negatable_postfix(left, false)?
                }
                _ => return Ok(left),
            };
        }
    }

    /// `LIKE`, `IN`, `BETWEEN` or (after NOT) `NULL`, applied to `left`.
    fn negatable_postfix(&mut self, left: Expr, negated: bool) -> Result<Expr, DatabaseError> {
        let expr = Box::new(left);
        if self.consume_keyword(Keyword::Null) {
            return Ok(Expr::IsNull { expr, negated });
        }
        if self.consume_keyword(Keyword::Like) {
            let pattern = Box::new(self.comparison()?);
            if self.check_word("ESCAPE") {
                return Err(self.unsupported("LIKE .. ESCAPE"));
            }
            return Ok(Expr::Like {
                expr,
                pattern,
                negated,
            });
        }
        if self.consume_keyword(Keyword::In) {
            if !self.check(&TokenKind::LParen) {
                return Err(self.unsupported("IN with a table"));
            }
            self.advance();
            if self.check_keyword(Keyword::Select) || self.check_keyword(Keyword::With) {
                return Err(self.unsupported("subqueries"));
            }
            let list = if self.check(&TokenKind::RParen) {
                Vec::new()
            } else {
                self.comma_list(Self::expr)?
            };
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::InList {
                expr,
                list,
                negated,
            });
        }
        self.expect_keyword(Keyword::Between)?;
        let low = Box::new(self.comparison()?);
        self.expect_keyword(Keyword::And)?;
        let high = Box::new(self.comparison()?);
        Ok(Expr::Between {
            expr,
            low,
            high,
            negated,
        })
    }

    fn comparison(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::binary(left, op, self.additive()?);
        }
    }

    fn additive(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::binary(left, op, self.multiplicative()?);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Asterisk => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::binary(left, op, self.concat()?);
        }
    }

    fn concat(&mut self) -> Result<Expr, DatabaseError> {
        let mut left = self.unary()?;
        while self.consume(&TokenKind::Concat) {
            left = Expr::binary(left, BinaryOp::Concat, self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, DatabaseError> {
        if self.consume(&TokenKind::Minus) {
            // The one integer whose magnitude does not fit i64 on its own
            if let TokenKind::Number(text) = self.peek_kind() {
                if text == "9223372036854775808" {
                    self.advance();
                    return Ok(Expr::Literal(Value::Integer(i64::MIN)));
                }
            }
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(self.unary()?),
            });
        }
        if self.consume(&TokenKind::Plus) {
            return Ok(Expr::Unary {
                op: UnaryOp::Plus,
                expr: Box::new(self.unary()?),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, DatabaseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(text) => {
                self.advance();
                number_literal(&text)
                    .map(Expr::Literal)
                    .ok_or_else(|| DatabaseError::Syntax {
                        offset: token.span.start,
                        expected: "number".to_string(),
                        found: text,
                    })
            }
            TokenKind::String(text) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(text)))
            }
            TokenKind::Blob(bytes) => {
                self.advance();
                Ok(Expr::Literal(Value::Blob(bytes)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Literal(Value::Integer(1)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Literal(Value::Integer(0)))
            }
            TokenKind::Parameter(_) => Err(self.unsupported("parameters")),
            TokenKind::Keyword(Keyword::Case) => Err(self.unsupported("CASE expressions")),
            TokenKind::Keyword(Keyword::Exists | Keyword::Select) => {
                Err(self.unsupported("subqueries"))
            }
            TokenKind::Keyword(Keyword::Cast) => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let expr = self.expr()?;
                self.expect_keyword(Keyword::As)?;
                let type_name = self.type_name()?;
                if type_name.is_empty() {
                    return Err(self.error("type name"));
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Cast {
                    expr: Box::new(expr),
                    type_name,
                })
            }
            TokenKind::LParen => {
                self.advance();
                if self.check_keyword(Keyword::Select) || self.check_keyword(Keyword::With) {
                    return Err(self.unsupported("subqueries"));
                }
                let expr = self.expr()?;
                if self.check(&TokenKind::Comma) {
                    return Err(self.unsupported("row values"));
                }
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            ref kind => {
                let Some(name) = Self::identifier_text(kind) else {
                    return Err(self.error("expression"));
                };
                self.advance();
                if self.check(&TokenKind::LParen) {
                    return self.function_call(name);
                }
                if self.consume(&TokenKind::Dot) {
                    let column = self.expect_identifier("column name")?;
                    return Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    });
                }
                Ok(Expr::Column { table: None, name })
            }
        }
    }

    fn function_call(&mut self, name: String) -> Result<Expr, DatabaseError> {
        self.expect(TokenKind::LParen)?;
        let (mut args, mut distinct, mut star) = (Vec::new(), false, false);
        if self.consume(&TokenKind::Asterisk) {
            star = true;
        } else if !self.check(&TokenKind::RParen) {
            distinct = self.consume_keyword(Keyword::Distinct);
            args = self.comma_list(Self::expr)?;
        }
        self.expect(TokenKind::RParen)?;
        if self.check_word("OVER") || self.check_word("FILTER") {
            return Err(self.unsupported("window functions"));
        }
        Ok(Expr::Function {
            name: name.to_ascii_lowercase(),
            args,
            distinct,
            star,
        })
    }
}

/// Integer when the text is all digits and fits i64, real otherwise.
fn number_literal(text: &str) -> Option<Value> {
    if text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = text.parse::<i64>() {
            return Some(Value::Integer(i));
        }
    }
    text.parse::<f64>().ok().map(Value::Real)
}
