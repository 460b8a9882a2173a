use std::fmt;

/// Byte range of a token or expression in the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn at(pos: usize) -> Self {
        Self::new(pos, pos)
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Numeric literal kept as written; the parser decides integer or real.
    Number(String),
    String(String),
    Blob(Vec<u8>),
    Identifier(String),
    QuotedIdentifier(String),
    Keyword(Keyword),
    /// `?`, `?NNN`, `:name`, `@name` or `$name`.
    Parameter(String),

    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Concat,

    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,

    Eof,
}

impl TokenKind {
    /// Description used in syntax errors.
    pub fn display_name(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number '{}'", n),
            TokenKind::String(s) => format!("string '{}'", s),
            TokenKind::Blob(_) => "blob literal".to_string(),
            TokenKind::Identifier(s) => format!("identifier '{}'", s),
            TokenKind::QuotedIdentifier(s) => format!("identifier \"{}\"", s),
            TokenKind::Keyword(kw) => format!("keyword {}", kw),
            TokenKind::Parameter(p) => format!("parameter '{}'", p),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Asterisk => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Percent => "'%'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::Neq => "'<>'".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::LtEq => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::GtEq => "'>='".to_string(),
            TokenKind::Concat => "'||'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Semicolon => "';'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($variant),*
        }

        impl Keyword {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text),*
                }
            }

            /// Case-insensitive keyword lookup.
            pub fn lookup(word: &str) -> Option<Keyword> {
                let upper = word.to_ascii_uppercase();
                match upper.as_str() {
                    $($text => Some(Keyword::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

keywords! {
    Add => "ADD",
    All => "ALL",
    Alter => "ALTER",
    And => "AND",
    As => "AS",
    Asc => "ASC",
    Autoincrement => "AUTOINCREMENT",
    Begin => "BEGIN",
    Between => "BETWEEN",
    By => "BY",
    Case => "CASE",
    Cast => "CAST",
    Check => "CHECK",
    Collate => "COLLATE",
    Column => "COLUMN",
    Commit => "COMMIT",
    Constraint => "CONSTRAINT",
    Create => "CREATE",
    Cross => "CROSS",
    Default => "DEFAULT",
    Delete => "DELETE",
    Desc => "DESC",
    Distinct => "DISTINCT",
    Drop => "DROP",
    End => "END",
    Except => "EXCEPT",
    Exists => "EXISTS",
    False => "FALSE",
    Foreign => "FOREIGN",
    From => "FROM",
    Full => "FULL",
    Group => "GROUP",
    Having => "HAVING",
    If => "IF",
    In => "IN",
    Index => "INDEX",
    Inner => "INNER",
    Insert => "INSERT",
    Intersect => "INTERSECT",
    Into => "INTO",
    Is => "IS",
    Isnull => "ISNULL",
    Join => "JOIN",
    Key => "KEY",
    Left => "LEFT",
    Like => "LIKE",
    Limit => "LIMIT",
    Natural => "NATURAL",
    Not => "NOT",
    Notnull => "NOTNULL",
    Null => "NULL",
    Offset => "OFFSET",
    On => "ON",
    Or => "OR",
    Order => "ORDER",
    Outer => "OUTER",
    Primary => "PRIMARY",
    References => "REFERENCES",
    Rename => "RENAME",
    Replace => "REPLACE",
    Right => "RIGHT",
    Rollback => "ROLLBACK",
    Select => "SELECT",
    Set => "SET",
    Table => "TABLE",
    Temp => "TEMP",
    Temporary => "TEMPORARY",
    To => "TO",
    Transaction => "TRANSACTION",
    Trigger => "TRIGGER",
    True => "TRUE",
    Union => "UNION",
    Unique => "UNIQUE",
    Update => "UPDATE",
    Using => "USING",
    Values => "VALUES",
    View => "VIEW",
    When => "WHEN",
    Where => "WHERE",
    With => "WITH",
}

impl Keyword {
    /// Keywords that may still name a table, column or alias.
    pub fn usable_as_identifier(&self) -> bool {
        matches!(
            self,
            Keyword::Add
                | Keyword::Asc
                | Keyword::Autoincrement
                | Keyword::Column
                | Keyword::Desc
                | Keyword::End
                | Keyword::Key
                | Keyword::Rename
                | Keyword::Replace
                | Keyword::Temp
                | Keyword::Temporary
                | Keyword::Transaction
                | Keyword::Trigger
                | Keyword::View
        )
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
