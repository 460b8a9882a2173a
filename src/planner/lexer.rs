//! SQL tokenizer.
//!
//! Offsets in tokens and errors are byte offsets into the input. Keywords
//! are matched case-insensitively; identifiers may be quoted with `"..."`,
//! `` `...` `` or `[...]`. Comments (`-- ...` and `/* ... */`) are skipped.

use crate::{
    planner::token::{Keyword, Span, Token, TokenKind},
    types::error::DatabaseError,
};

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

fn syntax_error(offset: usize, expected: &str, found: impl Into<String>) -> DatabaseError {
    DatabaseError::Syntax {
        offset,
        expected: expected.to_string(),
        found: found.into(),
    }
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Every token of the input, ending with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, DatabaseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek(0)?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_trivia(&mut self) -> Result<(), DatabaseError> {
        loop {
            while self.peek(0).is_some_and(char::is_whitespace) {
                self.advance();
            }
            if self.starts_with("--") {
                while let Some(ch) = self.advance() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else if self.starts_with("/*") {
                let start = self.pos;
                match self.input[self.pos + 2..].find("*/") {
                    Some(end) => self.pos += 2 + end + 2,
                    None => return Err(syntax_error(start, "'*/'", "end of input")),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, DatabaseError> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(ch) = self.peek(0) else {
            return Ok(Token::new(TokenKind::Eof, Span::at(start)));
        };

        let kind = match ch {
            '\'' => TokenKind::String(self.quoted('\'', '\'')?),
            '"' => TokenKind::QuotedIdentifier(self.quoted('"', '"')?),
            '`' => TokenKind::QuotedIdentifier(self.quoted('`', '`')?),
            '[' => TokenKind::QuotedIdentifier(self.quoted('[', ']')?),
            'x' | 'X' if self.peek(1) == Some('\'') => self.blob()?,
            c if c.is_ascii_digit() => self.number()?,
            '.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
            c if is_ident_start(c) => self.word(),
            '?' | ':' | '@' | '$' => self.parameter()?,
            _ => self.operator()?,
        };
        Ok(Token::new(kind, Span::new(start, self.pos)))
    }

    /// Body of a quoted token; a doubled closing quote stands for itself.
    fn quoted(&mut self, open: char, close: char) -> Result<String, DatabaseError> {
        let start = self.pos;
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(syntax_error(start, &format!("closing {}", close), "end of input"));
                }
                Some(ch) if ch == close => {
                    if open != '[' && self.peek(0) == Some(close) {
                        self.advance();
                        value.push(close);
                    } else {
                        return Ok(value);
                    }
                }
                Some(ch) => value.push(ch),
            }
        }
    }

    fn blob(&mut self) -> Result<TokenKind, DatabaseError> {
        let start = self.pos;
        self.advance();
        let digits = self.quoted('\'', '\'')?;
        if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(syntax_error(
                start,
                "an even number of hex digits",
                format!("X'{}'", digits),
            ));
        }
        let bytes = (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| syntax_error(start, "hex digits", format!("X'{}'", digits)))?;
        Ok(TokenKind::Blob(bytes))
    }

    fn number(&mut self) -> Result<TokenKind, DatabaseError> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek(0) == Some('.') {
            self.advance();
            while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if let Some('e' | 'E') = self.peek(0) {
            let sign = usize::from(matches!(self.peek(1), Some('+' | '-')));
            if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..=sign {
                    self.advance();
                }
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        if self.peek(0).is_some_and(is_ident_continue) {
            while self.peek(0).is_some_and(is_ident_continue) {
                self.advance();
            }
            return Err(syntax_error(start, "number", &self.input[start..self.pos]));
        }
        Ok(TokenKind::Number(self.input[start..self.pos].to_string()))
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident_continue) {
            self.advance();
        }
        let word = &self.input[start..self.pos];
        match Keyword::lookup(word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(word.to_string()),
        }
    }

    fn parameter(&mut self) -> Result<TokenKind, DatabaseError> {
        let start = self.pos;
        let sigil = self.advance();
        while self.peek(0).is_some_and(is_ident_continue) {
            self.advance();
        }
        if sigil != Some('?') && self.pos - start == 1 {
            return Err(syntax_error(start, "parameter name", &self.input[start..self.pos]));
        }
        Ok(TokenKind::Parameter(self.input[start..self.pos].to_string()))
    }

    fn operator(&mut self) -> Result<TokenKind, DatabaseError> {
        let start = self.pos;
        for (text, kind) in [
            ("<>", TokenKind::Neq),
            ("!=", TokenKind::Neq),
            ("==", TokenKind::Eq),
            ("<=", TokenKind::LtEq),
            (">=", TokenKind::GtEq),
            ("||", TokenKind::Concat),
        ] {
            if self.starts_with(text) {
                self.pos += 2;
                return Ok(kind);
            }
        }

        let ch = self.advance().unwrap_or_default();
        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Asterisk,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Eq,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            other => return Err(syntax_error(start, "token", format!("character '{}'", other))),
        };
        Ok(kind)
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, DatabaseError> {
    Lexer::new(input).tokenize()
}
