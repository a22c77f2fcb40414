//! Lossless SQL tokenizer
//!
//! Every byte of the input belongs to exactly one token, so concatenating the
//! token texts reproduces the input. Rewrites are expressed as edits over
//! token ranges and never have to re-serialize an AST.

use std::fmt;

/// Token category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or unquoted identifier (may contain `$`)
    Word,

    /// `"quoted identifier"`
    QuotedIdent,

    /// `'string'` or `$$string$$`
    StringLit,

    Number,
    Whitespace,

    /// `-- line`, `// line` or `/* block */`
    Comment,

    /// Stage reference: `@stage/path`, `@~`, `@%table`
    Stage,

    /// Operator or punctuation
    Symbol,
}

/// A slice of the input with its byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whitespace and comments
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Case-insensitive keyword check
    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    /// Identifier text without quotes (`""` unescaped)
    pub fn ident(&self) -> String {
        match self.kind {
            TokenKind::QuotedIdent => {
                let inner = &self.text[1..self.text.len().saturating_sub(1).max(1)];
                inner.replace("\"\"", "\"")
            }
            _ => self.text.to_string(),
        }
    }

    /// String literal contents without delimiters
    pub fn string_value(&self) -> Option<String> {
        if self.kind != TokenKind::StringLit {
            return None;
        }
        if let Some(inner) = self.text.strip_prefix("$$").and_then(|t| t.strip_suffix("$$")) {
            return Some(inner.to_string());
        }
        let inner = &self.text[1..self.text.len() - 1];
        Some(inner.replace("''", "'").replace("\\'", "'"))
    }
}

/// Tokenizer failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("Unterminated {what} starting at offset {position}")]
    Unterminated { what: &'static str, position: usize },
}

impl LexError {
    pub fn position(&self) -> usize {
        match self {
            Self::Unterminated { position, .. } => *position,
        }
    }
}

const MULTI_CHAR_SYMBOLS: [&str; 11] = ["->>", "::", "=>", ":=", "->", "<=", ">=", "<>", "!=", "||", "=="];

/// Split SQL into tokens
pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, LexError> {
    Lexer { sql, pos: 0 }.run()
}

struct Lexer<'a> {
    sql: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        let mut tokens = Vec::new();

        while self.pos < self.sql.len() {
            let start = self.pos;
            let kind = self.next_kind()?;
            tokens.push(Token {
                kind,
                text: &self.sql[start..self.pos],
                start,
            });
        }

        Ok(tokens)
    }

    fn rest(&self) -> &'a str {
        &self.sql[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
    }

    fn next_kind(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let rest = self.rest();
        let Some(c) = self.peek() else {
            return Ok(TokenKind::Whitespace);
        };

        if c.is_whitespace() {
            self.eat_while(char::is_whitespace);
            return Ok(TokenKind::Whitespace);
        }

        if rest.starts_with("--") || rest.starts_with("//") {
            self.eat_while(|c| c != '\n');
            return Ok(TokenKind::Comment);
        }

        if rest.starts_with("/*") {
            return match rest[2..].find("*/") {
                Some(end) => {
                    self.pos += 2 + end + 2;
                    Ok(TokenKind::Comment)
                }
                None => Err(LexError::Unterminated {
                    what: "block comment",
                    position: start,
                }),
            };
        }

        if rest.starts_with("$$") {
            return match rest[2..].find("$$") {
                Some(end) => {
                    self.pos += 2 + end + 2;
                    Ok(TokenKind::StringLit)
                }
                None => Err(LexError::Unterminated {
                    what: "dollar-quoted string",
                    position: start,
                }),
            };
        }

        match c {
            '\'' => {
                self.bump();
                self.quoted('\'', true, "string literal", start)?;
                Ok(TokenKind::StringLit)
            }
            '"' => {
                self.bump();
                self.quoted('"', false, "quoted identifier", start)?;
                Ok(TokenKind::QuotedIdent)
            }
            '@' if matches!(self.peek_nth(1), Some(n) if n == '~' || n == '%' || n == '"' || is_ident_start(n)) => {
                self.bump();
                self.eat_while(|c| !c.is_whitespace() && !matches!(c, ',' | ')' | '(' | ';'));
                Ok(TokenKind::Stage)
            }
            '$' if matches!(self.peek_nth(1), Some(n) if n.is_ascii_digit()) => {
                self.bump();
                self.eat_while(|c| c.is_ascii_digit());
                Ok(TokenKind::Word)
            }
            c if is_ident_start(c) => {
                self.eat_while(is_ident_char);
                Ok(TokenKind::Word)
            }
            c if c.is_ascii_digit() => {
                self.number();
                Ok(TokenKind::Number)
            }
            _ => {
                match MULTI_CHAR_SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
                    Some(sym) => self.pos += sym.len(),
                    None => {
                        self.bump();
                    }
                }
                Ok(TokenKind::Symbol)
            }
        }
    }

    /// Consume up to and including the closing delimiter; a doubled delimiter is an escape
    fn quoted(
        &mut self,
        delim: char,
        backslash_escapes: bool,
        what: &'static str,
        start: usize,
    ) -> Result<(), LexError> {
        while let Some(c) = self.bump() {
            if backslash_escapes && c == '\\' {
                self.bump();
                continue;
            }
            if c == delim {
                if self.peek() == Some(delim) {
                    self.bump();
                    continue;
                }
                return Ok(());
            }
        }

        Err(LexError::Unterminated { what, position: start })
    }

    fn number(&mut self) {
        self.eat_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && matches!(self.peek_nth(1), Some(d) if d.is_ascii_digit()) {
            self.bump();
            self.eat_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_nth(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if matches!(self.peek_nth(digit_at), Some(d) if d.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.bump();
                }
                self.eat_while(|c| c.is_ascii_digit());
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Word => "word",
            Self::QuotedIdent => "quoted identifier",
            Self::StringLit => "string",
            Self::Number => "number",
            Self::Whitespace => "whitespace",
            Self::Comment => "comment",
            Self::Stage => "stage",
            Self::Symbol => "symbol",
        };
        f.write_str(name)
    }
}
