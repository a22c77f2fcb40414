//! Token stream navigation: significant-token lookups, paren matching,
//! dotted names and function call detection

use crate::lexer::{tokenize, LexError, Token, TokenKind};

/// Keywords that are followed by `(` without being function calls
pub const NON_CALL_KEYWORDS: &[&str] = &[
    "all", "and", "any", "as", "between", "by", "case", "check", "else", "exists", "filter",
    "from", "group", "having", "in", "interval", "into", "is", "join", "lateral", "like",
    "ilike", "not", "of", "on", "or", "over", "partition", "qualify", "returning", "rlike",
    "select", "set", "some", "table", "then", "union", "using", "values", "when", "where",
    "window", "with", "within", "except", "intersect", "minus", "primary", "key", "unique",
    "references", "exclude", "rename", "pivot", "unpivot", "match_recognize",
    "limit", "offset", "order", "row", "rows", "range", "array",
];

/// Words after which a `name(` is a definition or column list, not a call
const DEFINITION_PREFIXES: &[&str] = &[
    "into", "table", "view", "function", "procedure", "exists", "as", "index", "type",
];

/// Words that put the next name in relation position
pub const RELATION_KEYWORDS: &[&str] = &["from", "join", "into", "update"];

/// A possibly dotted name: `a`, `db.schema.t`, `"Q".x`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DottedName {
    /// Unquoted parts, case preserved
    pub parts: Vec<String>,

    /// Raw text as written
    pub text: String,

    /// Index of the first token
    pub first: usize,

    /// Index of the last token (inclusive)
    pub last: usize,

    /// Byte offset
    pub position: usize,
}

impl DottedName {
    /// Lowercased, dot-joined name
    pub fn lower(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A function call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: DottedName,

    /// Index of `(`
    pub open: usize,

    /// Index of the matching `)`
    pub close: usize,
}

/// Tokenized SQL with precomputed paren matching
#[derive(Debug, Clone)]
pub struct TokenStream<'a> {
    pub sql: &'a str,
    pub tokens: Vec<Token<'a>>,
    closing: Vec<Option<usize>>,
}

impl<'a> TokenStream<'a> {
    pub fn new(sql: &'a str) -> Result<Self, LexError> {
        let tokens = tokenize(sql)?;
        let mut closing = vec![None; tokens.len()];
        let mut stack = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            if token.is_symbol("(") {
                stack.push(i);
            } else if token.is_symbol(")") {
                if let Some(open) = stack.pop() {
                    closing[open] = Some(i);
                }
            }
        }

        Ok(Self { sql, tokens, closing })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Token<'a>> {
        self.tokens.get(i)
    }

    /// First significant token after `i`
    pub fn next_sig(&self, i: usize) -> Option<usize> {
        (i + 1..self.tokens.len()).find(|&j| !self.tokens[j].is_trivia())
    }

    /// First significant token at or after `i`
    pub fn sig_from(&self, i: usize) -> Option<usize> {
        (i..self.tokens.len()).find(|&j| !self.tokens[j].is_trivia())
    }

    /// Last significant token before `i`
    pub fn prev_sig(&self, i: usize) -> Option<usize> {
        (0..i).rev().find(|&j| !self.tokens[j].is_trivia())
    }

    /// Matching `)` for a `(` token
    pub fn closing(&self, open: usize) -> Option<usize> {
        self.closing.get(open).copied().flatten()
    }

    /// Text covering tokens `from..to` (exclusive)
    pub fn text(&self, from: usize, to: usize) -> &'a str {
        if from >= to || from >= self.tokens.len() {
            return "";
        }
        let start = self.tokens[from].start;
        let end = self.tokens[to.min(self.tokens.len()) - 1].end();
        &self.sql[start..end]
    }

    pub fn is_word_at(&self, i: usize, keyword: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_word(keyword))
    }

    pub fn is_symbol_at(&self, i: usize, symbol: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_symbol(symbol))
    }

    /// Lowercased word at `i`, if it is a word
    pub fn word_lower(&self, i: usize) -> Option<String> {
        self.tokens
            .get(i)
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.to_lowercase())
    }

    /// Dotted name starting at `i`
    ///
    /// Returns `None` when `i` is not a name or is the middle of one.
    pub fn dotted_name(&self, i: usize) -> Option<DottedName> {
        let first = self.tokens.get(i)?;
        if !matches!(first.kind, TokenKind::Word | TokenKind::QuotedIdent) {
            return None;
        }
        if i > 0 && self.tokens[i - 1].is_symbol(".") {
            return None;
        }

        let mut parts = vec![first.ident()];
        let mut last = i;
        while self.is_symbol_at(last + 1, ".")
            && self
                .tokens
                .get(last + 2)
                .is_some_and(|t| matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent))
        {
            last += 2;
            parts.push(self.tokens[last].ident());
        }

        Some(DottedName {
            parts,
            text: self.text(i, last + 1).to_string(),
            first: i,
            last,
            position: first.start,
        })
    }

    /// Function call whose name starts at `i`
    pub fn call_at(&self, i: usize) -> Option<Call> {
        let name = self.dotted_name(i)?;
        if self.tokens[i].kind != TokenKind::Word {
            return None;
        }

        let open = self.next_sig(name.last)?;
        if !self.tokens[open].is_symbol("(") {
            return None;
        }
        let close = self.closing(open)?;

        if name.parts.len() == 1 && NON_CALL_KEYWORDS.contains(&name.lower().as_str()) {
            return None;
        }

        if let Some(prev) = self.prev_sig(i) {
            let token = &self.tokens[prev];
            if token.is_symbol("::") {
                return None;
            }
            if token.kind == TokenKind::Word
                && DEFINITION_PREFIXES.contains(&token.text.to_lowercase().as_str())
            {
                return None;
            }
        }

        Some(Call { name, open, close })
    }

    /// All call sites in token order
    pub fn calls(&self) -> Vec<Call> {
        (0..self.tokens.len()).filter_map(|i| self.call_at(i)).collect()
    }

    /// Call whose argument list opens at the `(` token `open`
    ///
    /// Walks back over the dotted name in front of the paren only.
    pub fn call_opened_by(&self, open: usize) -> Option<Call> {
        let mut start = self.prev_sig(open)?;
        while start >= 2
            && self.tokens[start - 1].is_symbol(".")
            && matches!(self.tokens[start - 2].kind, TokenKind::Word | TokenKind::QuotedIdent)
        {
            start -= 2;
        }
        self.call_at(start).filter(|call| call.open == open)
    }

    /// Token indices where a type name starts: after `::` and after `AS`
    /// inside `CAST(...)` or `TRY_CAST(...)`
    pub fn type_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..self.tokens.len())
            .filter(|&i| self.tokens[i].is_symbol("::"))
            .filter_map(|i| self.next_sig(i))
            .collect();

        for call in self.calls() {
            let lower = call.name.lower();
            if lower != "cast" && lower != "try_cast" {
                continue;
            }
            let mut j = call.open + 1;
            while j < call.close {
                if self.is_symbol_at(j, "(") {
                    j = self.closing(j).unwrap_or(call.close) + 1;
                    continue;
                }
                if self.is_word_at(j, "as") {
                    positions.extend(self.next_sig(j));
                    break;
                }
                j += 1;
            }
        }

        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Whether the name starting at `i` sits where a relation is expected
    pub fn in_relation_position(&self, i: usize) -> bool {
        self.prev_sig(i)
            .and_then(|p| self.word_lower(p))
            .is_some_and(|w| RELATION_KEYWORDS.contains(&w.as_str()))
    }

    /// Split the inside of a paren pair at top-level commas
    ///
    /// Each range covers the raw tokens between separators, trivia included.
    /// An empty or whitespace-only interior yields no ranges.
    pub fn split_args(&self, open: usize, close: usize) -> Vec<std::ops::Range<usize>> {
        let inner = open + 1..close;
        if inner.clone().all(|j| self.tokens[j].is_trivia()) {
            return Vec::new();
        }

        let mut ranges = Vec::new();
        let mut depth = 0usize;
        let mut start = inner.start;
        for j in inner.clone() {
            let token = &self.tokens[j];
            if token.is_symbol("(") || token.is_symbol("[") {
                depth += 1;
            } else if token.is_symbol(")") || token.is_symbol("]") {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && token.is_symbol(",") {
                ranges.push(start..j);
                start = j + 1;
            }
        }
        ranges.push(start..inner.end);
        ranges
    }
}
