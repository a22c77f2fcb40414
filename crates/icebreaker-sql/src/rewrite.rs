//! Rewrite primitives shared by the transform rules
//!
//! Two styles are supported: token-range edits for local syntax (quoting,
//! casts, path accessors) and an inner-first call walker for function
//! rewrites, where a handler sees each call with its arguments already
//! rewritten.

use icebreaker_core::UnsupportedConstruct;
use std::ops::Range;

use crate::lexer::{tokenize, Token, TokenKind};
use crate::stream::{DottedName, TokenStream};

/// Result of running one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutput {
    pub sql: String,
    pub refused: Vec<UnsupportedConstruct>,
}

impl RuleOutput {
    pub fn unchanged(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            refused: Vec::new(),
        }
    }
}

/// Replace tokens `from..to` with `text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub from: usize,
    pub to: usize,
    pub text: String,
}

impl Edit {
    pub fn new(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            from: range.start,
            to: range.end,
            text: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, "")
    }
}

/// Apply non-overlapping edits; an edit overlapping an earlier one is dropped
pub fn apply_edits(stream: &TokenStream<'_>, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.from, e.to));

    let mut out = String::with_capacity(stream.sql.len());
    let mut i = 0;
    for edit in edits {
        if edit.from < i {
            continue;
        }
        out.push_str(stream.text(i, edit.from));
        out.push_str(&edit.text);
        i = edit.to;
    }
    out.push_str(stream.text(i, stream.len()));
    out
}

/// A call as seen by a rewrite handler
#[derive(Debug)]
pub struct CallSite<'s, 'a> {
    pub name: &'s DottedName,

    /// Lowercased dotted name
    pub lower: String,

    /// Arguments, already rewritten and trimmed
    pub args: Vec<String>,

    /// Raw tokens after the closing paren, up to the end of the enclosing group
    pub rest: &'s [Token<'a>],

    /// Byte offset of the call in the rule's input
    pub position: usize,
}

impl CallSite<'_, '_> {
    /// Name in upper case, for messages
    pub fn upper(&self) -> String {
        self.lower.to_uppercase()
    }
}

/// What a handler wants done with a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRewrite {
    /// Leave the call (its rewritten arguments are still emitted)
    Keep,

    /// Replace the call, also swallowing `consumed` raw tokens of `rest`
    Replace { text: String, consumed: usize },

    /// Leave the call and report it
    Refuse(UnsupportedConstruct),
}

impl CallRewrite {
    pub fn replace(text: impl Into<String>) -> Self {
        Self::Replace {
            text: text.into(),
            consumed: 0,
        }
    }
}

/// Walk every call inner-first and let `handler` rewrite it
pub fn rewrite_calls<F>(stream: &TokenStream<'_>, handler: F) -> RuleOutput
where
    F: FnMut(&CallSite<'_, '_>) -> CallRewrite,
{
    let mut walker = Walker {
        stream,
        handler,
        refused: Vec::new(),
    };
    let sql = walker.walk(0..stream.len());
    RuleOutput {
        sql,
        refused: walker.refused,
    }
}

struct Walker<'s, 'a, F> {
    stream: &'s TokenStream<'a>,
    handler: F,
    refused: Vec<UnsupportedConstruct>,
}

impl<'s, 'a, F> Walker<'s, 'a, F>
where
    F: FnMut(&CallSite<'_, '_>) -> CallRewrite,
{
    fn walk(&mut self, range: Range<usize>) -> String {
        let stream = self.stream;
        let mut out = String::new();
        let mut i = range.start;

        while i < range.end {
            let Some(call) = stream.call_at(i).filter(|c| c.close < range.end) else {
                out.push_str(stream.tokens[i].text);
                i += 1;
                continue;
            };

            let raw_args: Vec<String> = stream
                .split_args(call.open, call.close)
                .into_iter()
                .map(|r| self.walk(r))
                .collect();

            let rest = &stream.tokens[call.close + 1..range.end];
            let site = CallSite {
                name: &call.name,
                lower: call.name.lower(),
                args: raw_args.iter().map(|a| a.trim().to_string()).collect(),
                rest,
                position: call.name.position,
            };

            match (self.handler)(&site) {
                CallRewrite::Replace { text, consumed } => {
                    out.push_str(&text);
                    i = call.close + 1 + consumed.min(rest.len());
                    continue;
                }
                CallRewrite::Refuse(construct) => self.refused.push(construct),
                CallRewrite::Keep => {}
            }

            out.push_str(stream.text(i, call.open + 1));
            out.push_str(&raw_args.join(","));
            out.push(')');
            i = call.close + 1;
        }

        out
    }
}

/// Index of the first significant token at or after `from`
pub fn sig_in(tokens: &[Token<'_>], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Matching `)` for the `(` at `open` inside a token slice
pub fn close_in(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_symbol("(") {
            depth += 1;
        } else if token.is_symbol(")") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Concatenated text of a token slice
pub fn tokens_text(tokens: &[Token<'_>]) -> String {
    tokens.iter().map(|t| t.text).collect()
}

/// `name => value` argument, name lowercased
pub fn named_arg(arg: &str) -> Option<(String, String)> {
    let tokens = tokenize(arg).ok()?;
    let first = sig_in(&tokens, 0)?;
    if tokens[first].kind != TokenKind::Word {
        return None;
    }
    let arrow = sig_in(&tokens, first + 1)?;
    if !tokens[arrow].is_symbol("=>") {
        return None;
    }
    let value = tokens_text(&tokens[arrow + 1..]);
    Some((tokens[first].text.to_lowercase(), value.trim().to_string()))
}

/// Bare word, quoted identifier or string literal as a lowercase keyword
pub fn keyword_arg(arg: &str) -> Option<String> {
    let tokens = tokenize(arg).ok()?;
    let mut sig = tokens.iter().filter(|t| !t.is_trivia());
    let token = sig.next()?;
    if sig.next().is_some() {
        return None;
    }
    let word = match token.kind {
        TokenKind::Word | TokenKind::QuotedIdent => token.ident(),
        TokenKind::StringLit => token.string_value()?,
        _ => return None,
    };
    Some(word.to_lowercase())
}

/// Unsigned integer literal
pub fn integer_arg(arg: &str) -> Option<u32> {
    arg.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn edits_preserve_untouched_text() {
        let stream = TokenStream::new("SELECT a ,  b FROM t").unwrap();
        let b = stream.tokens.iter().position(|t| t.text == "b").unwrap();
        let out = apply_edits(&stream, vec![Edit::new(b..b + 1, "c"), Edit::delete(0..1)]);
        assert_eq!(out, " a ,  c FROM t");
    }

    #[test]
    fn walker_is_inner_first() {
        let stream = TokenStream::new("SELECT f(f(x), g( y ))").unwrap();
        let mut seen = Vec::new();
        let out = rewrite_calls(&stream, |site| {
            seen.push(format!("{}:{}", site.lower, site.args.join("|")));
            if site.lower == "f" {
                CallRewrite::replace(format!("F[{}]", site.args.join(", ")))
            } else {
                CallRewrite::Keep
            }
        });

        assert_eq!(out.sql, "SELECT F[F[x], g( y )]");
        assert_eq!(seen, vec!["f:x", "g:y", "f:F[x]|g( y )"]);
    }

    #[test]
    fn walker_can_swallow_following_tokens() {
        let stream = TokenStream::new("SELECT agg(x) WITHIN GROUP (ORDER BY y) FROM t").unwrap();
        let out = rewrite_calls(&stream, |site| {
            let consumed = site.rest.iter().position(|t| t.text == ")").map_or(0, |p| p + 1);
            CallRewrite::Replace {
                text: "agg2(x)".to_string(),
                consumed,
            }
        });
        assert_eq!(out.sql, "SELECT agg2(x) FROM t");
    }

    #[test]
    fn argument_helpers() {
        assert_eq!(named_arg("input => t.arr"), Some(("input".to_string(), "t.arr".to_string())));
        assert_eq!(named_arg("t.arr"), None);
        assert_eq!(keyword_arg(" 'Day' "), Some("day".to_string()));
        assert_eq!(keyword_arg("MONTH"), Some("month".to_string()));
        assert_eq!(keyword_arg("a + b"), None);
        assert_eq!(integer_arg(" 38 "), Some(38));
    }
}
