//! Quoted identifier normalization

use super::TransformRule;
use crate::lexer::TokenKind;
use crate::rewrite::{apply_edits, Edit, RuleOutput};
use crate::stream::TokenStream;

/// Words that must stay quoted when used as identifiers
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "between",
    "both", "by", "case", "cast", "check", "collate", "column", "constraint", "create", "cross",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "date", "default", "deferrable", "delete", "desc", "distinct", "do", "else", "end",
    "except", "exists", "false", "fetch", "for", "foreign", "from", "full", "grant", "group",
    "having", "ilike", "in", "initially", "inner", "insert", "intersect", "interval", "into",
    "is", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "minus", "natural", "not", "null", "offset", "on", "only", "or", "order",
    "outer", "over", "partition", "pivot", "placing", "primary", "qualify", "range",
    "references", "returning", "right", "row", "rows", "sample", "select", "session_user",
    "set", "some", "symmetric", "table", "then", "time", "timestamp", "to", "trailing",
    "true", "union", "unique", "unpivot", "update", "user", "using", "values", "variadic",
    "when", "where", "window", "with",
];

/// `"UPPER_ID"` becomes `upper_id`
///
/// Snowflake folds unquoted identifiers to upper case, so an all-caps quoted
/// identifier names the same column as the unquoted one. DuckDB matches
/// identifiers case-insensitively, so the quotes can go. Mixed case,
/// reserved words and keys inside semi-structured paths keep their quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierQuoting;

impl IdentifierQuoting {
    fn edits(stream: &TokenStream<'_>) -> Vec<Edit> {
        stream
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TokenKind::QuotedIdent)
            .filter(|(i, _)| !in_path(stream, *i))
            .filter_map(|(i, t)| foldable(&t.ident()).map(|folded| Edit::new(i..i + 1, folded)))
            .collect()
    }
}

impl TransformRule for IdentifierQuoting {
    fn name(&self) -> &'static str {
        "identifier_quoting"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn matches(&self, stream: &TokenStream<'_>) -> bool {
        !Self::edits(stream).is_empty()
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        RuleOutput {
            sql: apply_edits(stream, Self::edits(stream)),
            refused: Vec::new(),
        }
    }
}

fn foldable(ident: &str) -> Option<String> {
    let mut chars = ident.chars();
    let first = chars.next()?;
    if !(first.is_ascii_uppercase() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
        return None;
    }

    let lower = ident.to_ascii_lowercase();
    if RESERVED.contains(&lower.as_str()) {
        return None;
    }
    Some(lower)
}

/// Whether the token at `i` is a key of a `col:key.key` path
fn in_path(stream: &TokenStream<'_>, i: usize) -> bool {
    let mut j = i;
    while j > 0 {
        let prev = &stream.tokens[j - 1];
        match prev.kind {
            TokenKind::Symbol if prev.text == ":" => return true,
            TokenKind::Symbol if matches!(prev.text, "." | "[" | "]") => j -= 1,
            TokenKind::Word | TokenKind::QuotedIdent | TokenKind::Number | TokenKind::StringLit => {
                j -= 1
            }
            _ => return false,
        }
    }
    false
}
