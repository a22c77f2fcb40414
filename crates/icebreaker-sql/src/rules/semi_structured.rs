//! Semi-structured data: path accessors, FLATTEN, constructors, VARIANT parsing

use icebreaker_core::UnsupportedConstruct;

use super::{cloud_route_hint, TransformRule};
use crate::lexer::{Token, TokenKind};
use crate::rewrite::{
    apply_edits, named_arg, rewrite_calls, sig_in, CallRewrite, CallSite, Edit, RuleOutput,
};
use crate::stream::TokenStream;

/// Casts that turn an extracted value into text
const STRING_TYPES: &[&str] = &["string", "varchar", "text", "char"];

/// `col:a.b[0]` becomes `json_extract(col, '$.a.b[0]')`
///
/// A trailing string cast (`::string`, `::varchar`) is folded into
/// `json_extract_string`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemiStructuredPath;

struct PathAccess {
    base_start: usize,
    end: usize,
    base: String,
    path: String,
    as_string: bool,
}

impl SemiStructuredPath {
    fn accesses(stream: &TokenStream<'_>) -> Vec<PathAccess> {
        let tokens = &stream.tokens;
        let mut found = Vec::new();
        let mut i = 1;

        while i + 1 < tokens.len() {
            if !(tokens[i].is_symbol(":") && is_name(&tokens[i - 1]) && is_name(&tokens[i + 1])) {
                i += 1;
                continue;
            }

            let mut base_start = i - 1;
            while base_start >= 2
                && tokens[base_start - 1].is_symbol(".")
                && is_name(&tokens[base_start - 2])
            {
                base_start -= 2;
            }

            let (path, mut end) = parse_path(tokens, i + 1);
            let mut as_string = false;

            if let Some(cast) = stream.sig_from(end).filter(|&c| tokens[c].is_symbol("::")) {
                if let Some(ty) = stream.next_sig(cast) {
                    if STRING_TYPES.contains(&tokens[ty].text.to_lowercase().as_str()) {
                        as_string = true;
                        end = ty + 1;
                        if let Some(open) = stream.next_sig(ty).filter(|&o| tokens[o].is_symbol("(")) {
                            if let Some(close) = stream.closing(open) {
                                end = close + 1;
                            }
                        }
                    }
                }
            }

            found.push(PathAccess {
                base_start,
                end,
                base: stream.text(base_start, i).to_string(),
                path,
                as_string,
            });
            i = end;
        }

        found
    }
}

fn is_name(token: &Token<'_>) -> bool {
    matches!(token.kind, TokenKind::Word | TokenKind::QuotedIdent)
}

/// Build a JSON path from adjacent `key`, `.key`, `:key`, `[n]` and `['key']` tokens
fn parse_path(tokens: &[Token<'_>], start: usize) -> (String, usize) {
    let mut path = String::from("$");
    push_key(&mut path, &tokens[start]);
    let mut i = start + 1;

    loop {
        let separator = tokens[i].is_symbol(".") || tokens[i].is_symbol(":");
        if i + 1 < tokens.len() && separator && is_name(&tokens[i + 1]) {
            push_key(&mut path, &tokens[i + 1]);
            i += 2;
        } else if i + 2 < tokens.len() && tokens[i].is_symbol("[") && tokens[i + 2].is_symbol("]") {
            match tokens[i + 1].kind {
                TokenKind::Number => path.push_str(&format!("[{}]", tokens[i + 1].text)),
                TokenKind::StringLit => {
                    let key = tokens[i + 1].string_value().unwrap_or_default();
                    path.push_str(&format!(".\"{}\"", key));
                }
                _ => break,
            }
            i += 3;
        } else {
            break;
        }
    }

    (path, i)
}

fn push_key(path: &mut String, token: &Token<'_>) {
    match token.kind {
        TokenKind::QuotedIdent => path.push_str(&format!(".\"{}\"", token.ident())),
        _ => {
            path.push('.');
            path.push_str(token.text);
        }
    }
}

impl TransformRule for SemiStructuredPath {
    fn name(&self) -> &'static str {
        "semi_structured_path"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn matches(&self, stream: &TokenStream<'_>) -> bool {
        !Self::accesses(stream).is_empty()
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        let edits = Self::accesses(stream)
            .into_iter()
            .map(|access| {
                let function = if access.as_string {
                    "json_extract_string"
                } else {
                    "json_extract"
                };
                Edit::new(
                    access.base_start..access.end,
                    format!("{}({}, '{}')", function, access.base, access.path.replace('\'', "''")),
                )
            })
            .collect();

        RuleOutput {
            sql: apply_edits(stream, edits),
            refused: Vec::new(),
        }
    }
}

/// FLATTEN output columns that UNNEST does not produce
const FLATTEN_ONLY_COLUMNS: &[&str] = &["index", "key", "path", "seq", "this"];

/// Words that end a FROM item instead of aliasing it
const CLAUSE_WORDS: &[&str] = &[
    "on", "where", "join", "left", "right", "inner", "outer", "full", "cross", "natural",
    "group", "order", "limit", "qualify", "having", "union", "window", "using", "lateral",
    "except", "intersect", "minus",
];

/// `[LATERAL] FLATTEN(input => x) f` and `TABLE(FLATTEN(x)) f` become
/// `UNNEST(x) AS f(value)`
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenToUnnest;

impl FlattenToUnnest {
    /// Drop LATERAL and unwrap TABLE(...) around FLATTEN calls
    fn unwrap_edits(stream: &TokenStream<'_>) -> Vec<Edit> {
        let mut edits = Vec::new();

        for call in stream.calls().into_iter().filter(|c| c.name.lower() == "flatten") {
            let Some(prev) = stream.prev_sig(call.name.first) else {
                continue;
            };

            if stream.is_word_at(prev, "lateral") {
                edits.push(Edit::delete(prev..call.name.first));
                continue;
            }

            if stream.is_symbol_at(prev, "(") {
                let table = stream.prev_sig(prev).filter(|&t| stream.is_word_at(t, "table"));
                let outer_close = stream.next_sig(call.close);
                if let (Some(table), Some(outer_close)) = (table, outer_close) {
                    if stream.closing(prev) == Some(outer_close) {
                        edits.push(Edit::delete(table..call.name.first));
                        edits.push(Edit::delete(outer_close..outer_close + 1));
                    }
                }
            }
        }

        edits
    }

    fn convert(site: &CallSite<'_, '_>, stream: &TokenStream<'_>) -> CallRewrite {
        let input = match Self::input_arg(site) {
            Ok(input) => input,
            Err(refused) => return CallRewrite::Refuse(refused),
        };

        let (alias, consumed) = flatten_alias(site.rest);
        let alias_name = alias.clone().unwrap_or_else(|| "flattened".to_string());

        if let Some(column) = flatten_only_column(stream, &alias_name) {
            return CallRewrite::Refuse(
                UnsupportedConstruct::new(
                    format!("FLATTEN column {}", column),
                    cloud_route_hint(&format!("FLATTEN column {}", column)),
                )
                .at(site.position)
                .from_rule("flatten_to_unnest"),
            );
        }

        CallRewrite::Replace {
            text: format!("UNNEST({}) AS {}(value)", input, alias_name),
            consumed,
        }
    }

    fn input_arg(site: &CallSite<'_, '_>) -> Result<String, UnsupportedConstruct> {
        let refuse = |what: String| {
            UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
                .at(site.position)
                .from_rule("flatten_to_unnest")
        };

        if let [only] = site.args.as_slice() {
            if named_arg(only).is_none() {
                return Ok(only.clone());
            }
        }

        let mut input = None;
        for arg in &site.args {
            match named_arg(arg) {
                Some((name, value)) if name == "input" => input = Some(value),
                Some((name, _)) => return Err(refuse(format!("FLATTEN({} => ...)", name.to_uppercase()))),
                None => return Err(refuse("FLATTEN with positional arguments".to_string())),
            }
        }

        input.ok_or_else(|| refuse("FLATTEN without input".to_string()))
    }
}

/// `[AS] alias` right after the call; returns the alias and tokens consumed
fn flatten_alias(rest: &[Token<'_>]) -> (Option<String>, usize) {
    let Some(mut i) = sig_in(rest, 0) else {
        return (None, 0);
    };
    if rest[i].is_word("as") {
        match sig_in(rest, i + 1) {
            Some(next) => i = next,
            None => return (None, 0),
        }
    }

    let token = &rest[i];
    if token.kind == TokenKind::Word && !CLAUSE_WORDS.contains(&token.text.to_lowercase().as_str()) {
        return (Some(token.text.to_string()), i + 1);
    }
    (None, 0)
}

/// `alias.index` style references to columns UNNEST cannot provide
fn flatten_only_column(stream: &TokenStream<'_>, alias: &str) -> Option<String> {
    let tokens = &stream.tokens;
    (0..tokens.len().saturating_sub(2)).find_map(|i| {
        let column = tokens[i + 2].text.to_lowercase();
        (tokens[i].kind == TokenKind::Word
            && tokens[i].text.eq_ignore_ascii_case(alias)
            && tokens[i + 1].is_symbol(".")
            && tokens[i + 2].kind == TokenKind::Word
            && FLATTEN_ONLY_COLUMNS.contains(&column.as_str()))
        .then(|| format!("{}.{}", tokens[i].text, tokens[i + 2].text))
    })
}

impl TransformRule for FlattenToUnnest {
    fn name(&self) -> &'static str {
        "flatten_to_unnest"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn handles(&self) -> &'static [&'static str] {
        &["flatten"]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        let unwrapped = apply_edits(stream, Self::unwrap_edits(stream));
        let stream = match TokenStream::new(&unwrapped) {
            Ok(stream) => stream,
            Err(e) => {
                return RuleOutput {
                    sql: stream.sql.to_string(),
                    refused: vec![UnsupportedConstruct::new(e.to_string(), "fix the SQL syntax")
                        .at(e.position())
                        .from_rule(self.name())],
                }
            }
        };

        rewrite_calls(&stream, |site| {
            if site.lower == "flatten" {
                Self::convert(site, &stream)
            } else {
                CallRewrite::Keep
            }
        })
    }
}

/// `ARRAY_CONSTRUCT` becomes `LIST_VALUE`, `OBJECT_CONSTRUCT` becomes `JSON_OBJECT`
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectArrayConstructors;

impl TransformRule for ObjectArrayConstructors {
    fn name(&self) -> &'static str {
        "object_array_constructors"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn handles(&self) -> &'static [&'static str] {
        &["array_construct", "object_construct", "object_construct_keep_null"]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| match site.lower.as_str() {
            "array_construct" => CallRewrite::replace(format!("LIST_VALUE({})", site.args.join(", "))),
            "object_construct" | "object_construct_keep_null" => {
                if site.args.iter().any(|a| a == "*") || site.args.len() % 2 != 0 {
                    let what = format!("{}({})", site.upper(), site.args.join(", "));
                    CallRewrite::Refuse(
                        UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
                            .at(site.position)
                            .from_rule(self.name()),
                    )
                } else {
                    CallRewrite::replace(format!("JSON_OBJECT({})", site.args.join(", ")))
                }
            }
            _ => CallRewrite::Keep,
        })
    }
}

/// `PARSE_JSON(x)` and `TO_VARIANT(x)` become `CAST(x AS VARIANT)`
///
/// The VARIANT type name is left for `cast_types`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariantConversions;

impl TransformRule for VariantConversions {
    fn name(&self) -> &'static str {
        "variant_conversions"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn handles(&self) -> &'static [&'static str] {
        &["parse_json", "try_parse_json", "to_variant"]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| {
            let cast = match site.lower.as_str() {
                "parse_json" | "to_variant" => "CAST",
                "try_parse_json" => "TRY_CAST",
                _ => return CallRewrite::Keep,
            };
            match site.args.as_slice() {
                [value] => CallRewrite::replace(format!("{}({} AS VARIANT)", cast, value)),
                _ => {
                    let what = format!("{} with {} arguments", site.upper(), site.args.len());
                    CallRewrite::Refuse(
                        UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
                            .at(site.position)
                            .from_rule(self.name()),
                    )
                }
            }
        })
    }
}
