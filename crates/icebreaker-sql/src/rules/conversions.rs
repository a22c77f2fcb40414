//! Conversion functions and type names

use icebreaker_core::UnsupportedConstruct;

use super::{cloud_route_hint, TransformRule};
use crate::lexer::TokenKind;
use crate::rewrite::{apply_edits, integer_arg, rewrite_calls, CallRewrite, CallSite, Edit, RuleOutput};
use crate::stream::TokenStream;

/// Target type of a conversion function, or `None` if it is not one
fn conversion_target(name: &str) -> Option<&'static str> {
    let target = match name {
        "to_number" | "to_decimal" | "to_numeric" => "NUMBER",
        "to_double" => "DOUBLE",
        "to_boolean" => "BOOLEAN",
        "to_date" => "DATE",
        "to_time" => "TIME",
        "to_timestamp" | "to_timestamp_ntz" => "TIMESTAMP_NTZ",
        "to_timestamp_ltz" => "TIMESTAMP_LTZ",
        "to_timestamp_tz" => "TIMESTAMP_TZ",
        "to_varchar" | "to_char" => "VARCHAR",
        _ => return None,
    };
    Some(target)
}

/// Rewrite a conversion call as `cast(value AS target)`
///
/// Numeric targets accept precision and scale arguments; any other extra
/// argument is a format string and is refused.
fn convert(site: &CallSite<'_, '_>, cast: &str, target: &str, rule: &str) -> CallRewrite {
    let refuse = |what: String| {
        CallRewrite::Refuse(
            UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
                .at(site.position)
                .from_rule(rule),
        )
    };

    match site.args.as_slice() {
        [value] => CallRewrite::replace(format!("{}({} AS {})", cast, value, target)),
        [value, precision, rest @ ..] if target == "NUMBER" && rest.len() <= 1 => {
            let scale = rest.first().map(|s| integer_arg(s)).unwrap_or(Some(0));
            match (integer_arg(precision), scale) {
                (Some(p), Some(s)) => {
                    CallRewrite::replace(format!("{}({} AS NUMBER({}, {}))", cast, value, p, s))
                }
                _ => refuse(format!("{} with format argument", site.upper())),
            }
        }
        [] => refuse(format!("{} without arguments", site.upper())),
        _ => refuse(format!("{} with format argument", site.upper())),
    }
}

/// Microseconds since the epoch for a numeric literal with a Snowflake scale
///
/// Scale 0 reads the literal as seconds, 3 as milliseconds, up to 9 for
/// nanoseconds. Returns `None` for anything but a plain decimal literal.
fn epoch_micros(literal: &str, scale: u32) -> Option<i128> {
    let (negative, digits) = match literal.trim().strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, literal.trim()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
        || scale > 9
    {
        return None;
    }

    // 15 fractional digits covers nanosecond scale
    let fraction = format!("{:0<15}", fraction);
    let units = whole.parse::<i128>().ok()?.checked_mul(10i128.pow(15))?
        + fraction[..15].parse::<i128>().ok()?;
    let micros = units / 10i128.pow(9 + scale);
    Some(if negative { -micros } else { micros })
}

/// `TO_TIMESTAMP(<numeric literal>[, scale])` reads an epoch, which a cast cannot
fn epoch_conversion(site: &CallSite<'_, '_>, target: &str) -> Option<CallRewrite> {
    let micros = match site.args.as_slice() {
        [value] => epoch_micros(value, 0),
        [value, scale] => epoch_micros(value, integer_arg(scale)?),
        _ => None,
    }?;

    let timestamp = format!("make_timestamp({})", micros);
    Some(CallRewrite::replace(match target {
        "TIMESTAMP_NTZ" => timestamp,
        _ => format!("({} AT TIME ZONE 'UTC')", timestamp),
    }))
}

/// `TRY_TO_NUMBER(x)` and friends become `TRY_CAST(x AS ...)`
#[derive(Debug, Clone, Copy, Default)]
pub struct TryConversions;

impl TransformRule for TryConversions {
    fn name(&self) -> &'static str {
        "try_conversions"
    }

    fn priority(&self) -> u32 {
        60
    }

    fn handles(&self) -> &'static [&'static str] {
        &[
            "try_to_number",
            "try_to_decimal",
            "try_to_numeric",
            "try_to_double",
            "try_to_boolean",
            "try_to_date",
            "try_to_time",
            "try_to_timestamp",
            "try_to_timestamp_ntz",
            "try_to_timestamp_ltz",
            "try_to_timestamp_tz",
        ]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| {
            let target = site
                .lower
                .strip_prefix("try_")
                .and_then(conversion_target)
                .filter(|_| self.handles().contains(&site.lower.as_str()));
            match target {
                Some(target) => convert(site, "TRY_CAST", target, self.name()),
                None => CallRewrite::Keep,
            }
        })
    }
}

/// `TO_TIMESTAMP(x)`, `TO_DATE(x)` and the other single-argument
/// conversions become `CAST(x AS ...)`
///
/// Timestamp conversions of a numeric literal are epoch reads and become
/// `make_timestamp(<microseconds>)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampConversions;

impl TransformRule for TimestampConversions {
    fn name(&self) -> &'static str {
        "timestamp_conversions"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn handles(&self) -> &'static [&'static str] {
        &[
            "to_timestamp",
            "to_timestamp_ntz",
            "to_timestamp_ltz",
            "to_timestamp_tz",
            "to_date",
            "to_time",
            "to_number",
            "to_decimal",
            "to_numeric",
            "to_double",
            "to_boolean",
            "to_varchar",
            "to_char",
        ]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| match conversion_target(&site.lower) {
            Some(target) if target.starts_with("TIMESTAMP") => epoch_conversion(site, target)
                .unwrap_or_else(|| convert(site, "CAST", target, self.name())),
            Some(target) => convert(site, "CAST", target, self.name()),
            None => CallRewrite::Keep,
        })
    }
}

enum TypeMapping {
    Keep,
    Replace(String),
    Refuse,
}

/// Snowflake type name to DuckDB type name
fn map_type(name: &str, params: Option<&str>) -> TypeMapping {
    let params: Option<Vec<&str>> = params.map(|p| p.split(',').map(str::trim).collect());

    match name {
        "variant" | "object" | "array" => match params {
            None => TypeMapping::Replace("JSON".to_string()),
            Some(_) => TypeMapping::Refuse,
        },
        "number" | "numeric" | "decimal" => match params.as_deref() {
            None => TypeMapping::Replace("DECIMAL(38, 0)".to_string()),
            Some(_) if name == "decimal" => TypeMapping::Keep,
            Some([p]) => TypeMapping::Replace(format!("DECIMAL({}, 0)", p)),
            Some([p, s]) => TypeMapping::Replace(format!("DECIMAL({}, {})", p, s)),
            Some(_) => TypeMapping::Refuse,
        },
        "float" | "float4" | "float8" | "real" => TypeMapping::Replace("DOUBLE".to_string()),
        "timestamp_ntz" | "datetime" => TypeMapping::Replace("TIMESTAMP".to_string()),
        "timestamp" if params.is_some() => TypeMapping::Replace("TIMESTAMP".to_string()),
        "timestamp_ltz" | "timestamp_tz" => TypeMapping::Replace("TIMESTAMPTZ".to_string()),
        "string" => match params {
            None => TypeMapping::Replace("VARCHAR".to_string()),
            Some(p) => TypeMapping::Replace(format!("VARCHAR({})", p.join(", "))),
        },
        "binary" | "varbinary" => TypeMapping::Replace("BLOB".to_string()),
        _ => TypeMapping::Keep,
    }
}

/// Type names after `::` and inside `CAST(... AS type)` map to DuckDB types
///
/// Runs last so the casts produced by the conversion rules are covered.
#[derive(Debug, Clone, Copy, Default)]
pub struct CastTypes;

impl CastTypes {
    fn scan(&self, stream: &TokenStream<'_>) -> (Vec<Edit>, Vec<UnsupportedConstruct>) {
        let mut edits = Vec::new();
        let mut refused = Vec::new();

        for i in stream.type_positions() {
            let token = &stream.tokens[i];
            if token.kind != TokenKind::Word {
                continue;
            }

            let (params, end) = match stream.next_sig(i).filter(|&o| stream.is_symbol_at(o, "(")) {
                Some(open) => match stream.closing(open) {
                    Some(close) => (Some(stream.text(open + 1, close)), close + 1),
                    None => (None, i + 1),
                },
                None => (None, i + 1),
            };

            match map_type(&token.text.to_lowercase(), params) {
                TypeMapping::Keep => {}
                TypeMapping::Replace(text) => edits.push(Edit::new(i..end, text)),
                TypeMapping::Refuse => {
                    let what = format!("{} type", stream.text(i, end).to_uppercase());
                    refused.push(
                        UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
                            .at(token.start)
                            .from_rule(self.name()),
                    );
                }
            }
        }

        (edits, refused)
    }
}

impl TransformRule for CastTypes {
    fn name(&self) -> &'static str {
        "cast_types"
    }

    fn priority(&self) -> u32 {
        110
    }

    fn consumes(&self) -> &'static [&'static str] {
        &["variant_conversions", "try_conversions", "timestamp_conversions"]
    }

    fn matches(&self, stream: &TokenStream<'_>) -> bool {
        let (edits, refused) = self.scan(stream);
        !edits.is_empty() || !refused.is_empty()
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        let (edits, refused) = self.scan(stream);
        RuleOutput {
            sql: apply_edits(stream, edits),
            refused,
        }
    }
}
