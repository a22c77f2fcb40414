//! Date arithmetic, conditional and aggregate functions

use icebreaker_core::UnsupportedConstruct;

use super::{cloud_route_hint, TransformRule};
use crate::lexer::{Token, TokenKind};
use crate::rewrite::{
    close_in, keyword_arg, rewrite_calls, sig_in, tokens_text, CallRewrite, CallSite, RuleOutput,
};
use crate::stream::TokenStream;

fn refuse(site: &CallSite<'_, '_>, what: String, rule: &str) -> CallRewrite {
    CallRewrite::Refuse(
        UnsupportedConstruct::new(what.clone(), cloud_route_hint(&what))
            .at(site.position)
            .from_rule(rule),
    )
}

fn wrong_arity(site: &CallSite<'_, '_>, rule: &str) -> CallRewrite {
    refuse(site, format!("{} with {} arguments", site.upper(), site.args.len()), rule)
}

/// Canonical date part for a Snowflake date part or alias
fn date_part(part: &str) -> Option<&'static str> {
    let canonical = match part {
        "year" | "y" | "yy" | "yyy" | "yyyy" | "yr" | "years" | "yrs" => "year",
        "quarter" | "q" | "qtr" | "qtrs" | "quarters" => "quarter",
        "month" | "mm" | "mon" | "mons" | "months" => "month",
        "week" | "w" | "wk" | "weekofyear" | "woy" | "wy" | "weeks" => "week",
        "day" | "d" | "dd" | "days" | "dayofmonth" => "day",
        "hour" | "h" | "hh" | "hr" | "hours" | "hrs" => "hour",
        "minute" | "m" | "mi" | "min" | "minutes" | "mins" => "minute",
        "second" | "s" | "sec" | "seconds" | "secs" => "second",
        "millisecond" | "ms" | "msec" | "milliseconds" => "millisecond",
        "microsecond" | "us" | "usec" | "microseconds" => "microsecond",
        _ => return None,
    };
    Some(canonical)
}

/// Whether an expression is a DATE by its syntax alone: a DATE literal or
/// cast, `CURRENT_DATE`, `TO_DATE(..)` or `MAKE_DATE(..)`
fn is_date_expression(expr: &str) -> bool {
    let Ok(stream) = TokenStream::new(expr) else {
        return false;
    };
    let sig: Vec<usize> = (0..stream.len())
        .filter(|&i| !stream.tokens[i].is_trivia())
        .collect();

    match sig.as_slice() {
        [only] => stream.is_word_at(*only, "current_date"),
        [keyword, literal] if stream.is_word_at(*keyword, "date") => {
            stream.tokens[*literal].kind == TokenKind::StringLit
        }
        [.., colons, ty] if stream.is_symbol_at(*colons, "::") => stream.is_word_at(*ty, "date"),
        [first, .., last] => stream.call_at(*first).is_some_and(|call| {
            call.close == *last
                && match call.name.lower().as_str() {
                    "current_date" | "to_date" | "make_date" => true,
                    "cast" | "try_cast" => stream.type_positions().into_iter().any(|t| {
                        stream.is_word_at(t, "date") && stream.next_sig(t) == Some(call.close)
                    }),
                    _ => false,
                }
        }),
        [] => false,
    }
}

/// `DATEADD`, `DATEDIFF`, `DATE_FROM_PARTS` and the current-time aliases
///
/// `DATEADD(day, n, x)` becomes `(x + INTERVAL (n) DAY)`; quarters are
/// expressed in months. Adding days or coarser parts to an expression that
/// is a DATE by syntax keeps the DATE type with a cast. Other operands come
/// out as TIMESTAMP. `DATEDIFF(part, a, b)` becomes `DATE_DIFF('part', a, b)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateFunctions;

impl DateFunctions {
    fn part(&self, site: &CallSite<'_, '_>) -> Result<&'static str, CallRewrite> {
        let raw = site.args.first().and_then(|a| keyword_arg(a));
        match raw.as_deref().map(|p| (p, date_part(p))) {
            Some((_, Some(part))) => Ok(part),
            Some((raw, None)) => Err(refuse(
                site,
                format!("{} with date part '{}'", site.upper(), raw),
                self.name(),
            )),
            None => Err(refuse(
                site,
                format!("{} with a computed date part", site.upper()),
                self.name(),
            )),
        }
    }

    fn convert(&self, site: &CallSite<'_, '_>) -> CallRewrite {
        match site.lower.as_str() {
            "dateadd" | "timestampadd" => {
                let [_, amount, value] = site.args.as_slice() else {
                    return wrong_arity(site, self.name());
                };
                let part = match self.part(site) {
                    Ok(part) => part,
                    Err(refused) => return refused,
                };
                let sum = match part {
                    "quarter" => format!("({} + INTERVAL (3 * ({})) MONTH)", value, amount),
                    _ => format!("({} + INTERVAL ({}) {})", value, amount, part.to_uppercase()),
                };
                let keeps_date = matches!(part, "day" | "week" | "month" | "quarter" | "year")
                    && is_date_expression(value);
                CallRewrite::replace(if keeps_date {
                    format!("CAST({} AS DATE)", sum)
                } else {
                    sum
                })
            }
            "datediff" | "timestampdiff" => {
                let [_, start, end] = site.args.as_slice() else {
                    return wrong_arity(site, self.name());
                };
                match self.part(site) {
                    Ok(part) => {
                        CallRewrite::replace(format!("DATE_DIFF('{}', {}, {})", part, start, end))
                    }
                    Err(refused) => refused,
                }
            }
            "date_from_parts" | "datefromparts" => match site.args.as_slice() {
                [year, month, day] => {
                    CallRewrite::replace(format!("MAKE_DATE({}, {}, {})", year, month, day))
                }
                _ => wrong_arity(site, self.name()),
            },
            "sysdate" | "getdate" if site.args.is_empty() => {
                CallRewrite::replace("CURRENT_TIMESTAMP")
            }
            _ => CallRewrite::Keep,
        }
    }
}

impl TransformRule for DateFunctions {
    fn name(&self) -> &'static str {
        "date_functions"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn handles(&self) -> &'static [&'static str] {
        &[
            "dateadd",
            "timestampadd",
            "datediff",
            "timestampdiff",
            "date_from_parts",
            "datefromparts",
            "sysdate",
            "getdate",
        ]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| self.convert(site))
    }
}

/// `IFF`, `NVL`, `NVL2`, `ZEROIFNULL` and `DECODE` become `CASE`/`COALESCE`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalFunctions;

impl ConditionalFunctions {
    fn convert(&self, site: &CallSite<'_, '_>) -> CallRewrite {
        let args = site.args.as_slice();
        match (site.lower.as_str(), args) {
            ("iff", [cond, then, otherwise]) => CallRewrite::replace(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                cond, then, otherwise
            )),
            ("nvl" | "ifnull", [value, fallback]) => {
                CallRewrite::replace(format!("COALESCE({}, {})", value, fallback))
            }
            ("nvl2", [value, present, absent]) => CallRewrite::replace(format!(
                "CASE WHEN {} IS NOT NULL THEN {} ELSE {} END",
                value, present, absent
            )),
            ("zeroifnull", [value]) => CallRewrite::replace(format!("COALESCE({}, 0)", value)),
            ("decode", [expr, rest @ ..]) if rest.len() >= 2 => {
                let mut case = String::from("CASE");
                for pair in rest.chunks(2) {
                    match pair {
                        [search, result] => case.push_str(&format!(
                            " WHEN {} IS NOT DISTINCT FROM {} THEN {}",
                            expr, search, result
                        )),
                        [default] => case.push_str(&format!(" ELSE {}", default)),
                        _ => {}
                    }
                }
                case.push_str(" END");
                CallRewrite::replace(case)
            }
            ("iff" | "nvl" | "ifnull" | "nvl2" | "zeroifnull" | "decode", _) => {
                wrong_arity(site, self.name())
            }
            _ => CallRewrite::Keep,
        }
    }
}

impl TransformRule for ConditionalFunctions {
    fn name(&self) -> &'static str {
        "conditional_functions"
    }

    fn priority(&self) -> u32 {
        90
    }

    fn handles(&self) -> &'static [&'static str] {
        &["iff", "nvl", "ifnull", "nvl2", "zeroifnull", "decode"]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| self.convert(site))
    }
}

/// `WITHIN GROUP (ORDER BY o)` following a call
///
/// Returns the ordering expression and the number of tokens it spans.
fn within_group(rest: &[Token<'_>]) -> Option<(String, usize)> {
    let within = sig_in(rest, 0).filter(|&i| rest[i].is_word("within"))?;
    let group = sig_in(rest, within + 1).filter(|&i| rest[i].is_word("group"))?;
    let open = sig_in(rest, group + 1).filter(|&i| rest[i].is_symbol("("))?;
    let close = close_in(rest, open)?;
    let order = sig_in(rest, open + 1).filter(|&i| rest[i].is_word("order"))?;
    let by = sig_in(rest, order + 1).filter(|&i| rest[i].is_word("by"))?;
    let ordering = tokens_text(&rest[by + 1..close]).trim().to_string();
    Some((ordering, close + 1))
}

/// `LISTAGG` becomes `STRING_AGG`; `WITHIN GROUP` ordering moves inside the call
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateFunctions;

impl AggregateFunctions {
    fn convert(&self, site: &CallSite<'_, '_>) -> CallRewrite {
        let ordered = within_group(site.rest);
        let (order_by, consumed) = match &ordered {
            Some((ordering, consumed)) => (format!(" ORDER BY {}", ordering), *consumed),
            None => (String::new(), 0),
        };

        match (site.lower.as_str(), site.args.as_slice()) {
            ("listagg", [value]) => CallRewrite::Replace {
                text: format!("STRING_AGG({}, ''{})", value, order_by),
                consumed,
            },
            ("listagg", [value, separator]) => CallRewrite::Replace {
                text: format!("STRING_AGG({}, {}{})", value, separator, order_by),
                consumed,
            },
            ("listagg", _) => wrong_arity(site, self.name()),
            ("array_agg", [value]) if ordered.is_some() => CallRewrite::Replace {
                text: format!("ARRAY_AGG({}{})", value, order_by),
                consumed,
            },
            _ => CallRewrite::Keep,
        }
    }
}

impl TransformRule for AggregateFunctions {
    fn name(&self) -> &'static str {
        "aggregate_functions"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn handles(&self) -> &'static [&'static str] {
        &["listagg", "array_agg"]
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput {
        rewrite_calls(stream, |site| self.convert(site))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(rule: &dyn TransformRule, sql: &str) -> RuleOutput {
        rule.rewrite(&TokenStream::new(sql).unwrap())
    }

    #[test]
    fn dateadd_and_datediff() {
        assert_eq!(
            run(&DateFunctions, "SELECT DATEADD(day, 7, created_at), dateadd('qtr', n, d) FROM t").sql,
            "SELECT (created_at + INTERVAL (7) DAY), (d + INTERVAL (3 * (n)) MONTH) FROM t"
        );
        assert_eq!(
            run(&DateFunctions, "SELECT DATEDIFF(dd, a, b), DATE_FROM_PARTS(y, m, 1), SYSDATE() FROM t").sql,
            "SELECT DATE_DIFF('day', a, b), MAKE_DATE(y, m, 1), CURRENT_TIMESTAMP FROM t"
        );
    }

    #[test]
    fn dateadd_on_a_date_stays_a_date() {
        assert_eq!(
            run(&DateFunctions, "SELECT DATEADD(day, 1, CAST(d AS DATE)), DATEADD(month, 1, CURRENT_DATE), DATEADD(year, 1, s::date) FROM t").sql,
            "SELECT CAST((CAST(d AS DATE) + INTERVAL (1) DAY) AS DATE), CAST((CURRENT_DATE + INTERVAL (1) MONTH) AS DATE), CAST((s::date + INTERVAL (1) YEAR) AS DATE) FROM t"
        );
        assert_eq!(
            run(&DateFunctions, "SELECT DATEADD(hour, 1, CURRENT_DATE), DATEADD(day, 1, CAST(ts AS TIMESTAMP)) FROM t").sql,
            "SELECT (CURRENT_DATE + INTERVAL (1) HOUR), (CAST(ts AS TIMESTAMP) + INTERVAL (1) DAY) FROM t"
        );
        assert!(is_date_expression("DATE '2024-01-01'"));
        assert!(is_date_expression("MAKE_DATE(y, m, 1)"));
        assert!(!is_date_expression("CAST(a AS DATE) + b"));
        assert!(!is_date_expression("created_at"));
    }

    #[test]
    fn unknown_date_parts_are_refused() {
        let out = run(&DateFunctions, "SELECT DATEADD(nanosecond, 1, ts) FROM t");
        assert_eq!(out.sql, "SELECT DATEADD(nanosecond, 1, ts) FROM t");
        assert_eq!(out.refused[0].construct, "DATEADD with date part 'nanosecond'");

        let out = run(&DateFunctions, "SELECT DATEDIFF(p || 'x', a, b) FROM t");
        assert_eq!(out.refused[0].construct, "DATEDIFF with a computed date part");
    }

    #[test]
    fn conditionals() {
        assert_eq!(
            run(&ConditionalFunctions, "SELECT IFF(a > 0, 'pos', NVL(b, 'none')), zeroifnull(c) FROM t").sql,
            "SELECT CASE WHEN a > 0 THEN 'pos' ELSE COALESCE(b, 'none') END, COALESCE(c, 0) FROM t"
        );
        assert_eq!(
            run(&ConditionalFunctions, "SELECT NVL2(a, 1, 0), DECODE(s, 'A', 1, 'B', 2, 0) FROM t").sql,
            "SELECT CASE WHEN a IS NOT NULL THEN 1 ELSE 0 END, \
             CASE WHEN s IS NOT DISTINCT FROM 'A' THEN 1 WHEN s IS NOT DISTINCT FROM 'B' THEN 2 ELSE 0 END FROM t"
        );
    }

    #[test]
    fn conditional_arity_is_checked() {
        let out = run(&ConditionalFunctions, "SELECT IFF(a, b) FROM t");
        assert_eq!(out.refused[0].construct, "IFF with 2 arguments");
        assert_eq!(out.sql, "SELECT IFF(a, b) FROM t");
    }

    #[test]
    fn listagg_within_group() {
        assert_eq!(
            run(&AggregateFunctions, "SELECT LISTAGG(name, ', ') WITHIN GROUP (ORDER BY name DESC) AS names FROM t").sql,
            "SELECT STRING_AGG(name, ', ' ORDER BY name DESC) AS names FROM t"
        );
        assert_eq!(
            run(&AggregateFunctions, "SELECT listagg(x) FROM t").sql,
            "SELECT STRING_AGG(x, '') FROM t"
        );
    }

    #[test]
    fn array_agg_only_changes_with_ordering() {
        assert_eq!(
            run(&AggregateFunctions, "SELECT ARRAY_AGG(x) WITHIN GROUP (ORDER BY y), ARRAY_AGG(z) FROM t").sql,
            "SELECT ARRAY_AGG(x ORDER BY y), ARRAY_AGG(z) FROM t"
        );
    }
}
