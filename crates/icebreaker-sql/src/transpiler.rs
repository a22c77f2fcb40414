//! Snowflake to DuckDB transpiler
//!
//! The registry check runs first: any cloud-only call that no rule translates
//! is reported as unsupported. The rule catalog then runs in priority order,
//! each rule on a fresh token stream of the previous rule's output, and the
//! result is parsed with the target grammar.

use icebreaker_core::{Dialect, SignalKind, TranspileConfig, TranspileResult, UnsupportedConstruct};
use std::sync::Arc;

use crate::analyzer::SqlAnalyzer;
use crate::registry::CompatibilityRegistry;
use crate::rules::{cloud_route_hint, RuleSet};
use crate::stream::TokenStream;
use crate::validate::SqlValidator;

/// Transpiler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranspileError {
    #[error("Unsupported dialect pair: {from} -> {to}")]
    UnsupportedDialectPair { from: Dialect, to: Dialect },
}

/// Rule-based dialect rewriter sharing the analyzer's registry
#[derive(Debug)]
pub struct Transpiler {
    registry: Arc<CompatibilityRegistry>,
    analyzer: SqlAnalyzer,
    rules: RuleSet,
    validate_output: bool,
}

impl Transpiler {
    /// Transpiler with the built-in Snowflake to DuckDB rules
    pub fn new(registry: Arc<CompatibilityRegistry>) -> Self {
        Self::with_rules(registry, RuleSet::snowflake_to_duckdb())
    }

    pub fn with_rules(registry: Arc<CompatibilityRegistry>, rules: RuleSet) -> Self {
        Self {
            analyzer: SqlAnalyzer::new(Arc::clone(&registry)),
            registry,
            rules,
            validate_output: true,
        }
    }

    /// Apply `[transpile]` settings
    pub fn from_config(registry: Arc<CompatibilityRegistry>, config: &TranspileConfig) -> Self {
        Self::new(registry).with_validation(config.validate_output)
    }

    /// Enable or disable target-grammar validation of the output
    pub fn with_validation(mut self, validate_output: bool) -> Self {
        self.validate_output = validate_output;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn registry(&self) -> &Arc<CompatibilityRegistry> {
        &self.registry
    }

    /// Rewrite `sql` from `source` to `target`
    pub fn transpile(
        &self,
        sql: &str,
        source: Dialect,
        target: Dialect,
    ) -> Result<TranspileResult, TranspileError> {
        let supported = source == target || (source == Dialect::Snowflake && target == Dialect::DuckDb);
        if !supported {
            return Err(TranspileError::UnsupportedDialectPair {
                from: source,
                to: target,
            });
        }

        let mut result = TranspileResult {
            sql: String::new(),
            applied: Vec::new(),
            unsupported: Vec::new(),
            target,
        };

        if sql.trim().is_empty() {
            return Ok(result);
        }

        result.sql = sql.to_string();

        match self.analyzer.analyze(sql) {
            Ok(signals) => {
                result.unsupported.extend(
                    signals
                        .iter()
                        .filter(|s| s.kind == SignalKind::CloudFunction)
                        .filter(|s| !self.rules.handles(&s.matched))
                        .map(|s| {
                            UnsupportedConstruct::new(s.matched.clone(), cloud_route_hint(&s.matched))
                                .at(s.position)
                                .from_rule("registry")
                        }),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "SQL could not be scanned; refusing to transpile");
                result.unsupported.push(
                    UnsupportedConstruct::new(e.to_string(), "fix the SQL syntax or route the model to the cloud")
                        .from_rule("registry"),
                );
                return Ok(result);
            }
        }

        if source == target {
            return Ok(result);
        }

        for rule in self.rules.iter() {
            let stream = match TokenStream::new(&result.sql) {
                Ok(stream) => stream,
                Err(e) => {
                    result.unsupported.push(
                        UnsupportedConstruct::new(e.to_string(), "report the failing rule")
                            .at(e.position())
                            .from_rule(rule.name()),
                    );
                    break;
                }
            };

            if !rule.matches(&stream) {
                continue;
            }

            let output = rule.rewrite(&stream);
            result.unsupported.extend(output.refused);

            if output.sql != result.sql {
                tracing::debug!(rule = rule.name(), "transform applied");
                result.applied.push(rule.name().to_string());
                result.sql = output.sql;
            }
        }

        if self.validate_output && result.unsupported.is_empty() {
            if let Err(e) = SqlValidator::for_dialect(target).validate(&result.sql) {
                tracing::warn!(error = %e, "transpiled SQL failed validation");
                result.unsupported.push(e.to_unsupported());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transpiler() -> Transpiler {
        Transpiler::new(Arc::new(CompatibilityRegistry::builtin()))
    }

    fn to_duckdb(sql: &str) -> TranspileResult {
        transpiler()
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap()
    }

    #[test]
    fn rules_chain_in_order() {
        let result = to_duckdb("SELECT TRY_TO_NUMBER(\"AMOUNT\"), PARSE_JSON(raw) FROM orders");
        assert_eq!(
            result.sql,
            "SELECT TRY_CAST(amount AS DECIMAL(38, 0)), CAST(raw AS JSON) FROM orders"
        );
        assert_eq!(
            result.applied,
            vec!["identifier_quoting", "variant_conversions", "try_conversions", "cast_types"]
        );
        assert!(result.is_success());
    }

    #[test]
    fn cloud_only_functions_are_unsupported() {
        let result = to_duckdb("SELECT GET_DDL('table', 't'), id FROM t");
        assert_eq!(result.unsupported.len(), 1);
        assert_eq!(result.unsupported[0].construct, "GET_DDL");
        assert_eq!(result.unsupported[0].rule.as_deref(), Some("registry"));
        assert!(result.unsupported[0].hint.contains("icebreaker_route='cloud'"));
    }

    #[test]
    fn same_dialect_only_checks_registry() {
        let t = transpiler();
        let result = t
            .transpile("SELECT IFF(a, 1, 2) FROM t", Dialect::Snowflake, Dialect::Snowflake)
            .unwrap();
        assert_eq!(result.sql, "SELECT IFF(a, 1, 2) FROM t");
        assert!(result.applied.is_empty());
        assert_eq!(result.target, Dialect::Snowflake);
    }

    #[test]
    fn reverse_direction_is_an_error() {
        let err = transpiler()
            .transpile("SELECT 1", Dialect::DuckDb, Dialect::Snowflake)
            .unwrap_err();
        assert_eq!(
            err,
            TranspileError::UnsupportedDialectPair {
                from: Dialect::DuckDb,
                to: Dialect::Snowflake
            }
        );
    }

    #[test]
    fn unterminated_literal_is_refused() {
        let result = to_duckdb("SELECT 'oops FROM t");
        assert!(!result.is_success());
        assert_eq!(result.sql, "SELECT 'oops FROM t");
        assert!(result.applied.is_empty());
    }

    #[test]
    fn validation_can_be_disabled() {
        let t = transpiler().with_validation(false);
        let result = t
            .transpile("SELECT (a FROM t", Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert!(result.is_success());

        let result = to_duckdb("SELECT (a FROM t");
        assert_eq!(result.unsupported.len(), 1);
        assert_eq!(result.unsupported[0].rule.as_deref(), Some("validation"));
    }
}
