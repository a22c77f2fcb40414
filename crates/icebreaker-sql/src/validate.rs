//! Output validation using sqlparser
//!
//! Transpiled SQL is parsed with the target dialect before it is handed to
//! the local engine. A parse failure means a rule produced something the
//! target cannot run.

use icebreaker_core::{Diagnostic, DiagnosticCode, Dialect, UnsupportedConstruct};
use sqlparser::dialect::{DuckDbDialect, SnowflakeDialect};
use sqlparser::parser::{Parser, ParserError};

/// SQL validator for one dialect
#[derive(Debug, Clone, Copy)]
pub struct SqlValidator {
    dialect: Dialect,
}

impl SqlValidator {
    /// Validator for DuckDB output
    pub fn duckdb() -> Self {
        Self {
            dialect: Dialect::DuckDb,
        }
    }

    /// Validator for Snowflake input
    pub fn snowflake() -> Self {
        Self {
            dialect: Dialect::Snowflake,
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse SQL and return the number of statements
    pub fn validate(&self, sql: &str) -> Result<usize, ValidationError> {
        let result = match self.dialect {
            Dialect::DuckDb => Parser::parse_sql(&DuckDbDialect {}, sql),
            Dialect::Snowflake => Parser::parse_sql(&SnowflakeDialect {}, sql),
        };

        result
            .map(|statements| statements.len())
            .map_err(|error| ValidationError {
                sql: sql.to_string(),
                dialect: self.dialect,
                error,
            })
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::duckdb()
    }
}

/// SQL that the target dialect cannot parse
#[derive(Debug)]
pub struct ValidationError {
    /// SQL that failed to parse
    pub sql: String,

    pub dialect: Dialect,

    /// Parser error from sqlparser
    pub error: ParserError,
}

impl ValidationError {
    /// Report the failure as an unsupported construct
    pub fn to_unsupported(&self) -> UnsupportedConstruct {
        UnsupportedConstruct::new(
            format!("{} output does not parse: {}", self.dialect.as_str(), self.error),
            "run this model in Snowflake with {{ config(icebreaker_route='cloud') }}",
        )
        .from_rule("validation")
    }

    /// Convert to a diagnostic for `model`
    pub fn to_diagnostic(&self, model: &str) -> Diagnostic {
        Diagnostic::for_model(
            DiagnosticCode::TranspileInvalidOutput,
            model,
            format!("Transpiled SQL failed to parse: {}", self.error),
        )
        .with_suggestion("Route the model to the cloud or report the failing rule")
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} parse error: {}", self.dialect.as_str(), self.error)
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use icebreaker_core::Severity;

    #[test]
    fn valid_duckdb_sql() {
        let validator = SqlValidator::duckdb();
        let sql = "SELECT id, TRY_CAST(amount AS DECIMAL(38, 0)), COALESCE(a, b) FROM orders WHERE id > 1";
        assert_eq!(validator.validate(sql).unwrap(), 1);
    }

    #[test]
    fn invalid_sql_becomes_diagnostic() {
        let error = SqlValidator::duckdb().validate("SELECT (a FROM t").unwrap_err();
        let diag = error.to_diagnostic("orders");
        assert_eq!(diag.code, DiagnosticCode::TranspileInvalidOutput);
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.model.as_deref(), Some("orders"));

        let unsupported = error.to_unsupported();
        assert_eq!(unsupported.rule.as_deref(), Some("validation"));
        assert!(unsupported.construct.starts_with("duckdb output does not parse"));
    }
}
