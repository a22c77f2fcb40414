//! Integration tests for the Snowflake to DuckDB transpiler

use icebreaker_core::{Dialect, SignalKind};
use icebreaker_sql::{CompatibilityRegistry, SqlAnalyzer, SqlValidator, Transpiler};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Queries that only use constructs with a rewrite rule or a native equivalent
const CLEAN_CORPUS: &[&str] = &[
    r#"SELECT "ORDER_ID", "CUSTOMER_ID", amount FROM orders WHERE status = 'shipped'"#,
    "SELECT id, IFF(amount > 100, 'big', 'small') AS bucket FROM orders",
    "SELECT customer_id, NVL(email, 'unknown') AS email, ZEROIFNULL(points) AS points FROM customers",
    "SELECT DATEADD(day, 7, order_date) AS due_date, DATEDIFF(day, order_date, shipped_date) AS ship_days FROM orders",
    "SELECT payload:customer.name::string AS customer_name FROM events",
    "SELECT TRY_TO_NUMBER(raw_amount) AS amount, TO_DATE(created_at) AS created FROM staging",
    "SELECT region, LISTAGG(name, ', ') WITHIN GROUP (ORDER BY name) AS names FROM reps GROUP BY region",
    "SELECT id, amount::NUMBER(12, 2) AS amount FROM payments",
    r#"SELECT "ID", ROW_NUMBER() OVER (PARTITION BY customer_id ORDER BY created_at DESC) AS rn FROM orders QUALIFY rn = 1"#,
    "SELECT ARRAY_CONSTRUCT(1, 2, 3) AS xs, OBJECT_CONSTRUCT('a', 1) AS obj",
    "SELECT DECODE(status, 'A', 'active', 'I', 'inactive', 'other') AS label FROM accounts",
    "SELECT PARSE_JSON(raw) AS doc FROM events",
];

fn transpiler() -> Transpiler {
    Transpiler::new(Arc::new(CompatibilityRegistry::builtin()))
}

#[test]
fn clean_corpus_round_trips() {
    let transpiler = transpiler();
    let validator = SqlValidator::duckdb();

    for sql in CLEAN_CORPUS {
        let result = transpiler
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert!(
            result.unsupported.is_empty(),
            "{} -> {:?}",
            sql,
            result.unsupported
        );
        assert!(!result.applied.is_empty(), "nothing applied to {}", sql);
        assert!(validator.validate(&result.sql).is_ok(), "invalid output {}", result.sql);
    }
}

#[test]
fn transpiling_output_again_applies_nothing() {
    let transpiler = transpiler();

    for sql in CLEAN_CORPUS {
        let first = transpiler
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        let second = transpiler
            .transpile(&first.sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert!(second.applied.is_empty(), "{} re-applied {:?}", first.sql, second.applied);
        assert_eq!(second.sql, first.sql);
    }
}

#[test]
fn quoting_normalization_on_clean_sql() {
    let result = transpiler()
        .transpile(r#"SELECT "ID", amount FROM "ORDERS""#, Dialect::Snowflake, Dialect::DuckDb)
        .unwrap();

    assert_eq!(result.sql, "SELECT id, amount FROM orders");
    assert_eq!(result.applied, vec!["identifier_quoting"]);
    assert!(result.is_success());
}

#[test]
fn expected_rewrites() {
    let transpiler = transpiler();
    let cases = [
        (
            "SELECT DATEADD(day, 7, order_date) AS due FROM orders",
            "SELECT (order_date + INTERVAL (7) DAY) AS due FROM orders",
        ),
        (
            "SELECT payload:customer.name::string AS customer_name FROM events",
            "SELECT json_extract_string(payload, '$.customer.name') AS customer_name FROM events",
        ),
        (
            "SELECT region, LISTAGG(name, ', ') WITHIN GROUP (ORDER BY name) AS names FROM reps GROUP BY region",
            "SELECT region, STRING_AGG(name, ', ' ORDER BY name) AS names FROM reps GROUP BY region",
        ),
        (
            "SELECT TO_TIMESTAMP(1700000000) AS ts, DATEADD(day, 1, TO_DATE(created_at)) AS next_day FROM events",
            "SELECT make_timestamp(1700000000000000) AS ts, CAST((CAST(created_at AS DATE) + INTERVAL (1) DAY) AS DATE) AS next_day FROM events",
        ),
        (
            "SELECT f.value FROM orders o, LATERAL FLATTEN(input => o.items) f",
            "SELECT f.value FROM orders o, UNNEST(o.items) AS f(value)",
        ),
    ];

    for (sql, expected) in cases {
        let result = transpiler
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert_eq!(result.sql, expected);
    }
}

#[test]
fn multiple_statements_are_rewritten_in_place() {
    let result = transpiler()
        .transpile(
            "SELECT NVL(a, 0) FROM t; SELECT IFF(b, 1, 0) FROM u",
            Dialect::Snowflake,
            Dialect::DuckDb,
        )
        .unwrap();

    assert_eq!(
        result.sql,
        "SELECT COALESCE(a, 0) FROM t; SELECT CASE WHEN b THEN 1 ELSE 0 END FROM u"
    );
    assert_eq!(SqlValidator::duckdb().validate(&result.sql).unwrap(), 2);
}

#[test]
fn cloud_only_functions_block_local_execution() {
    let transpiler = transpiler();

    for (sql, construct) in [
        ("SELECT GET_DDL('table', 'orders')", "GET_DDL"),
        ("SELECT ML.PREDICT(model, features) FROM t", "ML.PREDICT"),
        ("SELECT snowflake.cortex.complete('m', prompt) FROM t", "snowflake.cortex.complete"),
        ("SELECT loc::GEOGRAPHY AS g FROM t", "GEOGRAPHY"),
        ("SELECT TRY_TO_GEOGRAPHY(wkt) FROM t", "TRY_TO_GEOGRAPHY"),
    ] {
        let result = transpiler
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert!(!result.is_success(), "{} should be refused", sql);
        assert_eq!(result.unsupported.len(), 1, "{:?}", result.unsupported);
        assert_eq!(result.unsupported[0].construct, construct);
        assert_eq!(result.unsupported[0].rule.as_deref(), Some("registry"));
    }
}

#[test]
fn analyzer_and_transpiler_share_the_registry() {
    let mut registry = CompatibilityRegistry::builtin();
    registry.add_cloud_only("acme_udf");
    let registry = Arc::new(registry);

    let analyzer = SqlAnalyzer::new(Arc::clone(&registry));
    let transpiler = Transpiler::new(Arc::clone(&registry));
    let sql = "SELECT acme_udf(x) FROM t";

    let signals = analyzer.analyze(sql).unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals.iter().next().map(|s| s.kind), Some(SignalKind::CloudFunction));

    let result = transpiler
        .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
        .unwrap();
    assert_eq!(result.unsupported_summary(), "acme_udf");
}

#[test]
fn empty_input() {
    for sql in ["", "   \n\t"] {
        let result = transpiler()
            .transpile(sql, Dialect::Snowflake, Dialect::DuckDb)
            .unwrap();
        assert_eq!(result.sql, "");
        assert!(result.applied.is_empty());
        assert!(result.unsupported.is_empty());
    }
}
