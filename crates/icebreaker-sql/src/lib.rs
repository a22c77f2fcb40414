//! SQL compatibility analysis and dialect transpilation
//!
//! This crate handles:
//! - Lossless tokenization of warehouse SQL
//! - The shared compatibility registry (cloud-only / local-safe names)
//! - Extracting compatibility signals without a full parse
//! - Rewriting Snowflake SQL for DuckDB with an ordered rule catalog
//! - Validating rewritten SQL with the target grammar

pub mod analyzer;
pub mod lexer;
pub mod registry;
pub mod rewrite;
pub mod rules;
pub mod stream;
pub mod transpiler;
pub mod validate;

pub use analyzer::{AnalysisError, SqlAnalyzer};
pub use lexer::{tokenize, LexError, Token, TokenKind};
pub use registry::{Classification, CompatibilityRegistry, RegistryError};
pub use rewrite::RuleOutput;
pub use rules::{builtin_rules, RuleSet, RuleSetError, TransformRule};
pub use stream::TokenStream;
pub use transpiler::{TranspileError, Transpiler};
pub use validate::{SqlValidator, ValidationError};
