//! Static compatibility analysis
//!
//! Scans SQL for constructs the local engine cannot run without building a
//! full AST: cloud-only function calls, types and statements, stage and
//! storage references, and relations in catalogs the local engine cannot
//! reach.
//! String literals and comments never produce signals except where a literal
//! is used as a relation.

use icebreaker_core::{CompatibilitySignal, SignalKind, SignalSet};
use std::sync::Arc;

use crate::lexer::{LexError, TokenKind};
use crate::registry::{Classification, CompatibilityRegistry};
use crate::stream::TokenStream;

/// Words that may sit between CREATE and the object type
const CREATE_MODIFIERS: &[&str] = &[
    "or", "replace", "temporary", "temp", "transient", "secure", "local", "global", "volatile",
    "recursive",
];

/// Statement types that only the cloud warehouse supports
const CLOUD_ONLY_OBJECTS: &[&str] = &["stream", "task", "pipe", "alert"];

/// Analysis failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("Failed to tokenize SQL: {0}")]
    Lex(#[from] LexError),
}

/// Signal extractor backed by the shared registry
#[derive(Debug, Clone)]
pub struct SqlAnalyzer {
    registry: Arc<CompatibilityRegistry>,
}

impl SqlAnalyzer {
    pub fn new(registry: Arc<CompatibilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CompatibilityRegistry> {
        &self.registry
    }

    /// Extract all compatibility signals, ordered by position
    pub fn analyze(&self, sql: &str) -> Result<SignalSet, AnalysisError> {
        let stream = TokenStream::new(sql)?;
        Ok(self.analyze_stream(&stream))
    }

    /// Signals for an already tokenized statement
    pub fn analyze_stream(&self, stream: &TokenStream<'_>) -> SignalSet {
        let mut signals = SignalSet::new();

        for i in 0..stream.len() {
            let token = &stream.tokens[i];
            match token.kind {
                TokenKind::Stage => {
                    signals.insert(CompatibilitySignal::new(
                        SignalKind::ExternalStage,
                        token.text,
                        token.start,
                    ));
                }
                TokenKind::StringLit => {
                    if self.literal_in_relation_position(stream, i)
                        && token
                            .string_value()
                            .is_some_and(|v| self.registry.is_external_location(&v))
                    {
                        signals.insert(CompatibilitySignal::new(
                            SignalKind::ExternalStage,
                            token.text,
                            token.start,
                        ));
                    }
                }
                TokenKind::Word => {
                    self.statement_signals(stream, i, &mut signals);
                    self.name_signals(stream, i, &mut signals);
                }
                _ => {}
            }
        }

        self.type_signals(stream, &mut signals);
        signals
    }

    /// Cast targets such as `::GEOGRAPHY` or `CAST(x AS GEOMETRY)`
    fn type_signals(&self, stream: &TokenStream<'_>, signals: &mut SignalSet) {
        for i in stream.type_positions() {
            let token = &stream.tokens[i];
            if token.kind == TokenKind::Word && self.registry.is_cloud_only_type(token.text) {
                signals.insert(CompatibilitySignal::new(
                    SignalKind::CloudFunction,
                    token.text,
                    token.start,
                ));
            }
        }
    }

    /// CREATE STREAM/TASK, CREATE EXTERNAL TABLE and COPY INTO
    fn statement_signals(&self, stream: &TokenStream<'_>, i: usize, signals: &mut SignalSet) {
        let token = &stream.tokens[i];

        if token.is_word("copy") {
            if let Some(next) = stream.next_sig(i) {
                if stream.is_word_at(next, "into") {
                    signals.insert(CompatibilitySignal::new(
                        SignalKind::ExternalStage,
                        stream.text(i, next + 1),
                        token.start,
                    ));
                }
            }
            return;
        }

        if !token.is_word("create") {
            return;
        }

        let mut j = i;
        while let Some(next) = stream.next_sig(j) {
            let Some(word) = stream.word_lower(next) else {
                return;
            };
            if CREATE_MODIFIERS.contains(&word.as_str()) {
                j = next;
                continue;
            }
            if CLOUD_ONLY_OBJECTS.contains(&word.as_str()) {
                signals.insert(CompatibilitySignal::new(
                    SignalKind::CloudFunction,
                    format!("CREATE {}", word.to_uppercase()),
                    token.start,
                ));
            } else if word == "external" {
                signals.insert(CompatibilitySignal::new(
                    SignalKind::ExternalStage,
                    stream.text(i, next + 1),
                    token.start,
                ));
            }
            return;
        }
    }

    /// Function calls and relation names
    fn name_signals(&self, stream: &TokenStream<'_>, i: usize, signals: &mut SignalSet) {
        if let Some(call) = stream.call_at(i) {
            let lower = call.name.lower();
            if self.registry.is_cloud_only(&lower) {
                signals.insert(CompatibilitySignal::new(
                    SignalKind::CloudFunction,
                    call.name.text.clone(),
                    call.name.position,
                ));
            }
            return;
        }

        let Some(name) = stream.dotted_name(i) else {
            return;
        };

        if stream.in_relation_position(i) && self.registry.is_cross_catalog(&name.parts) {
            signals.insert(CompatibilitySignal::new(
                SignalKind::CrossDatabaseRef,
                name.text.clone(),
                name.position,
            ));
        }
    }

    /// A literal directly after FROM/JOIN, as the first call argument, or after `URL =`
    fn literal_in_relation_position(&self, stream: &TokenStream<'_>, i: usize) -> bool {
        let Some(prev) = stream.prev_sig(i) else {
            return false;
        };

        if stream.is_word_at(prev, "from") || stream.is_word_at(prev, "join") {
            return true;
        }

        // Known scalar functions (CONCAT, REPLACE, ...) never read from a location
        if stream.is_symbol_at(prev, "(") {
            return stream.call_opened_by(prev).is_some_and(|call| {
                self.registry.classify(&call.name.lower()) != Classification::LocalSafe
            });
        }

        if stream.is_symbol_at(prev, "=") {
            return stream
                .prev_sig(prev)
                .is_some_and(|p| stream.is_word_at(p, "url"));
        }

        false
    }
}
