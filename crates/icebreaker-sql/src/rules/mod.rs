//! Transform rules and the validated rule set
//!
//! Rules run in ascending priority. A rule that rewrites syntax produced by
//! another rule declares it in `consumes`, and `RuleSet::new` rejects any set
//! where a consumed rule is missing or would run later.

mod conversions;
mod functions;
mod identifiers;
mod semi_structured;

pub use conversions::{CastTypes, TimestampConversions, TryConversions};
pub use functions::{AggregateFunctions, ConditionalFunctions, DateFunctions};
pub use identifiers::IdentifierQuoting;
pub use semi_structured::{
    FlattenToUnnest, ObjectArrayConstructors, SemiStructuredPath, VariantConversions,
};

use std::collections::BTreeSet;
use std::fmt;

use crate::rewrite::RuleOutput;
use crate::stream::TokenStream;

/// One dialect rewrite step
///
/// Re-applying a rule to its own output must change nothing.
pub trait TransformRule: Send + Sync {
    /// Stable rule name, reported in `TranspileResult::applied`
    fn name(&self) -> &'static str;

    /// Position in the total order; lower runs first
    fn priority(&self) -> u32;

    /// Rules whose output this rule rewrites
    fn consumes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Function names (lowercase) this rule translates
    fn handles(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether the rule has anything to do on this input
    fn matches(&self, stream: &TokenStream<'_>) -> bool {
        let handles = self.handles();
        !handles.is_empty()
            && stream
                .calls()
                .iter()
                .any(|call| handles.contains(&call.name.lower().as_str()))
    }

    fn rewrite(&self, stream: &TokenStream<'_>) -> RuleOutput;
}

impl fmt::Debug for dyn TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.priority())
    }
}

/// Rule set validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleSetError {
    #[error("Duplicate rule name: {0}")]
    DuplicateName(String),

    #[error("Rules '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        first: String,
        second: String,
        priority: u32,
    },

    #[error("Rule '{rule}' consumes unknown rule '{consumes}'")]
    MissingDependency { rule: String, consumes: String },

    #[error("Rule '{rule}' consumes '{consumes}' but does not run after it")]
    OrderViolation { rule: String, consumes: String },
}

/// Ordered, validated rule catalog
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Box<dyn TransformRule>>,
}

impl RuleSet {
    /// Sort by priority and validate names, priorities and dependencies
    pub fn new(mut rules: Vec<Box<dyn TransformRule>>) -> Result<Self, RuleSetError> {
        rules.sort_by_key(|r| r.priority());

        for pair in rules.windows(2) {
            if pair[0].priority() == pair[1].priority() {
                return Err(RuleSetError::DuplicatePriority {
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                    priority: pair[0].priority(),
                });
            }
        }

        let mut names = BTreeSet::new();
        for rule in &rules {
            if !names.insert(rule.name()) {
                return Err(RuleSetError::DuplicateName(rule.name().to_string()));
            }
        }

        for (index, rule) in rules.iter().enumerate() {
            for consumed in rule.consumes() {
                match rules.iter().position(|r| r.name() == *consumed) {
                    None => {
                        return Err(RuleSetError::MissingDependency {
                            rule: rule.name().to_string(),
                            consumes: consumed.to_string(),
                        })
                    }
                    Some(producer) if producer >= index => {
                        return Err(RuleSetError::OrderViolation {
                            rule: rule.name().to_string(),
                            consumes: consumed.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self { rules })
    }

    /// The Snowflake to DuckDB catalog
    pub fn snowflake_to_duckdb() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn TransformRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn TransformRule> {
        self.iter().find(|r| r.name() == name)
    }

    /// Whether some rule translates the function
    pub fn handles(&self, function: &str) -> bool {
        let function = function.to_lowercase();
        self.rules
            .iter()
            .any(|r| r.handles().contains(&function.as_str()))
    }

    /// Every function name some rule translates
    pub fn translatable_functions(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .flat_map(|r| r.handles().iter().map(|h| h.to_string()))
            .collect()
    }
}

/// Fresh instances of the Snowflake to DuckDB rules, in execution order
pub fn builtin_rules() -> Vec<Box<dyn TransformRule>> {
    vec![
        Box::new(IdentifierQuoting),
        Box::new(SemiStructuredPath),
        Box::new(FlattenToUnnest),
        Box::new(ObjectArrayConstructors),
        Box::new(VariantConversions),
        Box::new(TryConversions),
        Box::new(TimestampConversions),
        Box::new(DateFunctions),
        Box::new(ConditionalFunctions),
        Box::new(AggregateFunctions),
        Box::new(CastTypes),
    ]
}

/// Hint attached to refused constructs
pub(crate) fn cloud_route_hint(construct: &str) -> String {
    format!(
        "{} has no DuckDB equivalent; run this model in Snowflake with {{{{ config(icebreaker_route='cloud') }}}}",
        construct
    )
}
