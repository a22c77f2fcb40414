//! Models: the unit of transformation work that gets routed

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User-configured route for a model (`icebreaker_route`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSetting {
    /// Let the routing gates decide
    #[default]
    Auto,

    /// Always run on the local engine
    Local,

    /// Always run on the cloud warehouse
    Cloud,
}

impl RouteSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    /// Whether this setting forces a venue
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::Auto)
    }
}

impl fmt::Display for RouteSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => Err(format!(
                "invalid route '{}': expected one of auto, local, cloud",
                other
            )),
        }
    }
}

/// A declared upstream dependency of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    /// Identifier of the upstream node (e.g. "model.shop.stg_orders")
    pub id: String,

    /// Qualified relation name used for metadata lookups (database.schema.table)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,

    /// Upstream is declared external (stage, bucket, external table)
    #[serde(default)]
    pub external: bool,
}

impl Upstream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relation: None,
            external: false,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    /// Name to look up in the metadata provider
    pub fn relation_name(&self) -> &str {
        self.relation.as_deref().unwrap_or(&self.id)
    }

    /// Whether the upstream is a routed model (as opposed to a source or seed)
    pub fn is_model(&self) -> bool {
        !self.id.starts_with("source.") && !self.id.starts_with("seed.")
    }
}

/// A named unit of SQL transformation work
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Unique identifier (e.g. "model.shop.orders")
    pub id: String,

    /// Compiled SQL in the warehouse dialect
    pub sql: String,

    /// Direct upstream dependencies
    #[serde(default)]
    pub upstream: Vec<Upstream>,

    /// User route override
    #[serde(default)]
    pub route: RouteSetting,
}

impl Model {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
            upstream: Vec::new(),
            route: RouteSetting::Auto,
        }
    }

    pub fn with_upstream(mut self, id: impl Into<String>) -> Self {
        self.upstream.push(Upstream::new(id));
        self
    }

    pub fn with_upstream_relation(mut self, id: impl Into<String>, relation: impl Into<String>) -> Self {
        self.upstream.push(Upstream::new(id).with_relation(relation));
        self
    }

    pub fn with_external_upstream(mut self, id: impl Into<String>) -> Self {
        self.upstream.push(Upstream::new(id).external());
        self
    }

    pub fn with_route(mut self, route: RouteSetting) -> Self {
        self.route = route;
        self
    }

    /// Short name: the last dotted segment of the identifier
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_setting_parsing() {
        assert_eq!("LOCAL".parse::<RouteSetting>(), Ok(RouteSetting::Local));
        assert_eq!(" cloud ".parse::<RouteSetting>(), Ok(RouteSetting::Cloud));
        assert_eq!("".parse::<RouteSetting>(), Ok(RouteSetting::Auto));
        assert!("warehouse".parse::<RouteSetting>().is_err());
    }

    #[test]
    fn model_builder_and_name() {
        let model = Model::new("model.shop.orders", "SELECT 1")
            .with_upstream("model.shop.stg_orders")
            .with_upstream_relation("source.shop.raw.payments", "RAW.PUBLIC.PAYMENTS")
            .with_route(RouteSetting::Local);

        assert_eq!(model.name(), "orders");
        assert_eq!(model.upstream.len(), 2);
        assert_eq!(model.upstream[0].relation_name(), "model.shop.stg_orders");
        assert_eq!(model.upstream[1].relation_name(), "RAW.PUBLIC.PAYMENTS");
        assert!(model.upstream[0].is_model());
        assert!(!model.upstream[1].is_model());
    }
}
