//! Routable models from a dbt manifest

use icebreaker_core::{Model, RouteOverrides, RouteSetting, Upstream};
use std::collections::BTreeSet;
use std::path::Path;

use crate::dag::DependencyGraph;
use crate::manifest::{Manifest, ManifestError, ManifestNode};

/// A loaded manifest with its dependency graph
#[derive(Debug, Clone)]
pub struct DbtProject {
    pub manifest: Manifest,
    pub graph: DependencyGraph,
}

impl DbtProject {
    pub fn from_manifest(manifest: Manifest) -> Self {
        let graph = DependencyGraph::from_manifest(&manifest);
        Self { manifest, graph }
    }

    /// Load `target/manifest.json` (or any manifest path)
    pub fn load(manifest_path: &Path) -> Result<Self, ManifestError> {
        Ok(Self::from_manifest(Manifest::from_file(manifest_path)?))
    }

    /// Database the project builds into, used as the local home catalog
    pub fn home_database(&self) -> Option<String> {
        self.manifest.project_database()
    }

    /// Routable models in build order
    ///
    /// Disabled and ephemeral models are skipped; an ephemeral upstream is
    /// replaced by its own inputs since its SQL is inlined.
    pub fn models(&self) -> Result<Vec<Model>, ManifestError> {
        let order = self.graph.topological_sort()?;

        order
            .iter()
            .filter_map(|id| self.manifest.get_node(id))
            .filter(|node| node.is_model() && node.config.enabled && !node.is_ephemeral())
            .map(|node| self.build_model(node))
            .collect()
    }

    /// Routable models with config-file overrides applied to `auto` models
    pub fn models_with_overrides(&self, overrides: &RouteOverrides) -> Result<Vec<Model>, ManifestError> {
        let mut models = self.models()?;
        for model in &mut models {
            if model.route.is_explicit() {
                continue;
            }
            if let Some(route) = overrides.lookup(&model.id, model.name()) {
                tracing::debug!(model = %model.id, route = route.as_str(), "route override from config");
                model.route = route;
            }
        }
        Ok(models)
    }

    /// One model by unique_id or short name
    pub fn model(&self, name: &str) -> Result<Option<Model>, ManifestError> {
        self.manifest
            .find_model(name)
            .map(|node| self.build_model(node))
            .transpose()
    }

    fn build_model(&self, node: &ManifestNode) -> Result<Model, ManifestError> {
        let route = match node.config.icebreaker_route.as_deref() {
            Some(value) => value
                .parse::<RouteSetting>()
                .map_err(|message| ManifestError::InvalidRoute {
                    model: node.unique_id.clone(),
                    message,
                })?,
            None => RouteSetting::Auto,
        };

        let mut upstream = Vec::new();
        let mut seen = BTreeSet::new();
        self.collect_upstream(&node.depends_on.nodes, &mut seen, &mut upstream);

        let mut model = Model::new(node.unique_id.clone(), node.sql()).with_route(route);
        model.upstream = upstream;
        Ok(model)
    }

    fn collect_upstream(&self, deps: &[String], seen: &mut BTreeSet<String>, out: &mut Vec<Upstream>) {
        for dep in deps {
            if !seen.insert(dep.clone()) {
                continue;
            }

            if let Some(source) = self.manifest.get_source(dep) {
                let mut upstream = Upstream::new(dep.clone()).with_relation(source.relation());
                upstream.external = source.is_external();
                out.push(upstream);
                continue;
            }

            match self.manifest.get_node(dep) {
                Some(parent) if parent.is_ephemeral() => {
                    self.collect_upstream(&parent.depends_on.nodes, seen, out);
                }
                Some(parent) => out.push(Upstream::new(dep.clone()).with_relation(parent.relation())),
                None => {
                    tracing::debug!(upstream = %dep, "dependency missing from manifest");
                    out.push(Upstream::new(dep.clone()));
                }
            }
        }
    }
}
