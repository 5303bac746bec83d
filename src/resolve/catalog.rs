// src/resolve/catalog.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::model::{ConfigFile, PackageSpec};
use crate::errors::ResolutionError;
use crate::types::PackageList;

use super::{EnvironmentResolver, PackageLayer, ResolvedContext};

/// Resolver backed by the `[packages]` table of the config file.
///
/// Requested packages pull in everything they `require`, transitively, and
/// are applied dependencies first.
#[derive(Debug)]
pub struct CatalogResolver {
    packages: BTreeMap<String, PackageSpec>,
    shell: String,
    cache: Mutex<HashMap<PackageList, ResolvedContext>>,
}

impl CatalogResolver {
    pub fn new(packages: BTreeMap<String, PackageSpec>, shell: impl Into<String>) -> Self {
        Self {
            packages,
            shell: shell.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(cfg.packages.clone(), cfg.supervisor.shell.clone())
    }

    fn order(&self, requested: &PackageList) -> Result<Vec<String>, ResolutionError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut closure: Vec<&str> = Vec::new();
        let mut unknown: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<&str> = requested.iter().rev().collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            match self.packages.get(name) {
                Some(spec) => {
                    closure.push(name);
                    stack.extend(spec.requires.iter().rev().map(String::as_str));
                }
                None => {
                    unknown.insert(name.to_string());
                }
            }
        }

        if !unknown.is_empty() {
            return Err(ResolutionError::UnknownPackages(unknown.into_iter().collect()));
        }

        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for &name in &closure {
            graph.add_node(name);
        }
        for &name in &closure {
            if let Some(spec) = self.packages.get(name) {
                for dep in &spec.requires {
                    graph.add_edge(dep.as_str(), name, ());
                }
            }
        }

        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|cycle| ResolutionError::Cycle(cycle.node_id().to_string()))
    }

    fn build(&self, requested: &PackageList) -> Result<ResolvedContext, ResolutionError> {
        let layers = self
            .order(requested)?
            .into_iter()
            .filter_map(|name| {
                self.packages.get(&name).map(|spec| PackageLayer {
                    env: spec.env.clone(),
                    path: spec.path.clone(),
                    name,
                })
            })
            .collect();
        Ok(ResolvedContext::new(self.shell.clone(), layers))
    }
}

impl Default for CatalogResolver {
    fn default() -> Self {
        Self::new(BTreeMap::new(), "bash")
    }
}

impl EnvironmentResolver for CatalogResolver {
    fn invalidate_caches(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn resolve(&self, packages: &PackageList) -> Result<ResolvedContext, ResolutionError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ctx) = cache.get(packages) {
            debug!(%packages, "resolved context served from cache");
            return Ok(ctx.clone());
        }

        let ctx = self.build(packages)?;
        debug!(%packages, resolved = ?ctx.packages().collect::<Vec<_>>(), "resolved package context");
        cache.insert(packages.clone(), ctx.clone());
        Ok(ctx)
    }
}
