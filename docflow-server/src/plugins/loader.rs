//! # Plugin Loader
//!
//! Discovery, dependency-ordered loading, and initialization.
//!
//! Discovery enumerates the compile-time [`PluginSet`]: each factory is
//! instantiated cheaply to read its metadata (setup does not run yet).
//! Candidates with empty names or names starting with the reserved `_`
//! prefix are ignored with a warning.
//!
//! Ordering runs Kahn's algorithm over the `dependency -> dependent`
//! graph, with the ready queue sorted by (priority, name) so load order is
//! deterministic. Unknown dependencies and cycles fail the affected
//! plugins with a [`PluginDependencyError`]; the independent remainder
//! still loads. A setup failure marks that plugin `Error` and loading
//! continues; dependents are attempted and may fail on their own terms.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use docflow_sdk::events::{EventSeverity, EventSink, EventType, JsonMap};
use docflow_sdk::payload;
use docflow_sdk::plugin::{Plugin as _, PluginMetadata, PluginSet, PluginState};

use super::registry::PluginRegistry;

/// Reserved prefix for registration entries that must not load.
const RESERVED_PREFIX: char = '_';

/// Dependency-resolution failure: unknown dependency or cycle.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct PluginDependencyError {
    pub message: String,
}

#[derive(Error, Debug)]
pub enum PluginLoadError {
    #[error("Dependency error: {0}")]
    Dependency(#[from] PluginDependencyError),

    #[error("Setup failed: {0}")]
    Setup(#[from] docflow_sdk::error::PluginError),

    #[error("Invalid plugin: {message}")]
    Invalid { message: String },
}

/// Outcome of a full load pass.
#[derive(Default)]
pub struct LoadReport {
    /// Names that reached `Active` (or `Disabled` by configuration),
    /// in load order
    pub loaded: Vec<String>,
    pub failed: Vec<(String, PluginLoadError)>,
}

pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    events: Arc<dyn EventSink>,
}

struct Candidate {
    metadata: PluginMetadata,
    factory: docflow_sdk::plugin::PluginFactory,
}

impl PluginLoader {
    pub fn new(registry: Arc<PluginRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self { registry, events }
    }

    /// Load every plugin in the set. `settings` maps plugin name to its
    /// persisted settings; `disabled` names plugins that load but stay
    /// inactive.
    pub async fn load_all(
        &self,
        set: &PluginSet,
        settings: &HashMap<String, JsonMap>,
        disabled: &[String],
    ) -> LoadReport {
        let mut report = LoadReport::default();

        let candidates = self.discover(set);
        tracing::info!(
            discovered = candidates.len(),
            plugins = ?candidates.keys().collect::<Vec<_>>(),
            "plugin discovery complete"
        );

        let (order, dependency_failures) = resolve_load_order(&candidates);

        for (name, error) in dependency_failures {
            tracing::error!(plugin = %name, error = %error, "plugin failed dependency resolution");
            if let Some(candidate) = candidates.get(&name) {
                self.registry
                    .register_failed(candidate.metadata.clone(), &error);
            }
            report.failed.push((name, PluginLoadError::Dependency(error)));
        }

        for name in order {
            let candidate = &candidates[&name];
            let plugin_settings = settings.get(&name).cloned().unwrap_or_default();

            match self.load_one(candidate, plugin_settings).await {
                Ok(instance) => {
                    let state = if disabled.iter().any(|d| d == &name) {
                        PluginState::Disabled
                    } else {
                        PluginState::Active
                    };
                    self.registry
                        .register(candidate.metadata.clone(), instance, state);
                    tracing::info!(plugin = %name, state = ?state, "plugin loaded");
                    self.events
                        .emit(
                            docflow_sdk::events::EventDraft::new(
                                EventType::PluginLoaded.as_str(),
                                "core:plugins",
                                payload![
                                    ("plugin_name", name.clone()),
                                    ("version", candidate.metadata.version.clone()),
                                ],
                            ),
                        )
                        .await;
                    report.loaded.push(name);
                }
                Err(e) => {
                    tracing::error!(plugin = %name, error = %e, "plugin setup failed");
                    self.registry
                        .register_failed(candidate.metadata.clone(), &e);
                    self.events
                        .emit(
                            docflow_sdk::events::EventDraft::new(
                                EventType::PluginError.as_str(),
                                "core:plugins",
                                payload![
                                    ("plugin_name", name.clone()),
                                    ("error", e.to_string()),
                                ],
                            )
                            .severity(EventSeverity::Error),
                        )
                        .await;
                    report.failed.push((name, PluginLoadError::Setup(e)));
                }
            }
        }

        report
    }

    /// Enumerate the registration table and read metadata without running
    /// setup. Invalid candidates are skipped with a warning.
    fn discover(&self, set: &PluginSet) -> BTreeMap<String, Candidate> {
        let mut candidates = BTreeMap::new();

        for factory in set.factories() {
            let instance = factory();
            let metadata = instance.metadata();
            let name = metadata.name.clone();

            if name.is_empty() {
                tracing::warn!("skipping plugin registration with empty name");
                continue;
            }
            if name.starts_with(RESERVED_PREFIX) {
                tracing::warn!(plugin = %name, "skipping reserved plugin name");
                continue;
            }
            if candidates.contains_key(&name) {
                tracing::warn!(plugin = %name, "duplicate plugin registration, keeping first");
                continue;
            }

            candidates.insert(
                name,
                Candidate {
                    metadata,
                    factory: factory.clone(),
                },
            );
        }

        candidates
    }

    async fn load_one(
        &self,
        candidate: &Candidate,
        settings: JsonMap,
    ) -> Result<Arc<dyn docflow_sdk::plugin::Plugin>, docflow_sdk::error::PluginError> {
        let mut instance = (candidate.factory)();
        instance.setup(settings, self.events.clone()).await?;
        Ok(Arc::from(instance))
    }
}

/// Topological sort over the dependency graph. Returns the load order and
/// the plugins that failed resolution.
fn resolve_load_order(
    candidates: &BTreeMap<String, Candidate>,
) -> (Vec<String>, Vec<(String, PluginDependencyError)>) {
    let mut failures: Vec<(String, PluginDependencyError)> = Vec::new();

    // Plugins naming a dependency outside the candidate set fail up front.
    let mut nodes: BTreeMap<&str, &PluginMetadata> = BTreeMap::new();
    for (name, candidate) in candidates {
        let unknown: Vec<&String> = candidate
            .metadata
            .dependencies
            .iter()
            .filter(|dep| !candidates.contains_key(*dep))
            .collect();
        if unknown.is_empty() {
            nodes.insert(name.as_str(), &candidate.metadata);
        } else {
            failures.push((
                name.clone(),
                PluginDependencyError {
                    message: format!(
                        "plugin {name} depends on unknown plugin(s): {}",
                        unknown
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                },
            ));
        }
    }

    // Kahn's algorithm with edges dependency -> dependent. Edges to
    // plugins that already failed are dropped; their dependents load and
    // may fail in setup on their own.
    let mut in_degree: BTreeMap<&str, usize> = nodes.keys().map(|n| (*n, 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = nodes.keys().map(|n| (*n, Vec::new())).collect();

    for (name, metadata) in &nodes {
        for dep in &metadata.dependencies {
            if nodes.contains_key(dep.as_str()) {
                dependents.get_mut(dep.as_str()).unwrap().push(*name);
                *in_degree.get_mut(*name).unwrap() += 1;
            }
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order: Vec<String> = Vec::new();

    while !ready.is_empty() {
        // Deterministic order: lowest (priority, name) first.
        ready.sort_by(|a, b| {
            let pa = nodes[a].priority;
            let pb = nodes[b].priority;
            pa.cmp(&pb).then(a.cmp(b))
        });
        let current = ready.remove(0);
        order.push(current.to_string());

        for dependent in &dependents[current] {
            let degree = in_degree.get_mut(*dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push(*dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        // Everything not ordered participates in a cycle.
        let cyclic: Vec<&str> = nodes
            .keys()
            .copied()
            .filter(|n| !order.iter().any(|o| o.as_str() == *n))
            .collect();
        let message = format!(
            "circular dependency detected among plugins: {}",
            cyclic.join(", ")
        );
        for name in cyclic {
            failures.push((
                name.to_string(),
                PluginDependencyError {
                    message: message.clone(),
                },
            ));
        }
    }

    (order, failures)
}
