//! # Plugin Registry
//!
//! Central store for loaded plugins and their capability indices. A
//! singleton in spirit (one instance per server) but constructed
//! explicitly at startup and threaded through the wiring so tests can
//! build fresh copies.
//!
//! After startup only the enabled/disabled flag mutates, guarded by the
//! plugin-config store.

use std::sync::Arc;

use dashmap::DashMap;

use docflow_sdk::document::DocumentType;
use docflow_sdk::error::StoreError;
use docflow_sdk::plugin::{Plugin, PluginMetadata, PluginState};
use docflow_sdk::storage::PluginConfigStore;

/// One registered plugin: metadata plus lifecycle state. Failed plugins
/// keep their entry (state `Error`) so operators can see why.
#[derive(Clone)]
pub struct PluginEntry {
    pub metadata: PluginMetadata,
    pub state: PluginState,
    pub instance: Option<Arc<dyn Plugin>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: DashMap<String, PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a successfully loaded plugin.
    pub fn register(&self, metadata: PluginMetadata, instance: Arc<dyn Plugin>, state: PluginState) {
        let name = metadata.name.clone();
        self.entries.insert(
            name,
            PluginEntry {
                metadata,
                state,
                instance: Some(instance),
                last_error: None,
            },
        );
    }

    /// Record a plugin that failed to load.
    pub fn register_failed(&self, metadata: PluginMetadata, error: impl ToString) {
        let name = metadata.name.clone();
        self.entries.insert(
            name,
            PluginEntry {
                metadata,
                state: PluginState::Error,
                instance: None,
                last_error: Some(error.to_string()),
            },
        );
    }

    pub fn entry(&self, name: &str) -> Option<PluginEntry> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn metadata(&self, name: &str) -> Option<PluginMetadata> {
        self.entries.get(name).map(|e| e.metadata.clone())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entries.get(name).map(|e| e.state)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|e| e.state == PluginState::Active)
            .unwrap_or(false)
    }

    /// Instance of an active plugin.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.entries.get(name).and_then(|e| {
            if e.state == PluginState::Active {
                e.instance.clone()
            } else {
                None
            }
        })
    }

    /// Active plugins sorted by (priority, name); lower priority first.
    pub fn active(&self) -> Vec<(PluginMetadata, Arc<dyn Plugin>)> {
        let mut plugins: Vec<(PluginMetadata, Arc<dyn Plugin>)> = self
            .entries
            .iter()
            .filter(|e| e.state == PluginState::Active)
            .filter_map(|e| e.instance.clone().map(|i| (e.metadata.clone(), i)))
            .collect();
        plugins.sort_by(|(a, _), (b, _)| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        plugins
    }

    /// Active plugins accepting the given document type, priority order.
    pub fn handlers_for_input_type(&self, document_type: &str) -> Vec<PluginMetadata> {
        let mut handlers: Vec<PluginMetadata> = self
            .entries
            .iter()
            .filter(|e| e.state == PluginState::Active && e.metadata.accepts(document_type))
            .map(|e| e.metadata.clone())
            .collect();
        handlers.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        handlers
    }

    /// Document types declared by active plugins, stamped with the
    /// registering plugin's name.
    pub fn document_type_records(&self) -> Vec<DocumentType> {
        let mut records = Vec::new();
        for (metadata, instance) in self.active() {
            for spec in instance.document_types() {
                records.push(DocumentType {
                    id: uuid::Uuid::new_v4(),
                    name: spec.name,
                    display_name: spec.display_name,
                    description: None,
                    registered_by: metadata.name.clone(),
                    mime_types: spec.mime_types,
                    metadata_schema: spec.metadata_schema,
                    created_at: chrono::Utc::now(),
                });
            }
        }
        records
    }

    /// Flip a plugin's enabled flag, persisting the change.
    pub async fn set_enabled(
        &self,
        name: &str,
        enabled: bool,
        configs: &dyn PluginConfigStore,
    ) -> Result<(), StoreError> {
        let mut entry = self.entries.get_mut(name).ok_or(StoreError::NotFound {
            entity: "plugin",
            id: name.to_string(),
        })?;

        match (entry.state, enabled) {
            (PluginState::Active, false) => entry.state = PluginState::Disabled,
            (PluginState::Disabled, true) => entry.state = PluginState::Active,
            _ => {}
        }
        drop(entry);

        configs.set_plugin_enabled(name, enabled).await
    }

    pub fn list(&self) -> Vec<PluginEntry> {
        let mut entries: Vec<PluginEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
