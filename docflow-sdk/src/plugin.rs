//! # Plugin Contract
//!
//! A plugin is a processing unit with declared input/output document types,
//! dependencies, a concurrency cap, and lifecycle hooks. Plugins are
//! registered at compile time through a [`PluginSet`] of factories; the
//! loader instantiates them, orders them by their declared dependencies,
//! and initializes each with its persisted settings.
//!
//! The contract is a trait plus plain capability/metadata records; there
//! is no deep hierarchy. Dispatch goes through the trait object held by the
//! registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{HandlerContext, JobContext, JobRequest, JobSubmitter as _};
use crate::document::Document;
use crate::error::PluginError;
use crate::events::{EventSink, EventType, JsonMap};
use crate::events::Event;
use crate::job::JobOutcome;

/// Plugin lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Found in the registration table, not yet touched
    Discovered,
    /// Setup in progress
    Loading,
    /// Setup succeeded but the plugin is not yet receiving events
    Installed,
    /// Fully operational
    Active,
    /// Administratively disabled; steps referencing it are skipped
    Disabled,
    /// Dependency resolution or setup failed
    Error,
}

/// Static description of a plugin, read cheaply before setup runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique slug, e.g. `"audio_transcription"`
    pub name: String,
    /// Semver string
    pub version: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Document types this plugin accepts as input
    #[serde(default)]
    pub input_types: Vec<String>,
    /// Document type this plugin produces, if any
    #[serde(default)]
    pub output_type: Option<String>,
    /// Lower runs earlier; tie-break for deterministic load order
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Names of plugins that must load before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Cap on concurrently running jobs for this plugin
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// When false, a job is skipped if a child document of `output_type`
    /// already exists for the same input document
    #[serde(default)]
    pub regenerate: bool,
    /// Broker queue name; defaults to the plugin name
    #[serde(default)]
    pub queue: Option<String>,
    /// Hex color for timeline rendering
    #[serde(default = "default_color")]
    pub color: String,
    /// Optional JSON Schema describing the plugin's settings map
    #[serde(default)]
    pub settings_schema: Option<serde_json::Value>,
}

fn default_priority() -> i32 {
    100
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_color() -> String {
    "#6366F1".to_string()
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            display_name: String::new(),
            description: String::new(),
            input_types: Vec::new(),
            output_type: None,
            priority: default_priority(),
            dependencies: Vec::new(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            regenerate: false,
            queue: None,
            color: default_color(),
            settings_schema: None,
        }
    }

    /// Broker queue this plugin's tasks are routed to.
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(&self.name)
    }

    pub fn accepts(&self, document_type: &str) -> bool {
        self.input_types.iter().any(|t| t == document_type)
    }
}

/// Declaration of what a plugin provides beyond `process`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Subscribes to bus events (wrapped by the routing filter)
    pub has_event_handlers: bool,
    /// Registers new document types at load time
    pub has_document_types: bool,
    /// Ships worker tasks (i.e. implements `process`)
    pub has_tasks: bool,
}

/// A document type a plugin wants registered at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTypeSpec {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub mime_types: Vec<String>,
    #[serde(default)]
    pub metadata_schema: Option<serde_json::Value>,
}

/// The plugin contract.
///
/// Required: [`metadata`](Plugin::metadata), [`setup`](Plugin::setup), and
/// [`process`](Plugin::process). Everything else has a default that covers
/// the common case of "run me on `document.created` for my input types".
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Static plugin description. Must be cheap; the loader calls it before
    /// setup to build the dependency graph.
    fn metadata(&self) -> PluginMetadata;

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            has_event_handlers: true,
            has_document_types: false,
            has_tasks: true,
        }
    }

    /// Initialize with persisted settings. Called once at startup, in
    /// dependency order, with a handle to the event bus.
    async fn setup(&mut self, settings: JsonMap, events: Arc<dyn EventSink>)
        -> Result<(), PluginError>;

    /// Event types this plugin wants delivered to [`handle_event`]
    /// (each subscription is wrapped by the routing filter).
    fn subscriptions(&self) -> Vec<String> {
        if self.capabilities().has_event_handlers {
            vec![EventType::DocumentCreated.as_str().to_string()]
        } else {
            Vec::new()
        }
    }

    /// React to a bus event. The default submits a processing job for the
    /// document named in a `document.created` payload; routing has already
    /// been checked by the filter wrapper.
    async fn handle_event(&self, ctx: &HandlerContext, event: &Event) -> Result<(), PluginError> {
        if event.event_type != EventType::DocumentCreated.as_str() {
            return Ok(());
        }
        let Some(document_id) = event
            .payload
            .get("document_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
        else {
            tracing::warn!(plugin = %self.metadata().name, "document.created without document_id");
            return Ok(());
        };
        ctx.jobs
            .submit(JobRequest {
                plugin_name: self.metadata().name,
                document_id,
                settings: JsonMap::new(),
            })
            .await
            .map_err(|e| PluginError::Processing {
                message: format!("job submission failed: {e}"),
            })?;
        Ok(())
    }

    /// Process one document. Runs on the worker pool, gated by the
    /// plugin's concurrency cap. Long operations should poll
    /// [`JobContext::check_cancellation`] and report progress.
    async fn process(
        &self,
        _ctx: &JobContext,
        _document: &Document,
    ) -> Result<JobOutcome, PluginError> {
        Err(PluginError::Processing {
            message: format!("plugin {} does not implement process", self.metadata().name),
        })
    }

    /// Document types to register when this plugin loads.
    fn document_types(&self) -> Vec<DocumentTypeSpec> {
        Vec::new()
    }

    /// Custom routing check beyond input-type matching.
    async fn should_process(&self, document: &Document) -> bool {
        self.metadata().accepts(&document.document_type)
    }

    /// Hook run after all plugins finished loading.
    async fn on_startup(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Hook run during graceful shutdown, bounded by a per-plugin budget.
    async fn on_shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn healthcheck(&self) -> JsonMap {
        let mut status = JsonMap::new();
        status.insert("status".to_string(), serde_json::json!("healthy"));
        status
    }
}

/// Factory producing a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Compile-time plugin registration table. Stands in for directory
/// scanning: each plugin contributes a factory, and the loader enumerates
/// the set at startup.
#[derive(Default, Clone)]
pub struct PluginSet {
    factories: Vec<PluginFactory>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn factories(&self) -> &[PluginFactory] {
        &self.factories
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
