// Test suite for the orchestrator core: plugin loading, workflow
// validation and resolution, the event bus, job scheduling, and shutdown.

pub mod http;
pub mod jobs;
pub mod plugins;
pub mod resolver;

pub mod helpers {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use uuid::Uuid;

    use docflow_sdk::context::JobContext;
    use docflow_sdk::document::{Document, StorageDescriptor};
    use docflow_sdk::error::PluginError;
    use docflow_sdk::events::{EventSink, JsonMap};
    use docflow_sdk::job::JobOutcome;
    use docflow_sdk::plugin::{
        DocumentTypeSpec, Plugin, PluginMetadata, PluginSet,
    };
    use docflow_sdk::storage::{DocumentStore as _, DocumentTypeStore as _};

    use crate::config::Config;
    use crate::server::{bootstrap, App, AppState};

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.storage.root = std::env::temp_dir()
            .join(format!("docflow-test-{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    pub async fn start(plugins: PluginSet) -> App {
        bootstrap(test_config(), plugins).await.expect("bootstrap")
    }

    /// Poll until the condition holds or the timeout elapses.
    pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn descriptor(content_type: &str) -> StorageDescriptor {
        StorageDescriptor {
            storage_plugin: "local".to_string(),
            filepath: format!("uploads/{}", Uuid::new_v4()),
            content_type: content_type.to_string(),
            size_bytes: 4,
            checksum: "0".repeat(64),
        }
    }

    /// Register a document type directly, bypassing plugin registration.
    pub async fn seed_type(state: &AppState, name: &str) {
        state
            .stores
            .document_types
            .upsert_document_type(docflow_sdk::document::DocumentType {
                id: Uuid::new_v4(),
                name: name.to_string(),
                display_name: name.to_string(),
                description: None,
                registered_by: "test".to_string(),
                mime_types: vec![],
                metadata_schema: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    /// Insert a document row without emitting `document.created`.
    pub async fn insert_document(
        state: &AppState,
        document_type: &str,
        owner_id: Uuid,
        source_id: Option<Uuid>,
    ) -> Document {
        let document = Document {
            id: Uuid::new_v4(),
            document_type: document_type.to_string(),
            owner_id,
            source_id,
            parent_id: None,
            storage: descriptor("application/octet-stream"),
            properties: JsonMap::new(),
            created_at: chrono::Utc::now(),
        };
        state
            .stores
            .documents
            .insert_document(document.clone())
            .await
            .unwrap();
        document
    }

    /// Shared observability for fixture plugin instances produced by one
    /// factory registration.
    #[derive(Default)]
    pub struct FixtureProbe {
        pub setup_order: Mutex<Vec<String>>,
        pub attempts: AtomicUsize,
        pub processed: AtomicUsize,
        pub concurrent: AtomicUsize,
        pub max_concurrent: AtomicUsize,
    }

    impl FixtureProbe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn processed_count(&self) -> usize {
            self.processed.load(Ordering::SeqCst)
        }

        pub fn max_concurrent_seen(&self) -> usize {
            self.max_concurrent.load(Ordering::SeqCst)
        }
    }

    /// Configurable test plugin. Processes by sleeping in small slices,
    /// polling cancellation and reporting progress, then optionally
    /// producing a child document of its output type.
    pub struct FixturePlugin {
        pub metadata: PluginMetadata,
        pub delay: Duration,
        pub progress_steps: u8,
        pub fail_with: Option<String>,
        /// Fail with a transient error for the first N process attempts
        pub fail_transient_times: usize,
        pub fail_setup: bool,
        pub produce_output: bool,
        pub probe: Arc<FixtureProbe>,
        settings: JsonMap,
    }

    impl FixturePlugin {
        pub fn new(metadata: PluginMetadata, probe: Arc<FixtureProbe>) -> Self {
            Self {
                metadata,
                delay: Duration::from_millis(20),
                progress_steps: 2,
                fail_with: None,
                fail_transient_times: 0,
                fail_setup: false,
                produce_output: true,
                probe,
                settings: JsonMap::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Plugin for FixturePlugin {
        fn metadata(&self) -> PluginMetadata {
            self.metadata.clone()
        }

        async fn setup(
            &mut self,
            settings: JsonMap,
            _events: Arc<dyn EventSink>,
        ) -> Result<(), PluginError> {
            if self.fail_setup {
                return Err(PluginError::Configuration {
                    message: "setup failure requested".to_string(),
                });
            }
            self.settings = settings;
            self.probe
                .setup_order
                .lock()
                .unwrap()
                .push(self.metadata.name.clone());
            Ok(())
        }

        fn document_types(&self) -> Vec<DocumentTypeSpec> {
            self.metadata
                .output_type
                .iter()
                .map(|name| DocumentTypeSpec {
                    name: name.clone(),
                    display_name: name.clone(),
                    mime_types: vec!["application/json".to_string()],
                    metadata_schema: None,
                })
                .collect()
        }

        async fn process(
            &self,
            ctx: &JobContext,
            _document: &Document,
        ) -> Result<JobOutcome, PluginError> {
            let concurrent = self.probe.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe
                .max_concurrent
                .fetch_max(concurrent, Ordering::SeqCst);

            let result = self.run(ctx).await;

            self.probe.concurrent.fetch_sub(1, Ordering::SeqCst);
            if result.is_ok() {
                self.probe.processed.fetch_add(1, Ordering::SeqCst);
            }
            result
        }
    }

    impl FixturePlugin {
        async fn run(&self, ctx: &JobContext) -> Result<JobOutcome, PluginError> {
            let attempt = self.probe.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_transient_times {
                return Err(PluginError::ExternalService {
                    message: format!("transient failure on attempt {attempt}"),
                });
            }

            let steps = self.progress_steps.max(1);
            let slice = self.delay / u32::from(steps);

            for step in 1..=steps {
                tokio::time::sleep(slice).await;
                ctx.check_cancellation().await?;
                let percent = (u16::from(step) * 100 / u16::from(steps)) as u8;
                ctx.update_progress(percent.min(99), "processing").await?;
            }

            if let Some(message) = &self.fail_with {
                return Err(PluginError::Processing {
                    message: message.clone(),
                });
            }

            if self.produce_output {
                if let Some(output_type) = &self.metadata.output_type {
                    let child = ctx
                        .create_child_document(
                            output_type,
                            descriptor("application/json"),
                            JsonMap::new(),
                        )
                        .await?;
                    return Ok(JobOutcome::with_output(child.id));
                }
            }

            Ok(JobOutcome::default())
        }
    }

    /// Metadata shorthand for fixtures.
    pub fn meta(name: &str, inputs: &[&str], output: Option<&str>) -> PluginMetadata {
        let mut metadata = PluginMetadata::new(name, "1.0.0");
        metadata.display_name = name.replace('_', " ");
        metadata.input_types = inputs.iter().map(|s| s.to_string()).collect();
        metadata.output_type = output.map(|s| s.to_string());
        metadata
    }

    /// Register a fixture factory on a plugin set.
    pub fn register_fixture(
        set: PluginSet,
        metadata: PluginMetadata,
        probe: Arc<FixtureProbe>,
        configure: impl Fn(&mut FixturePlugin) + Send + Sync + 'static,
    ) -> PluginSet {
        set.register(move || {
            let mut plugin = FixturePlugin::new(metadata.clone(), probe.clone());
            configure(&mut plugin);
            Box::new(plugin)
        })
    }
}
