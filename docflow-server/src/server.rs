//! # Server Composition Root
//!
//! This module wires the whole orchestrator and builds the HTTP
//! application. It handles component construction, plugin loading, route
//! registration, middleware setup, and application state management.
//!
//! ## Overview
//!
//! The server module is responsible for:
//! - **Component Wiring**: stores, broker, event bus, bridge, registry,
//!   resolver, scheduler, and services, constructed once at startup
//! - **Plugin Integration**: discovery, dependency-ordered loading,
//!   document-type registration, and handler subscription through the
//!   routing filter
//! - **Route Registration**: workflow, event, job, document, and admin
//!   endpoints
//! - **Application State**: shared state for all HTTP handlers and the
//!   shutdown drain
//!
//! There are no global singletons: every component is constructed here
//! and threaded through explicitly, which is also what lets tests
//! assemble fresh instances.
//!
//! ## Architecture
//!
//! Startup order follows the data flow:
//!
//! 1. **Stores**: the in-memory reference stores are bundled behind the
//!    storage traits
//! 2. **Broker**: memory or redis backend, checked for connectivity
//!    (fatal under strict startup)
//! 3. **Event Bus + Bridge**: the bus is handed the event log and broker;
//!    the bridge subscribes to the events channel
//! 4. **Plugins**: configuration seeds the config store, the loader runs
//!    discovery and dependency-ordered setup, document types register
//! 5. **Workflow Services + Scheduler**: resolver, step service, and the
//!    job scheduler with its per-plugin dispatchers
//! 6. **Handler Subscription**: each plugin's subscriptions are wrapped by
//!    the routing filter and attached to the bus
//! 7. **Startup Hooks + Event**: plugin `on_startup` hooks run, then
//!    `system.startup` is emitted
//!
//! ## API Endpoints
//!
//! ### Workflow Endpoints
//!
//! - `GET/POST/DELETE/PUT /api/v1/sources/{id}/workflows/{type}...` -
//!   source-scoped step CRUD, reorder, and available-plugins
//! - Mirror routes under `/api/v1/workflows/{type}` for user-scoped
//!   defaults
//!
//! ### Event Endpoints
//!
//! - `GET /api/v1/events/stream` - SSE stream with replay and keep-alive
//! - `GET /api/v1/events/recent` - newest-first ring-buffer slice
//!
//! ### Job and Document Endpoints
//!
//! - `GET /api/v1/jobs/{id}` and `POST /api/v1/jobs/{id}/cancel`
//! - `POST /api/v1/documents` (upload) and
//!   `DELETE /api/v1/documents/{id}` (cascade delete)
//! - `POST /api/v1/sources` - source provisioning
//!
//! ### Admin Endpoints
//!
//! - `GET /health` - liveness, uptime, plugin count
//! - `GET /api/v1/plugins` - registry listing with states
//!
//! ## Middleware Stack
//!
//! The router applies middleware in the following order:
//!
//! 1. **CORS**: configurable origins, wildcard allowed for development
//! 2. **Tracing**: request/response logging
//! 3. **Timeout**: bounds response generation (SSE bodies stream on)
//! 4. **Body Limit**: uploads capped at `max_upload_bytes`
//!
//! ## Application State
//!
//! The [`AppState`] struct contains shared state accessible to all
//! handlers: configuration, stores, broker, bus, bridge, registry,
//! resolver, workflow service, scheduler, document and source services,
//! and the shutdown coordinator. All fields are cheap clones behind `Arc`.
//!
//! ## Usage
//!
//! ```rust
//! use docflow_server::{config::Config, server::bootstrap};
//! use docflow_sdk::PluginSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let app = bootstrap(config, PluginSet::new()).await?;
//!
//!     // The router is ready to serve; the state drives shutdown.
//!     // axum::serve(listener, app.router) ...
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! `bootstrap` returns an error only for unrecoverable startup failures:
//! an invalid redis URL, a broker that is unreachable under strict
//! startup, or a store seeding failure. Per-plugin problems never abort
//! startup; failed plugins are recorded in the registry with state
//! `Error` and the rest of the system comes up without them.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use docflow_sdk::broker::Broker;
use docflow_sdk::context::{HandlerContext, JobSubmitter};
use docflow_sdk::events::{EventDraft, EventSeverity, EventSink, EventType};
use docflow_sdk::payload;
use docflow_sdk::plugin::{Plugin as _, PluginSet};
use docflow_sdk::storage::{DocumentTypeStore as _, PluginConfigStore as _, Stores};

use crate::broker::{MemoryBroker, RedisBroker};
use crate::config::{BrokerBackend, Config};
use crate::documents::{DocumentService, LocalObjectStore};
use crate::events::{BrokerBridge, EventBus, EventBusConfig};
use crate::handlers;
use crate::jobs::{JobScheduler, RetryPolicy};
use crate::plugins::filter::routing_filtered_handler;
use crate::plugins::{PluginLoader, PluginRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::sources::SourceService;
use crate::storage::MemoryStores;
use crate::workflows::{WorkflowResolver, WorkflowService};

/// Shared state for all HTTP handlers and the shutdown sequence.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub broker: Arc<dyn Broker>,
    pub bus: Arc<EventBus>,
    pub bridge: Arc<BrokerBridge>,
    pub registry: Arc<PluginRegistry>,
    pub resolver: Arc<WorkflowResolver>,
    pub workflows: Arc<WorkflowService>,
    pub scheduler: Arc<JobScheduler>,
    pub documents: Arc<DocumentService>,
    pub sources: SourceService,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// A bootstrapped server: the router plus the state the binary needs for
/// signal handling and the shutdown drain.
pub struct App {
    pub router: Router,
    pub state: AppState,
}

/// Wire every component and return the ready-to-serve application.
pub async fn bootstrap(config: Config, plugins: PluginSet) -> anyhow::Result<App> {
    let config = Arc::new(config);

    let memory = MemoryStores::new();
    let stores = MemoryStores::stores(&memory);

    let broker: Arc<dyn Broker> = match config.broker.backend {
        BrokerBackend::Memory => MemoryBroker::new(),
        BrokerBackend::Redis => Arc::new(RedisBroker::new(&config.broker.url)?),
    };

    match broker.check().await {
        Ok(()) => {}
        Err(e) if config.server.strict_startup => {
            return Err(anyhow::anyhow!(e)).context("broker unreachable under strict startup");
        }
        Err(e) => {
            tracing::warn!(error = %e, "broker check failed, continuing");
        }
    }

    let bus = Arc::new(EventBus::new(
        EventBusConfig {
            buffer_max_size: config.events.buffer_max_size,
            buffer_max_age: config.events.buffer_max_age,
            client_inbox_size: config.events.client_inbox_size,
        },
        Some(stores.events.clone()),
        Some(broker.clone()),
        config.broker.events_channel.clone(),
    ));

    let bridge = Arc::new(BrokerBridge::start(
        broker.clone(),
        bus.clone(),
        config.broker.events_channel.clone(),
    ));

    let shutdown = ShutdownCoordinator::new(config.shutdown.grace_period);
    let registry = Arc::new(PluginRegistry::new());

    // Configuration seeds the config store; the store stays authoritative
    // for settings afterwards.
    for entry in &config.plugins {
        stores
            .plugin_configs
            .set_plugin_settings(&entry.name, entry.settings.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed plugin settings: {e}"))?;
        stores
            .plugin_configs
            .set_plugin_enabled(&entry.name, entry.enabled)
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed plugin flags: {e}"))?;
    }

    let loader = PluginLoader::new(registry.clone(), bus.clone());
    let settings = stores
        .plugin_configs
        .plugin_settings()
        .await
        .map_err(|e| anyhow::anyhow!("failed to load plugin settings: {e}"))?;
    let report = loader
        .load_all(&plugins, &settings, &config.disabled_plugins())
        .await;
    if !report.failed.is_empty() {
        for (name, error) in &report.failed {
            tracing::error!(plugin = %name, error = %error, "plugin unavailable");
        }
    }

    for record in registry.document_type_records() {
        let name = record.name.clone();
        // First registration wins; re-registration refreshes nothing.
        if stores
            .document_types
            .document_type(&name)
            .await
            .map_err(|e| anyhow::anyhow!("document type lookup failed: {e}"))?
            .is_none()
        {
            stores
                .document_types
                .upsert_document_type(record)
                .await
                .map_err(|e| anyhow::anyhow!("document type registration failed: {e}"))?;
            tracing::info!(document_type = %name, "document type registered");
        }
    }

    let resolver = Arc::new(WorkflowResolver::new(stores.clone(), registry.clone()));
    let workflows = Arc::new(WorkflowService::new(stores.clone(), registry.clone()));

    let scheduler = JobScheduler::new(
        stores.clone(),
        broker.clone(),
        registry.clone(),
        bus.clone(),
        shutdown.clone(),
        RetryPolicy {
            max_retries: config.workers.max_retries,
            retry_delay: config.workers.retry_delay,
        },
        config.broker.events_channel.clone(),
    );

    let handler_ctx = HandlerContext {
        jobs: scheduler.clone() as Arc<dyn JobSubmitter>,
        stores: stores.clone(),
        events: bus.clone() as Arc<dyn EventSink>,
    };

    for (metadata, plugin) in registry.active() {
        for event_type in plugin.subscriptions() {
            bus.subscribe(
                event_type.clone(),
                format!("plugin:{}", metadata.name),
                routing_filtered_handler(
                    metadata.name.clone(),
                    plugin.clone(),
                    resolver.clone(),
                    handler_ctx.clone(),
                    shutdown.clone(),
                ),
            )
            .await;
        }
    }

    for (metadata, plugin) in registry.active() {
        if let Err(e) = plugin.on_startup().await {
            tracing::warn!(plugin = %metadata.name, error = %e, "plugin startup hook failed");
        }
    }

    scheduler.clone().start();

    let objects = Arc::new(LocalObjectStore::new(&config.storage.root));
    let documents = Arc::new(DocumentService::new(
        stores.clone(),
        bus.clone(),
        objects,
    ));
    let sources = SourceService::new(stores.clone());

    let state = AppState {
        config: config.clone(),
        stores,
        broker,
        bus: bus.clone(),
        bridge,
        registry: registry.clone(),
        resolver,
        workflows,
        scheduler,
        documents,
        sources,
        shutdown,
    };

    let active_names: Vec<String> = registry
        .active()
        .iter()
        .map(|(m, _)| m.name.clone())
        .collect();
    bus.emit(
        EventDraft::new(
            EventType::SystemStartup.as_str(),
            "system",
            payload![
                ("plugins_loaded", active_names.len()),
                ("plugin_names", active_names),
            ],
        )
        .severity(EventSeverity::Success),
    )
    .await;

    let router = build_router(state.clone());
    Ok(App { router, state })
}

fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut router = Router::new()
        // Documents and sources
        .route("/api/v1/documents", post(handlers::upload_document))
        .route(
            "/api/v1/documents/{document_id}",
            axum::routing::delete(handlers::delete_document),
        )
        .route("/api/v1/sources", post(handlers::create_source))
        // Source-scoped workflows
        .route(
            "/api/v1/sources/{source_id}/workflows/{document_type}",
            get(handlers::source_workflow),
        )
        .route(
            "/api/v1/sources/{source_id}/workflows/{document_type}/steps",
            post(handlers::add_source_workflow_step),
        )
        .route(
            "/api/v1/sources/{source_id}/workflows/{document_type}/steps/{step_id}",
            axum::routing::delete(handlers::delete_source_workflow_step),
        )
        .route(
            "/api/v1/sources/{source_id}/workflows/{document_type}/reorder",
            put(handlers::reorder_source_workflow),
        )
        .route(
            "/api/v1/sources/{source_id}/workflows/{document_type}/available-plugins",
            get(handlers::source_available_plugins),
        )
        // User-scoped default workflows
        .route(
            "/api/v1/workflows/{document_type}",
            get(handlers::user_workflow),
        )
        .route(
            "/api/v1/workflows/{document_type}/steps",
            post(handlers::add_user_workflow_step),
        )
        .route(
            "/api/v1/workflows/{document_type}/steps/{step_id}",
            axum::routing::delete(handlers::delete_user_workflow_step),
        )
        .route(
            "/api/v1/workflows/{document_type}/reorder",
            put(handlers::reorder_user_workflow),
        )
        .route(
            "/api/v1/workflows/{document_type}/available-plugins",
            get(handlers::user_available_plugins),
        )
        // Events
        .route(
            "/api/v1/events/stream",
            get(crate::events::stream::stream_events),
        )
        .route("/api/v1/events/recent", get(handlers::recent_events))
        // Jobs
        .route("/api/v1/jobs/{job_id}", get(handlers::get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(handlers::cancel_job))
        // Admin
        .route("/api/v1/plugins", get(handlers::list_plugins))
        .route("/health", get(handlers::health_check));

    if config.server.cors.enabled {
        let cors = if config.server.cors.allowed_origins.iter().any(|o| o == "*") {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = config
                .server
                .cors
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(tower_http::cors::AllowOrigin::list(origins))
        };
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.server.timeout)),
        )
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .with_state(state)
}
