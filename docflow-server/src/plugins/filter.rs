//! # Routing Filter
//!
//! Plugins never subscribe their raw event handlers. The runtime wraps
//! each handler so that `document.created` events are delivered only when
//! the document actually routes through this plugin per the owner's
//! workflow configuration; plugin code stays unaware of scope resolution.
//!
//! The wrapper also short-circuits during shutdown so no new work enters
//! the pipeline after the first termination signal.

use std::sync::Arc;

use uuid::Uuid;

use docflow_sdk::context::HandlerContext;
use docflow_sdk::events::EventType;
use docflow_sdk::plugin::Plugin;
use docflow_sdk::storage::DocumentStore as _;

use crate::events::bus::EventHandler;
use crate::shutdown::ShutdownCoordinator;
use crate::workflows::resolver::WorkflowResolver;

/// Wrap a plugin handler with workflow-membership routing.
pub fn routing_filtered_handler(
    plugin_name: String,
    plugin: Arc<dyn Plugin>,
    resolver: Arc<WorkflowResolver>,
    ctx: HandlerContext,
    shutdown: Arc<ShutdownCoordinator>,
) -> EventHandler {
    Arc::new(move |event| {
        let plugin_name = plugin_name.clone();
        let plugin = plugin.clone();
        let resolver = resolver.clone();
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();

        Box::pin(async move {
            // Routing applies to document.created only; everything else
            // goes straight through.
            if event.event_type != EventType::DocumentCreated.as_str() {
                return plugin.handle_event(&ctx, &event).await;
            }

            if shutdown.is_shutting_down() {
                tracing::debug!(plugin = %plugin_name, "shutdown in progress, dropping event");
                return Ok(());
            }

            let Some(document_id) = event
                .payload
                .get("document_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                tracing::warn!(plugin = %plugin_name, "document.created without document_id");
                return Ok(());
            };

            let Some(document) = ctx.stores.documents.document(document_id).await? else {
                tracing::warn!(
                    plugin = %plugin_name,
                    document_id = %document_id,
                    "document not found, dropping event"
                );
                return Ok(());
            };

            let steps = resolver.workflow_for_document(&document).await?;
            if steps.is_empty() {
                tracing::debug!(
                    plugin = %plugin_name,
                    document_id = %document_id,
                    "no workflow configured, skipping"
                );
                return Ok(());
            }

            if !steps.iter().any(|s| s.plugin_name == plugin_name) {
                tracing::debug!(
                    plugin = %plugin_name,
                    document_id = %document_id,
                    "plugin not in workflow, skipping"
                );
                return Ok(());
            }

            if !plugin.should_process(&document).await {
                tracing::debug!(
                    plugin = %plugin_name,
                    document_id = %document_id,
                    "plugin declined document"
                );
                return Ok(());
            }

            tracing::debug!(
                plugin = %plugin_name,
                document_id = %document_id,
                "workflow routing passed, invoking handler"
            );
            plugin.handle_event(&ctx, &event).await
        })
    })
}
