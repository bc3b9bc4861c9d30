//! # Docflow Server
//!
//! The Docflow orchestrator: a multi-tenant document-processing pipeline.
//! External sources and users submit documents; the server classifies them,
//! routes each through the owner's configured workflow of processing
//! plugins, runs the resulting jobs on a per-plugin-throttled worker pool,
//! and streams lifecycle events to subscribed clients.
//!
//! ## Architecture
//!
//! The server is organized into the four core subsystems plus thin
//! adapters:
//!
//! - **`events`**: in-process event bus with bounded ring buffer, SSE
//!   fan-out, best-effort persistence, and the broker bridge that relays
//!   worker-emitted events back into the bus.
//! - **`plugins`**: compile-time plugin discovery, dependency-ordered
//!   loading, the plugin registry, and the routing filter that gates each
//!   plugin's event handlers on workflow membership.
//! - **`workflows`**: the step store with type-flow validation, and the
//!   resolver that maps a document to its effective step list.
//! - **`jobs`**: durable job records, the scheduler with per-plugin
//!   concurrency caps and queues, and the worker runtime.
//! - **`documents`**, **`sources`**: the document graph service and source
//!   provisioning.
//! - **`handlers`**, **`server`**: the axum HTTP/SSE surface and the
//!   composition root.
//! - **`storage`**, **`broker`**: in-memory reference stores and the
//!   memory/redis broker backends.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use docflow_server::{config::Config, server::bootstrap};
//! use docflow_sdk::PluginSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let plugins = PluginSet::new();
//!     let app = bootstrap(config, plugins).await?;
//!     // axum::serve(listener, app.router) ...
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod documents;
pub mod error;
pub mod events;
pub mod handlers;
pub mod jobs;
pub mod plugins;
pub mod server;
pub mod shutdown;
pub mod sources;
pub mod storage;
pub mod workflows;

pub use server::{bootstrap, App, AppState};

#[cfg(test)]
mod tests;
