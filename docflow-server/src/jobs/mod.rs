//! Job scheduling and execution: durable records, per-plugin queues and
//! concurrency caps, and the worker runtime.

pub mod scheduler;
pub mod worker;

pub use scheduler::JobScheduler;
pub use worker::RetryPolicy;
