//! Broker backends: in-memory channels for tests and single-process runs,
//! redis pub/sub + lists for deployments with an external worker pool.

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;
