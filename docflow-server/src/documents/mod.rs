//! Document graph service and local object storage.

pub mod service;

pub use service::{DocumentService, LocalObjectStore, NewDocument};
