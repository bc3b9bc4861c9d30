//! # Document Model
//!
//! A document is a stored artifact with a dynamic type, an owner, and an
//! origin: either an external [`Source`] (upload) or a parent document
//! (generated by a plugin). Parent links form a finite tree per owner; the
//! tree lives in storage, not in long-lived memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::JsonMap;

/// A named document classification registered by a plugin at load time,
/// e.g. `audio`, `transcription`, `sentiment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    /// Name of the plugin that registered this type
    pub registered_by: String,
    /// Recognized MIME strings, e.g. `["audio/mpeg", "audio/wav"]`
    pub mime_types: Vec<String>,
    /// Optional JSON Schema for per-document metadata validation
    pub metadata_schema: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Where and how a document's bytes are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDescriptor {
    /// Storage backend identifier, e.g. `"local"`
    pub storage_plugin: String,
    pub filepath: String,
    /// MIME type of the stored bytes
    pub content_type: String,
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes, lowercase hex
    pub checksum: String,
}

/// Universal document entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    /// Document type name; resolved against the type store
    pub document_type: String,
    pub owner_id: Uuid,
    /// Set when the document was submitted by an external source
    pub source_id: Option<Uuid>,
    /// Set when the document was generated from another document
    pub parent_id: Option<Uuid>,
    pub storage: StorageDescriptor,
    #[serde(default)]
    pub properties: JsonMap,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn is_uploaded(&self) -> bool {
        self.source_id.is_some()
    }

    pub fn is_generated(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// An external identity (device, service) owned by a user, authenticated by
/// a hashed API credential. Documents submitted under a source reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// SHA-256 of the API credential; the plaintext is shown once
    pub api_key_hash: String,
    /// First characters of the credential, kept for display
    pub api_key_prefix: String,
    pub is_active: bool,
    #[serde(default)]
    pub properties: JsonMap,
    pub created_at: DateTime<Utc>,
}
