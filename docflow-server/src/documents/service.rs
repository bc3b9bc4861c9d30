//! # Document Graph
//!
//! Creation and deletion of documents with the graph invariants enforced:
//! a parent must exist and belong to the same owner, size and checksum
//! come from the stored bytes, and deletion cascades depth-first through
//! the children. Every creation feeds the event bus, which is what drives
//! the processing pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use docflow_sdk::document::{Document, StorageDescriptor};
use docflow_sdk::error::StoreError;
use docflow_sdk::events::{EventDraft, EventType, JsonMap};
use docflow_sdk::payload;
use docflow_sdk::storage::{
    DocumentStore as _, DocumentTypeStore as _, ObjectStore, SourceStore as _, StoreResult, Stores,
};

use crate::error::ApiError;
use crate::events::bus::EventBus;
use crate::sources::SourceService;

/// Inputs for document creation. Storage is already settled; the service
/// validates graph invariants and emits `document.created`.
pub struct NewDocument {
    pub document_type: String,
    pub owner_id: Uuid,
    pub source_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub storage: StorageDescriptor,
    pub properties: JsonMap,
}

pub struct DocumentService {
    stores: Stores,
    bus: Arc<EventBus>,
    objects: Arc<dyn ObjectStore>,
    sources: SourceService,
}

impl DocumentService {
    pub fn new(stores: Stores, bus: Arc<EventBus>, objects: Arc<dyn ObjectStore>) -> Self {
        let sources = SourceService::new(stores.clone());
        Self {
            stores,
            bus,
            objects,
            sources,
        }
    }

    /// Create a document and emit `document.created`.
    pub async fn create(&self, new: NewDocument) -> Result<Document, ApiError> {
        if self
            .stores
            .document_types
            .document_type(&new.document_type)
            .await?
            .is_none()
        {
            return Err(ApiError::validation(format!(
                "unknown document type: {}",
                new.document_type
            )));
        }

        if let Some(parent_id) = new.parent_id {
            let parent = self
                .stores
                .documents
                .document(parent_id)
                .await?
                .ok_or_else(|| {
                    ApiError::validation(format!("parent document {parent_id} not found"))
                })?;
            if parent.owner_id != new.owner_id {
                return Err(ApiError::validation(
                    "parent document belongs to a different owner",
                ));
            }
        }

        if let Some(source_id) = new.source_id {
            let source = self
                .stores
                .sources
                .source(source_id)
                .await?
                .ok_or_else(|| ApiError::validation(format!("source {source_id} not found")))?;
            if source.owner_id != new.owner_id {
                return Err(ApiError::validation("source belongs to a different owner"));
            }
        }

        let document = Document {
            id: Uuid::new_v4(),
            document_type: new.document_type,
            owner_id: new.owner_id,
            source_id: new.source_id,
            parent_id: new.parent_id,
            storage: new.storage,
            properties: new.properties,
            created_at: chrono::Utc::now(),
        };
        self.stores
            .documents
            .insert_document(document.clone())
            .await?;

        tracing::info!(
            document_id = %document.id,
            document_type = %document.document_type,
            owner_id = %document.owner_id,
            "document created"
        );

        self.bus
            .emit(
                EventDraft::new(
                    EventType::DocumentCreated.as_str(),
                    "core:documents",
                    payload![
                        ("document_id", document.id.to_string()),
                        ("document_type", document.document_type.clone()),
                        ("owner_id", document.owner_id.to_string()),
                        (
                            "source_id",
                            document.source_id.map(|id| id.to_string())
                        ),
                        (
                            "parent_id",
                            document.parent_id.map(|id| id.to_string())
                        ),
                    ],
                )
                .user(document.owner_id),
            )
            .await;

        Ok(document)
    }

    /// Upload bytes as a new root document under the owner's Manual
    /// source, creating that source (with its default workflow) on first
    /// use.
    pub async fn upload(
        &self,
        owner_id: Uuid,
        document_type: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Document, ApiError> {
        let storage = self.objects.put(filename, content_type, bytes).await?;
        let source = self.sources.get_or_create_manual_source(owner_id).await?;

        let mut properties = JsonMap::new();
        properties.insert(
            "original_filename".to_string(),
            serde_json::json!(filename),
        );

        self.create(NewDocument {
            document_type: document_type.to_string(),
            owner_id,
            source_id: Some(source.id),
            parent_id: None,
            storage,
            properties,
        })
        .await
    }

    pub async fn document(&self, id: Uuid, owner_id: Uuid) -> Result<Document, ApiError> {
        self.stores
            .documents
            .document(id)
            .await?
            .filter(|d| d.owner_id == owner_id)
            .ok_or_else(|| ApiError::not_found("document not found"))
    }

    /// Delete a document and all descendants, depth-first. Returns the
    /// number of documents removed.
    pub async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<usize, ApiError> {
        let document = self.document(id, owner_id).await?;
        let removed = self.delete_tree(document.id).await?;

        self.bus
            .emit(
                EventDraft::new(
                    EventType::DocumentDeleted.as_str(),
                    "core:documents",
                    payload![
                        ("document_id", document.id.to_string()),
                        ("document_type", document.document_type.clone()),
                        ("cascade_count", removed),
                    ],
                )
                .user(owner_id),
            )
            .await;

        Ok(removed)
    }

    async fn delete_tree(&self, id: Uuid) -> StoreResult<usize> {
        let mut removed = 0;
        // The children list is fetched before descending so the traversal
        // holds no store locks across recursion.
        let children = self.stores.documents.children(id).await?;
        for child in children {
            removed += Box::pin(self.delete_tree(child.id)).await?;
        }
        if self.stores.documents.delete_document(id).await? {
            removed += 1;
        }
        Ok(removed)
    }
}

/// Object storage under a local directory root. Files land in
/// `uploads/<uuid>-<filename>`; the descriptor carries size and SHA-256.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<StorageDescriptor> {
        // Strip any path components the client sent along.
        let safe_name: String = filename
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            .collect();
        let relative = format!("uploads/{}-{}", Uuid::new_v4(), safe_name);
        let path = self.root.join(&relative);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend {
                    message: format!("create storage dir: {e}"),
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("write object: {e}"),
            })?;

        let checksum = format!("{:x}", Sha256::digest(bytes));

        Ok(StorageDescriptor {
            storage_plugin: "local".to_string(),
            filepath: relative,
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            checksum,
        })
    }
}
