//! # Sources
//!
//! External identities (devices, services) owned by a user, authenticated
//! by an API credential. Only the SHA-256 of the credential is stored; the
//! plaintext is returned once at creation together with a short display
//! prefix.
//!
//! Manual web uploads run under a per-user system source named "Manual",
//! provisioned on first use together with a default
//! `audio -> audio_transcription` workflow step.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use docflow_sdk::document::Source;
use docflow_sdk::events::JsonMap;
use docflow_sdk::storage::{SourceStore as _, Stores, WorkflowStore as _};
use docflow_sdk::workflow::{WorkflowScope, WorkflowStep};

use crate::error::ApiError;

const API_KEY_PREFIX: &str = "dfk_";
const API_KEY_RANDOM_LEN: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;

pub const MANUAL_SOURCE_NAME: &str = "Manual";

/// Generate a fresh API credential: `(plaintext, sha256_hex, prefix)`.
pub fn generate_api_key() -> (String, String, String) {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    let key = format!("{API_KEY_PREFIX}{random}");
    let hash = format!("{:x}", Sha256::digest(key.as_bytes()));
    let prefix = key[..DISPLAY_PREFIX_LEN.min(key.len())].to_string();
    (key, hash, prefix)
}

#[derive(Clone)]
pub struct SourceService {
    stores: Stores,
}

impl SourceService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Create a named source for the owner. Returns the source and the
    /// one-time plaintext API key.
    pub async fn create_source(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<(Source, String), ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::validation("source name cannot be empty"));
        }
        if self
            .stores
            .sources
            .source_by_name(owner_id, name)
            .await?
            .is_some()
        {
            return Err(ApiError::conflict(format!(
                "source '{name}' already exists"
            )));
        }

        let (key, hash, prefix) = generate_api_key();
        let source = Source {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            description,
            api_key_hash: hash,
            api_key_prefix: prefix,
            is_active: true,
            properties: JsonMap::new(),
            created_at: chrono::Utc::now(),
        };
        self.stores.sources.insert_source(source.clone()).await?;

        tracing::info!(source_id = %source.id, owner_id = %owner_id, name, "source created");
        Ok((source, key))
    }

    /// Get or create the per-user "Manual" source used for web uploads.
    /// First creation also seeds the default audio transcription workflow
    /// step for that source.
    pub async fn get_or_create_manual_source(&self, owner_id: Uuid) -> Result<Source, ApiError> {
        if let Some(source) = self
            .stores
            .sources
            .source_by_name(owner_id, MANUAL_SOURCE_NAME)
            .await?
        {
            return Ok(source);
        }

        // The key is generated for uniformity even though manual uploads
        // authenticate as the user, not the source.
        let (_, hash, prefix) = generate_api_key();
        let mut properties = JsonMap::new();
        properties.insert("is_system_source".to_string(), serde_json::json!(true));
        properties.insert(
            "created_automatically".to_string(),
            serde_json::json!(true),
        );

        let source = Source {
            id: Uuid::new_v4(),
            owner_id,
            name: MANUAL_SOURCE_NAME.to_string(),
            description: Some("System source for manual uploads".to_string()),
            api_key_hash: hash,
            api_key_prefix: prefix,
            is_active: true,
            properties,
            created_at: chrono::Utc::now(),
        };
        self.stores.sources.insert_source(source.clone()).await?;

        let default_step = WorkflowStep::new(
            WorkflowScope::Source(source.id),
            "audio",
            1,
            "audio_transcription",
            JsonMap::new(),
        );
        if let Err(e) = self.stores.workflows.insert_step(default_step).await {
            tracing::warn!(error = %e, "failed to seed default workflow for manual source");
        }

        tracing::info!(source_id = %source.id, owner_id = %owner_id, "manual source provisioned");
        Ok(source)
    }
}
