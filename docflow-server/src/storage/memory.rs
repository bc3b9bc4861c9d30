//! # In-Memory Stores
//!
//! Reference implementation of every store trait over concurrent maps.
//! Used by tests and single-process deployments; it is also where the
//! store-level invariants live in executable form: the job state machine
//! is enforced here, progress is clamped monotonic, and workflow-step
//! uniqueness is checked on insert.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use docflow_sdk::document::{Document, DocumentType, Source};
use docflow_sdk::error::StoreError;
use docflow_sdk::events::{Event, JsonMap};
use docflow_sdk::job::{Job, JobStatus};
use docflow_sdk::storage::{
    DocumentStore, DocumentTypeStore, EventLog, JobStore, PluginConfigStore, SourceStore,
    StoreResult, Stores, WorkflowStore,
};
use docflow_sdk::workflow::{StepReorder, WorkflowScope, WorkflowStep};

#[derive(Default)]
pub struct MemoryStores {
    documents: DashMap<Uuid, Document>,
    jobs: DashMap<Uuid, Job>,
    steps: RwLock<HashMap<Uuid, WorkflowStep>>,
    events: RwLock<Vec<Event>>,
    plugin_settings: RwLock<HashMap<String, JsonMap>>,
    plugin_enabled: DashMap<String, bool>,
    document_types: DashMap<String, DocumentType>,
    sources: DashMap<Uuid, Source>,
}

impl MemoryStores {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bundle one memory store behind every store trait handle.
    pub fn stores(memory: &Arc<Self>) -> Stores {
        Stores {
            documents: memory.clone(),
            jobs: memory.clone(),
            workflows: memory.clone(),
            events: memory.clone(),
            plugin_configs: memory.clone(),
            document_types: memory.clone(),
            sources: memory.clone(),
        }
    }

    fn update_job<F>(&self, id: Uuid, next: JobStatus, apply: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;

        if !entry.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: entry.status.to_string(),
                to: next.to_string(),
            });
        }

        entry.status = next;
        apply(&mut entry);
        Ok(entry.clone())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStores {
    async fn insert_document(&self, document: Document) -> StoreResult<()> {
        self.documents.insert(document.id, document);
        Ok(())
    }

    async fn document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self.documents.get(&id).map(|d| d.clone()))
    }

    async fn children(&self, parent_id: Uuid) -> StoreResult<Vec<Document>> {
        let mut children: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| d.parent_id == Some(parent_id))
            .map(|d| d.clone())
            .collect();
        children.sort_by_key(|d| d.created_at);
        Ok(children)
    }

    async fn child_of_type(
        &self,
        parent_id: Uuid,
        document_type: &str,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| d.parent_id == Some(parent_id) && d.document_type == document_type)
            .min_by_key(|d| d.created_at)
            .map(|d| d.clone()))
    }

    async fn delete_document(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.documents.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStores {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn set_queued(&self, id: Uuid, task_id: Uuid) -> StoreResult<Job> {
        self.update_job(id, JobStatus::Queued, |job| {
            job.task_id = Some(task_id);
        })
    }

    async fn set_running(&self, id: Uuid) -> StoreResult<Job> {
        self.update_job(id, JobStatus::Running, |job| {
            job.started_at = Some(Utc::now());
        })
    }

    async fn set_progress(&self, id: Uuid, progress: u8, message: &str) -> StoreResult<Job> {
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;

        if entry.status != JobStatus::Running {
            return Err(StoreError::InvalidTransition {
                from: entry.status.to_string(),
                to: "running/progress".to_string(),
            });
        }

        // Monotonic while running: a stale lower report never rolls the
        // recorded progress back.
        entry.progress = entry.progress.max(progress.min(100));
        entry.progress_message = Some(message.to_string());
        Ok(entry.clone())
    }

    async fn set_completed(
        &self,
        id: Uuid,
        result: JsonMap,
        output_document_id: Option<Uuid>,
    ) -> StoreResult<Job> {
        self.update_job(id, JobStatus::Completed, |job| {
            job.progress = 100;
            job.result = Some(result);
            job.output_document_id = output_document_id;
            job.completed_at = Some(Utc::now());
        })
    }

    async fn set_failed(&self, id: Uuid, error_message: &str) -> StoreResult<Job> {
        self.update_job(id, JobStatus::Failed, |job| {
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
        })
    }

    async fn set_cancelled(&self, id: Uuid, reason: &str) -> StoreResult<Job> {
        self.update_job(id, JobStatus::Cancelled, |job| {
            job.error_message = Some(reason.to_string());
            job.completed_at = Some(Utc::now());
        })
    }

    async fn active_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
            .map(|j| j.clone())
            .collect())
    }

    async fn active_count(&self) -> StoreResult<usize> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
            .count())
    }

    async fn jobs_for_document(&self, document_id: Uuid) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.document_id == document_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

#[async_trait::async_trait]
impl WorkflowStore for MemoryStores {
    async fn steps(
        &self,
        scope: &WorkflowScope,
        document_type: &str,
    ) -> StoreResult<Vec<WorkflowStep>> {
        let steps = self.steps.read().expect("workflow steps poisoned");
        let mut matching: Vec<WorkflowStep> = steps
            .values()
            .filter(|s| s.scope == *scope && s.document_type == document_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.sequence_number
                .cmp(&b.sequence_number)
                .then(a.plugin_name.cmp(&b.plugin_name))
        });
        Ok(matching)
    }

    async fn insert_step(&self, step: WorkflowStep) -> StoreResult<()> {
        let mut steps = self.steps.write().expect("workflow steps poisoned");
        let duplicate = steps.values().any(|s| {
            s.scope == step.scope
                && s.document_type == step.document_type
                && s.sequence_number == step.sequence_number
                && s.plugin_name == step.plugin_name
        });
        if duplicate {
            return Err(StoreError::Conflict {
                message: format!(
                    "workflow step ({}, {}, {}, {}) already exists",
                    step.scope, step.document_type, step.sequence_number, step.plugin_name
                ),
            });
        }
        steps.insert(step.id, step);
        Ok(())
    }

    async fn step(&self, id: Uuid) -> StoreResult<Option<WorkflowStep>> {
        let steps = self.steps.read().expect("workflow steps poisoned");
        Ok(steps.get(&id).cloned())
    }

    async fn delete_step(&self, id: Uuid) -> StoreResult<bool> {
        let mut steps = self.steps.write().expect("workflow steps poisoned");
        Ok(steps.remove(&id).is_some())
    }

    async fn set_sequences(
        &self,
        scope: &WorkflowScope,
        document_type: &str,
        order: &[StepReorder],
    ) -> StoreResult<()> {
        let mut steps = self.steps.write().expect("workflow steps poisoned");

        // Verify every id first so the write is all-or-nothing.
        for entry in order {
            let step = steps.get(&entry.id).ok_or(StoreError::NotFound {
                entity: "workflow step",
                id: entry.id.to_string(),
            })?;
            if step.scope != *scope || step.document_type != document_type {
                return Err(StoreError::NotFound {
                    entity: "workflow step",
                    id: entry.id.to_string(),
                });
            }
        }

        for entry in order {
            if let Some(step) = steps.get_mut(&entry.id) {
                step.sequence_number = entry.sequence_number;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventLog for MemoryStores {
    async fn append_event(&self, event: &Event) -> StoreResult<()> {
        self.events
            .write()
            .expect("event log poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self
            .events
            .read()
            .expect("event log poisoned")
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.events.read().expect("event log poisoned").len())
    }
}

#[async_trait::async_trait]
impl PluginConfigStore for MemoryStores {
    async fn plugin_settings(&self) -> StoreResult<HashMap<String, JsonMap>> {
        Ok(self
            .plugin_settings
            .read()
            .expect("plugin settings poisoned")
            .clone())
    }

    async fn set_plugin_settings(&self, plugin_name: &str, settings: JsonMap) -> StoreResult<()> {
        self.plugin_settings
            .write()
            .expect("plugin settings poisoned")
            .insert(plugin_name.to_string(), settings);
        Ok(())
    }

    async fn set_plugin_enabled(&self, plugin_name: &str, enabled: bool) -> StoreResult<()> {
        self.plugin_enabled.insert(plugin_name.to_string(), enabled);
        Ok(())
    }

    async fn plugin_enabled(&self, plugin_name: &str) -> StoreResult<bool> {
        Ok(self
            .plugin_enabled
            .get(plugin_name)
            .map(|e| *e)
            .unwrap_or(true))
    }
}

#[async_trait::async_trait]
impl DocumentTypeStore for MemoryStores {
    async fn upsert_document_type(&self, document_type: DocumentType) -> StoreResult<()> {
        self.document_types
            .insert(document_type.name.clone(), document_type);
        Ok(())
    }

    async fn document_type(&self, name: &str) -> StoreResult<Option<DocumentType>> {
        Ok(self.document_types.get(name).map(|t| t.clone()))
    }

    async fn document_types(&self) -> StoreResult<Vec<DocumentType>> {
        let mut types: Vec<DocumentType> =
            self.document_types.iter().map(|t| t.clone()).collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }
}

#[async_trait::async_trait]
impl SourceStore for MemoryStores {
    async fn insert_source(&self, source: Source) -> StoreResult<()> {
        self.sources.insert(source.id, source);
        Ok(())
    }

    async fn source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        Ok(self.sources.get(&id).map(|s| s.clone()))
    }

    async fn source_by_name(&self, owner_id: Uuid, name: &str) -> StoreResult<Option<Source>> {
        Ok(self
            .sources
            .iter()
            .find(|s| s.owner_id == owner_id && s.name == name)
            .map(|s| s.clone()))
    }
}
