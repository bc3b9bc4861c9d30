// Job scheduling and execution: end-to-end pipeline runs, parallel
// dispatch, cancellation, concurrency caps, fingerprinting, retries, and
// the store-level state machine.

use std::time::Duration;

use docflow_sdk::context::{JobRequest, JobSubmitter, SubmitOutcome};
use docflow_sdk::events::JsonMap;
use docflow_sdk::job::{Job, JobStatus};
use docflow_sdk::plugin::PluginSet;
use docflow_sdk::storage::{DocumentStore as _, JobStore, WorkflowStore as _};
use docflow_sdk::workflow::{WorkflowScope, WorkflowStep};
use uuid::Uuid;

use crate::documents::NewDocument;
use crate::error::ApiError;
use crate::server::App;
use crate::storage::MemoryStores;

use super::helpers::{
    descriptor, insert_document, meta, register_fixture, seed_type, start, test_config,
    wait_until, FixtureProbe,
};

async fn seed_user_step(app: &App, owner: Uuid, doc_type: &str, seq: u32, plugin: &str) {
    app.state
        .stores
        .workflows
        .insert_step(WorkflowStep::new(
            WorkflowScope::User(owner),
            doc_type,
            seq,
            plugin,
            JsonMap::new(),
        ))
        .await
        .unwrap();
}

async fn create_document(app: &App, doc_type: &str, owner: Uuid) -> docflow_sdk::Document {
    app.state
        .documents
        .create(NewDocument {
            document_type: doc_type.to_string(),
            owner_id: owner,
            source_id: None,
            parent_id: None,
            storage: descriptor("audio/mpeg"),
            properties: JsonMap::new(),
        })
        .await
        .unwrap()
}

async fn job_for(app: &App, document_id: Uuid) -> Option<Job> {
    app.state
        .stores
        .jobs
        .jobs_for_document(document_id)
        .await
        .unwrap()
        .into_iter()
        .next()
}

#[tokio::test]
async fn document_creation_drives_the_pipeline_to_completion() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("transcribe", &["audio"], Some("transcription")),
        probe.clone(),
        |_| {},
    );
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "transcribe").await;

    let document = create_document(&app, "audio", owner).await;

    let state = app.state.clone();
    let document_id = document.id;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let state = state.clone();
            async move {
                state
                    .stores
                    .documents
                    .child_of_type(document_id, "transcription")
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await,
        "transcription child never appeared"
    );

    let job = job_for(&app, document.id).await.expect("job record");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.output_document_id.is_some());
    assert_eq!(probe.processed_count(), 1);
}

#[tokio::test]
async fn child_documents_cascade_through_per_type_workflows() {
    let probe = FixtureProbe::new();
    let mut set = PluginSet::new();
    for metadata in [
        meta("transcribe", &["audio"], Some("transcription")),
        meta("sentiment", &["transcription"], Some("sentiment")),
    ] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "transcribe").await;
    seed_user_step(&app, owner, "transcription", 1, "sentiment").await;

    let document = create_document(&app, "audio", owner).await;

    // The transcription child re-enters the pipeline and sentiment runs
    // on it, producing a grandchild.
    let state = app.state.clone();
    let document_id = document.id;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let state = state.clone();
            async move {
                let Some(child) = state
                    .stores
                    .documents
                    .child_of_type(document_id, "transcription")
                    .await
                    .unwrap()
                else {
                    return false;
                };
                state
                    .stores
                    .documents
                    .child_of_type(child.id, "sentiment")
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await,
        "sentiment grandchild never appeared"
    );
    assert_eq!(probe.processed_count(), 2);
}

#[tokio::test]
async fn documents_without_a_workflow_spawn_no_jobs() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("transcribe", &["audio"], Some("transcription")),
        probe.clone(),
        |_| {},
    );
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let document = create_document(&app, "audio", Uuid::new_v4()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(job_for(&app, document.id).await.is_none());
    assert_eq!(probe.processed_count(), 0);
}

#[tokio::test]
async fn parallel_siblings_run_concurrently() {
    let probe = FixtureProbe::new();
    let mut set = PluginSet::new();
    for metadata in [
        meta("transcribe_words", &["audio"], Some("transcription_words")),
        meta("transcribe_diarize", &["audio"], Some("transcription_diarize")),
    ] {
        set = register_fixture(set, metadata, probe.clone(), |p| {
            p.delay = Duration::from_millis(300);
            p.progress_steps = 3;
        });
    }
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "transcribe_words").await;
    seed_user_step(&app, owner, "audio", 1, "transcribe_diarize").await;

    let (client_id, mut rx) = app.state.bus.register_client();
    create_document(&app, "audio", owner).await;

    // Drain bus events until both completions arrive.
    let mut observed: Vec<String> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while observed
        .iter()
        .filter(|t| t.as_str() == "job.completed")
        .count()
        < 2
    {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(event)) => observed.push(event.event_type),
            _ => panic!("timed out waiting for both completions; saw {observed:?}"),
        }
    }
    app.state.bus.unregister_client(client_id);

    // Both starts are observed before any completion.
    let first_completed = observed
        .iter()
        .position(|t| t == "job.completed")
        .unwrap();
    let starts_before = observed[..first_completed]
        .iter()
        .filter(|t| t.as_str() == "job.started")
        .count();
    assert_eq!(starts_before, 2, "event order was {observed:?}");
    assert_eq!(probe.max_concurrent_seen(), 2);
}

#[tokio::test]
async fn cancellation_mid_progress_stops_the_job() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("slow", &["audio"], None),
        probe.clone(),
        |p| {
            p.delay = Duration::from_secs(3);
            p.progress_steps = 10;
            p.produce_output = false;
        },
    );
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "slow").await;
    let document = create_document(&app, "audio", owner).await;

    // Wait for the worker to report some progress.
    let state = app.state.clone();
    let document_id = document.id;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let state = state.clone();
            async move {
                state
                    .stores
                    .jobs
                    .jobs_for_document(document_id)
                    .await
                    .unwrap()
                    .first()
                    .map(|j| j.status == JobStatus::Running && j.progress >= 40)
                    .unwrap_or(false)
            }
        })
        .await
    );

    let job = job_for(&app, document.id).await.unwrap();
    let cancelled = app
        .state
        .scheduler
        .cancel(job.id, "user requested", None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // No completion ever lands, and the record stays cancelled.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = job_for(&app, document.id).await.unwrap();
    assert_eq!(settled.status, JobStatus::Cancelled);
    assert_eq!(probe.processed_count(), 0);

    // Cancelling again is a conflict: terminal states are final.
    let err = app
        .state
        .scheduler
        .cancel(job.id, "again", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict { .. }));
}

#[tokio::test]
async fn per_plugin_concurrency_cap_is_honored() {
    let probe = FixtureProbe::new();
    let mut metadata = meta("serial", &["audio"], None);
    metadata.max_concurrent_jobs = 1;
    let set = register_fixture(PluginSet::new(), metadata, probe.clone(), |p| {
        p.delay = Duration::from_millis(150);
        p.produce_output = false;
    });
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    for _ in 0..3 {
        let document = insert_document(&app.state, "audio", owner, None).await;
        let outcome = app
            .state
            .scheduler
            .submit(JobRequest {
                plugin_name: "serial".to_string(),
                document_id: document.id,
                settings: JsonMap::new(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Scheduled { .. }));
    }

    let probe_ref = probe.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let probe = probe_ref.clone();
            async move { probe.processed_count() == 3 }
        })
        .await
    );
    assert_eq!(probe.max_concurrent_seen(), 1);
}

#[tokio::test]
async fn existing_output_short_circuits_submission() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("transcribe", &["audio"], Some("transcription")),
        probe.clone(),
        |_| {},
    );
    let app = start(set).await;
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    let parent = insert_document(&app.state, "audio", owner, None).await;

    // A transcription child already exists for this parent.
    let mut child = insert_document(&app.state, "transcription", owner, None).await;
    child.parent_id = Some(parent.id);
    app.state
        .stores
        .documents
        .insert_document(child.clone())
        .await
        .unwrap();

    let outcome = app
        .state
        .scheduler
        .submit(JobRequest {
            plugin_name: "transcribe".to_string(),
            document_id: parent.id,
            settings: JsonMap::new(),
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::AlreadyDone {
            existing_document_id: child.id
        }
    );

    // An explicit regenerate request schedules anyway.
    let mut settings = JsonMap::new();
    settings.insert("regenerate".to_string(), serde_json::json!(true));
    let outcome = app
        .state
        .scheduler
        .submit(JobRequest {
            plugin_name: "transcribe".to_string(),
            document_id: parent.id,
            settings,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Scheduled { .. }));
}

#[tokio::test]
async fn unknown_plugin_submission_is_rejected() {
    let app = start(PluginSet::new()).await;
    seed_type(&app.state, "audio").await;
    let document = insert_document(&app.state, "audio", Uuid::new_v4(), None).await;

    let err = app
        .state
        .scheduler
        .submit(JobRequest {
            plugin_name: "ghost".to_string(),
            document_id: document.id,
            settings: JsonMap::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        docflow_sdk::error::SubmitError::UnknownPlugin { .. }
    ));
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("flaky", &["audio"], None),
        probe.clone(),
        |p| {
            p.fail_transient_times = 2;
            p.produce_output = false;
        },
    );

    let mut config = test_config();
    config.workers.max_retries = 3;
    config.workers.retry_delay = Duration::from_millis(20);
    let app = crate::server::bootstrap(config, set).await.unwrap();
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "flaky").await;
    let document = create_document(&app, "audio", owner).await;

    let state = app.state.clone();
    let document_id = document.id;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let state = state.clone();
            async move {
                state
                    .stores
                    .jobs
                    .jobs_for_document(document_id)
                    .await
                    .unwrap()
                    .first()
                    .map(|j| j.status == JobStatus::Completed)
                    .unwrap_or(false)
            }
        })
        .await
    );
    assert_eq!(probe.attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_job_with_the_error_captured() {
    let probe = FixtureProbe::new();
    let set = register_fixture(
        PluginSet::new(),
        meta("doomed", &["audio"], None),
        probe.clone(),
        |p| {
            p.fail_transient_times = 10;
            p.produce_output = false;
        },
    );

    let mut config = test_config();
    config.workers.max_retries = 1;
    config.workers.retry_delay = Duration::from_millis(20);
    let app = crate::server::bootstrap(config, set).await.unwrap();
    seed_type(&app.state, "audio").await;

    let owner = Uuid::new_v4();
    seed_user_step(&app, owner, "audio", 1, "doomed").await;
    let document = create_document(&app, "audio", owner).await;

    let state = app.state.clone();
    let document_id = document.id;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let state = state.clone();
            async move {
                state
                    .stores
                    .jobs
                    .jobs_for_document(document_id)
                    .await
                    .unwrap()
                    .first()
                    .map(|j| j.status == JobStatus::Failed)
                    .unwrap_or(false)
            }
        })
        .await
    );

    let job = job_for(&app, document.id).await.unwrap();
    assert!(job.error_message.unwrap().contains("transient failure"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn submissions_are_refused_during_shutdown() {
    let app = start(PluginSet::new()).await;
    seed_type(&app.state, "audio").await;
    let document = insert_document(&app.state, "audio", Uuid::new_v4(), None).await;

    app.state.shutdown.trigger();

    let outcome = app
        .state
        .scheduler
        .submit(JobRequest {
            plugin_name: "anything".to_string(),
            document_id: document.id,
            settings: JsonMap::new(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Refused { .. }));
}

#[tokio::test]
async fn store_enforces_the_job_state_machine() {
    let memory = MemoryStores::new();
    let job = Job::new(Uuid::new_v4(), "p");
    let id = job.id;
    memory.insert_job(job).await.unwrap();

    // Pending cannot run or complete directly.
    assert!(memory.set_running(id).await.is_err());
    assert!(memory
        .set_completed(id, JsonMap::new(), None)
        .await
        .is_err());

    memory.set_queued(id, Uuid::new_v4()).await.unwrap();
    memory.set_running(id).await.unwrap();
    memory.set_cancelled(id, "cancel wins").await.unwrap();

    // Terminal is final: no completion, failure, or restart.
    assert!(memory
        .set_completed(id, JsonMap::new(), None)
        .await
        .is_err());
    assert!(memory.set_failed(id, "late").await.is_err());
    assert!(memory.set_running(id).await.is_err());

    let settled = memory.job(id).await.unwrap().unwrap();
    assert_eq!(settled.status, JobStatus::Cancelled);
    assert_eq!(settled.error_message.as_deref(), Some("cancel wins"));
}

#[tokio::test]
async fn progress_is_monotonic_while_running() {
    let memory = MemoryStores::new();
    let job = Job::new(Uuid::new_v4(), "p");
    let id = job.id;
    memory.insert_job(job).await.unwrap();
    memory.set_queued(id, Uuid::new_v4()).await.unwrap();
    memory.set_running(id).await.unwrap();

    memory.set_progress(id, 50, "halfway").await.unwrap();
    // A stale lower report does not roll progress back.
    let job = memory.set_progress(id, 30, "stale").await.unwrap();
    assert_eq!(job.progress, 50);
    let job = memory.set_progress(id, 70, "ahead").await.unwrap();
    assert_eq!(job.progress, 70);

    // Progress is only writable while running.
    memory.set_completed(id, JsonMap::new(), None).await.unwrap();
    assert!(memory.set_progress(id, 90, "late").await.is_err());
    assert_eq!(memory.job(id).await.unwrap().unwrap().progress, 100);
}
