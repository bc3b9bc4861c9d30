// HTTP surface: the thin adapter over the core services.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use uuid::Uuid;

use docflow_sdk::plugin::PluginSet;
use docflow_sdk::storage::{
    DocumentStore as _, JobStore as _, SourceStore as _, WorkflowStore as _,
};

use crate::server::App;

use super::helpers::{meta, register_fixture, seed_type, start, FixtureProbe};

async fn pipeline_app() -> App {
    let probe = FixtureProbe::new();
    let mut set = PluginSet::new();
    for metadata in [
        meta("transcribe", &["audio"], Some("transcription")),
        meta("sentiment", &["transcription"], Some("sentiment")),
        meta("frame_extract", &["video"], Some("frames")),
    ] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }
    start(set).await
}

fn server(app: &App) -> TestServer {
    TestServer::new(app.router.clone()).unwrap()
}

#[tokio::test]
async fn health_reports_status_and_plugin_count() {
    let app = pipeline_app().await;
    let server = server(&app);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["plugins_active"], 3);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let app = pipeline_app().await;
    let server = server(&app);

    let response = server.get("/api/v1/workflows/audio").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = server
        .get("/api/v1/workflows/audio")
        .add_header("x-user-id", "not-a-uuid")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_workflow_steps_can_be_added_and_listed() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4().to_string();

    let response = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "transcribe", "sequence_number": 1, "settings": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let step = response.json::<serde_json::Value>();
    assert_eq!(step["plugin_name"], "transcribe");
    assert_eq!(step["sequence_number"], 1);
    assert_eq!(step["output_type"], "transcription");

    let response = server
        .get("/api/v1/workflows/audio")
        .add_header("x-user-id", user.as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let workflow = response.json::<serde_json::Value>();
    assert_eq!(workflow["document_type"], "audio");
    assert_eq!(workflow["steps"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn incompatible_step_returns_400_and_leaves_the_store() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4().to_string();

    let response = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "transcribe", "sequence_number": 1}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    // Step 1 outputs `transcription`; frame_extract accepts only video.
    let response = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "frame_extract", "sequence_number": 2}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["error"]["type"], "validation_error");

    let response = server
        .get("/api/v1/workflows/audio")
        .add_header("x-user-id", user.as_str())
        .await;
    assert_eq!(
        response.json::<serde_json::Value>()["steps"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn available_plugins_reflect_the_insertion_point() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4().to_string();

    server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "transcribe", "sequence_number": 1}))
        .await;

    let response = server
        .get("/api/v1/workflows/audio/available-plugins?current_step=2")
        .add_header("x-user-id", user.as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let plugins = response.json::<serde_json::Value>();
    let names: Vec<&str> = plugins
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["sentiment"]);
}

#[tokio::test]
async fn steps_can_be_deleted() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4().to_string();

    let step = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "transcribe", "sequence_number": 1}))
        .await
        .json::<serde_json::Value>();
    let step_id = step["id"].as_str().unwrap();

    let response = server
        .delete(&format!("/api/v1/workflows/audio/steps/{step_id}"))
        .add_header("x-user-id", user.as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let response = server
        .delete(&format!("/api/v1/workflows/audio/steps/{step_id}"))
        .add_header("x-user-id", user.as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_reorder_returns_400() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4().to_string();

    let first = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "transcribe", "sequence_number": 1}))
        .await
        .json::<serde_json::Value>();
    let second = server
        .post("/api/v1/workflows/audio/steps")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"plugin_name": "sentiment", "sequence_number": 2}))
        .await
        .json::<serde_json::Value>();

    let response = server
        .put("/api/v1/workflows/audio/reorder")
        .add_header("x-user-id", user.as_str())
        .json(&json!({"steps": [
            {"id": first["id"], "sequence_number": 2},
            {"id": second["id"], "sequence_number": 1},
        ]}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn source_workflows_require_source_ownership() {
    let app = pipeline_app().await;
    let server = server(&app);
    let owner = Uuid::new_v4();

    let (source, _key) = app
        .state
        .sources
        .create_source(owner, "recorder", None)
        .await
        .unwrap();

    // The owner sees the (empty) workflow; a stranger gets 404.
    let response = server
        .get(&format!("/api/v1/sources/{}/workflows/audio", source.id))
        .add_header("x-user-id", owner.to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = server
        .get(&format!("/api/v1/sources/{}/workflows/audio", source.id))
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_creates_a_document_under_the_manual_source() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4();
    seed_type(&app.state, "audio").await;

    let response = server
        .post("/api/v1/documents?document_type=audio&filename=note.mp3")
        .add_header("x-user-id", user.to_string().as_str())
        .add_header("content-type", "audio/mpeg")
        .bytes(vec![1u8, 2, 3, 4].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["document_type"], "audio");
    assert_eq!(body["size_bytes"], 4);
    assert!(body["source_id"].is_string());

    // The manual source now exists with its default workflow step.
    let source = app
        .state
        .stores
        .sources
        .source_by_name(user, "Manual")
        .await
        .unwrap()
        .expect("manual source");
    let steps = app
        .state
        .stores
        .workflows
        .steps(
            &docflow_sdk::workflow::WorkflowScope::Source(source.id),
            "audio",
        )
        .await
        .unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "audio_transcription");
}

#[tokio::test]
async fn upload_with_unknown_type_is_rejected() {
    let app = pipeline_app().await;
    let server = server(&app);

    let response = server
        .post("/api/v1/documents?document_type=mystery")
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .bytes(vec![1u8].into())
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_a_terminal_job_returns_400() {
    let app = pipeline_app().await;
    let server = server(&app);
    let user = Uuid::new_v4();
    seed_type(&app.state, "audio").await;

    let document = super::helpers::insert_document(&app.state, "audio", user, None).await;
    let mut job = docflow_sdk::job::Job::new(document.id, "transcribe");
    job.status = docflow_sdk::job::JobStatus::Pending;
    let job_id = job.id;
    app.state.stores.jobs.insert_job(job).await.unwrap();
    app.state
        .stores
        .jobs
        .set_cancelled(job_id, "already done")
        .await
        .unwrap();

    let response = server
        .post(&format!("/api/v1/jobs/{job_id}/cancel"))
        .add_header("x-user-id", user.to_string().as_str())
        .json(&json!({"reason": "too late"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["error"]["type"], "conflict");
}

#[tokio::test]
async fn job_snapshot_requires_document_ownership() {
    let app = pipeline_app().await;
    let server = server(&app);
    let owner = Uuid::new_v4();
    seed_type(&app.state, "audio").await;

    let document = super::helpers::insert_document(&app.state, "audio", owner, None).await;
    let job = docflow_sdk::job::Job::new(document.id, "transcribe");
    let job_id = job.id;
    app.state.stores.jobs.insert_job(job).await.unwrap();

    let response = server
        .get(&format!("/api/v1/jobs/{job_id}"))
        .add_header("x-user-id", owner.to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>()["status"], "pending");

    let response = server
        .get(&format!("/api/v1/jobs/{job_id}"))
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn recent_events_endpoint_returns_newest_first() {
    let app = pipeline_app().await;
    let server = server(&app);

    for event_type in ["job.started", "document.created", "job.completed"] {
        app.state
            .bus
            .emit(
                docflow_sdk::events::EventDraft::new(
                    event_type,
                    "test",
                    docflow_sdk::events::JsonMap::new(),
                )
                .no_persist(),
            )
            .await;
    }

    let response = server
        .get("/api/v1/events/recent?types=job.*")
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<serde_json::Value>();
    assert_eq!(body["count"], 2);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events[0]["type"], "job.completed");
    assert_eq!(events[1]["type"], "job.started");
}

#[tokio::test]
async fn deleting_a_document_cascades_to_children() {
    let app = pipeline_app().await;
    let server = server(&app);
    let owner = Uuid::new_v4();
    seed_type(&app.state, "audio").await;

    let parent = super::helpers::insert_document(&app.state, "audio", owner, None).await;
    let mut child = super::helpers::insert_document(&app.state, "transcription", owner, None).await;
    child.parent_id = Some(parent.id);
    app.state
        .stores
        .documents
        .insert_document(child.clone())
        .await
        .unwrap();

    // A stranger cannot delete it.
    let response = server
        .delete(&format!("/api/v1/documents/{}", parent.id))
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .delete(&format!("/api/v1/documents/{}", parent.id))
        .add_header("x-user-id", owner.to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>()["removed"], 2);

    assert!(app
        .state
        .stores
        .documents
        .document(child.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn plugin_listing_includes_states() {
    let app = pipeline_app().await;
    let server = server(&app);

    let response = server
        .get("/api/v1/plugins")
        .add_header("x-user-id", Uuid::new_v4().to_string().as_str())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<serde_json::Value>();
    let plugins = body["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 3);
    assert!(plugins.iter().all(|p| p["state"] == "active"));
}
