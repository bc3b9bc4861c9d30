// Workflow resolver: scope precedence, read-time validation, and partial
// progress through imperfect workflows.

use docflow_sdk::events::JsonMap;
use docflow_sdk::plugin::PluginSet;
use docflow_sdk::storage::WorkflowStore as _;
use docflow_sdk::workflow::{WorkflowScope, WorkflowStep};
use uuid::Uuid;

use crate::server::App;

use super::helpers::{insert_document, meta, register_fixture, start, FixtureProbe};

async fn pipeline_app() -> App {
    let probe = FixtureProbe::new();
    let mut set = PluginSet::new();
    for metadata in [
        meta("transcribe", &["audio"], Some("transcription")),
        meta("sentiment", &["transcription"], Some("sentiment")),
        meta("summarize", &["sentiment"], Some("summary")),
        meta("transcribe_words", &["audio"], Some("transcription_words")),
        meta("transcribe_diarize", &["audio"], Some("transcription_diarize")),
    ] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }
    start(set).await
}

async fn seed_step(app: &App, scope: WorkflowScope, seq: u32, plugin: &str) -> WorkflowStep {
    let step = WorkflowStep::new(scope, "audio", seq, plugin, JsonMap::new());
    app.state
        .stores
        .workflows
        .insert_step(step.clone())
        .await
        .unwrap();
    step
}

#[tokio::test]
async fn resolves_full_chain_in_order() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    seed_step(&app, scope, 1, "transcribe").await;
    seed_step(&app, scope, 2, "sentiment").await;
    seed_step(&app, scope, 3, "summarize").await;

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    let names: Vec<&str> = steps.iter().map(|s| s.plugin_name.as_str()).collect();
    assert_eq!(names, vec!["transcribe", "sentiment", "summarize"]);

    // Ordering is monotone nondecreasing in sequence number.
    let sequences: Vec<u32> = steps.iter().map(|s| s.sequence_number).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
}

#[tokio::test]
async fn source_workflow_takes_precedence_over_user_default() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let source_id = Uuid::new_v4();

    seed_step(&app, WorkflowScope::User(owner), 1, "transcribe").await;
    seed_step(&app, WorkflowScope::Source(source_id), 1, "transcribe_words").await;

    let document = insert_document(&app.state, "audio", owner, Some(source_id)).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "transcribe_words");
}

#[tokio::test]
async fn empty_source_workflow_falls_back_to_user_default() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let source_id = Uuid::new_v4();

    seed_step(&app, WorkflowScope::User(owner), 1, "transcribe").await;

    let document = insert_document(&app.state, "audio", owner, Some(source_id)).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "transcribe");
}

#[tokio::test]
async fn no_workflow_resolves_to_empty() {
    let app = pipeline_app().await;
    let document = insert_document(&app.state, "audio", Uuid::new_v4(), None).await;

    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();
    assert!(steps.is_empty());
}

#[tokio::test]
async fn unknown_plugins_are_skipped_at_read_time() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    seed_step(&app, scope, 1, "ghost_plugin").await;
    seed_step(&app, scope, 2, "transcribe").await;

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    // The unknown step is dropped and the chain continues: transcribe
    // still sees `audio` as its input.
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "transcribe");
}

#[tokio::test]
async fn disabled_steps_are_ignored() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    let mut step = WorkflowStep::new(scope, "audio", 1, "transcribe", JsonMap::new());
    step.is_enabled = false;
    app.state.stores.workflows.insert_step(step).await.unwrap();

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();
    assert!(steps.is_empty());
}

#[tokio::test]
async fn type_mismatched_steps_are_dropped_not_errored() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    // sentiment at step 1 cannot accept `audio`; the rest of the chain
    // still resolves.
    seed_step(&app, scope, 1, "sentiment").await;
    seed_step(&app, scope, 2, "transcribe").await;

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "transcribe");
}

#[tokio::test]
async fn parallel_siblings_both_resolve() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    seed_step(&app, scope, 1, "transcribe_words").await;
    seed_step(&app, scope, 1, "transcribe_diarize").await;

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    let mut names: Vec<&str> = steps.iter().map(|s| s.plugin_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["transcribe_diarize", "transcribe_words"]);
    assert!(steps.iter().all(|s| s.sequence_number == 1));
}

#[tokio::test]
async fn resolved_steps_reference_only_active_plugins() {
    let app = pipeline_app().await;
    let owner = Uuid::new_v4();
    let scope = WorkflowScope::User(owner);

    seed_step(&app, scope, 1, "transcribe").await;
    seed_step(&app, scope, 2, "sentiment").await;

    // Disable sentiment after its step was persisted.
    app.state
        .registry
        .set_enabled("sentiment", false, app.state.stores.plugin_configs.as_ref())
        .await
        .unwrap();

    let document = insert_document(&app.state, "audio", owner, None).await;
    let steps = app
        .state
        .resolver
        .workflow_for_document(&document)
        .await
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].plugin_name, "transcribe");
    for step in &steps {
        assert!(app.state.registry.is_active(&step.plugin_name));
    }
}
