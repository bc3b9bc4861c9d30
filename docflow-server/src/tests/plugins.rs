// Plugin loader and registry: dependency ordering, cycle detection,
// failure isolation.

use docflow_sdk::plugin::{PluginSet, PluginState};
use docflow_sdk::storage::DocumentTypeStore as _;

use super::helpers::{meta, register_fixture, start, FixtureProbe};

#[tokio::test]
async fn plugins_load_in_dependency_order() {
    let probe = FixtureProbe::new();

    let mut m_upload = meta("upload", &[], None);
    m_upload.priority = 10;
    let mut m_transcribe = meta("transcribe", &["audio"], Some("transcription"));
    m_transcribe.dependencies = vec!["upload".to_string()];
    m_transcribe.priority = 20;
    let mut m_sentiment = meta("sentiment", &["transcription"], Some("sentiment"));
    m_sentiment.dependencies = vec!["transcribe".to_string()];
    m_sentiment.priority = 30;

    // Registration order is deliberately reversed; the load order must
    // come from the dependency graph.
    let mut set = PluginSet::new();
    for metadata in [m_sentiment, m_transcribe, m_upload] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    let app = start(set).await;

    let order = probe.setup_order.lock().unwrap().clone();
    assert_eq!(order, vec!["upload", "transcribe", "sentiment"]);

    for name in ["upload", "transcribe", "sentiment"] {
        assert_eq!(app.state.registry.state(name), Some(PluginState::Active));
    }
}

#[tokio::test]
async fn priority_breaks_ties_deterministically() {
    let probe = FixtureProbe::new();

    let mut m_a = meta("analyzer", &["text"], None);
    m_a.priority = 50;
    let mut m_b = meta("builder", &["text"], None);
    m_b.priority = 10;
    let mut m_c = meta("collector", &["text"], None);
    m_c.priority = 50;

    let mut set = PluginSet::new();
    for metadata in [m_a, m_b, m_c] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    start(set).await;

    let order = probe.setup_order.lock().unwrap().clone();
    assert_eq!(order, vec!["builder", "analyzer", "collector"]);
}

#[tokio::test]
async fn dependency_cycle_fails_both_plugins() {
    let probe = FixtureProbe::new();

    let mut m_a = meta("alpha", &["audio"], None);
    m_a.dependencies = vec!["beta".to_string()];
    let mut m_b = meta("beta", &["audio"], None);
    m_b.dependencies = vec!["alpha".to_string()];

    let mut set = PluginSet::new();
    for metadata in [m_a, m_b] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    let app = start(set).await;

    assert_eq!(app.state.registry.state("alpha"), Some(PluginState::Error));
    assert_eq!(app.state.registry.state("beta"), Some(PluginState::Error));
    assert!(app.state.registry.active().is_empty());

    let entry = app.state.registry.entry("alpha").unwrap();
    assert!(entry.last_error.unwrap().contains("circular dependency"));
    // Neither setup ever ran.
    assert!(probe.setup_order.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cycle_does_not_block_independent_plugins() {
    let probe = FixtureProbe::new();

    let mut m_a = meta("alpha", &["audio"], None);
    m_a.dependencies = vec!["beta".to_string()];
    let mut m_b = meta("beta", &["audio"], None);
    m_b.dependencies = vec!["alpha".to_string()];
    let m_c = meta("gamma", &["audio"], None);

    let mut set = PluginSet::new();
    for metadata in [m_a, m_b, m_c] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    let app = start(set).await;

    assert_eq!(app.state.registry.state("alpha"), Some(PluginState::Error));
    assert_eq!(app.state.registry.state("beta"), Some(PluginState::Error));
    assert_eq!(app.state.registry.state("gamma"), Some(PluginState::Active));
}

#[tokio::test]
async fn unknown_dependency_fails_only_the_dependent() {
    let probe = FixtureProbe::new();

    let mut m_a = meta("needs_ghost", &["audio"], None);
    m_a.dependencies = vec!["ghost".to_string()];
    let m_b = meta("standalone", &["audio"], None);

    let mut set = PluginSet::new();
    for metadata in [m_a, m_b] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    let app = start(set).await;

    let entry = app.state.registry.entry("needs_ghost").unwrap();
    assert_eq!(entry.state, PluginState::Error);
    assert!(entry.last_error.unwrap().contains("unknown plugin"));
    assert_eq!(
        app.state.registry.state("standalone"),
        Some(PluginState::Active)
    );
}

#[tokio::test]
async fn setup_failure_does_not_poison_other_plugins() {
    let probe = FixtureProbe::new();

    let m_bad = meta("broken", &["audio"], None);
    let m_good = meta("working", &["audio"], None);

    let mut set = PluginSet::new();
    set = register_fixture(set, m_bad, probe.clone(), |p| p.fail_setup = true);
    set = register_fixture(set, m_good, probe.clone(), |_| {});

    let app = start(set).await;

    assert_eq!(app.state.registry.state("broken"), Some(PluginState::Error));
    assert_eq!(app.state.registry.state("working"), Some(PluginState::Active));
}

#[tokio::test]
async fn reserved_prefix_names_are_skipped() {
    let probe = FixtureProbe::new();

    let m_reserved = meta("_internal", &["audio"], None);
    let m_normal = meta("normal", &["audio"], None);

    let mut set = PluginSet::new();
    for metadata in [m_reserved, m_normal] {
        set = register_fixture(set, metadata, probe.clone(), |_| {});
    }

    let app = start(set).await;

    assert!(app.state.registry.entry("_internal").is_none());
    assert_eq!(app.state.registry.state("normal"), Some(PluginState::Active));
}

#[tokio::test]
async fn disabled_plugins_load_but_stay_inactive() {
    let probe = FixtureProbe::new();
    let metadata = meta("muted", &["audio"], None);

    let set = register_fixture(PluginSet::new(), metadata, probe.clone(), |_| {});

    let mut config = super::helpers::test_config();
    config.plugins.push(crate::config::PluginSettingsEntry {
        name: "muted".to_string(),
        enabled: false,
        settings: docflow_sdk::events::JsonMap::new(),
    });

    let app = crate::server::bootstrap(config, set).await.unwrap();
    assert_eq!(app.state.registry.state("muted"), Some(PluginState::Disabled));
    assert!(app.state.registry.get("muted").is_none());
}

#[tokio::test]
async fn output_document_types_are_registered() {
    let probe = FixtureProbe::new();
    let metadata = meta("transcribe", &["audio"], Some("transcription"));

    let set = register_fixture(PluginSet::new(), metadata, probe, |_| {});
    let app = start(set).await;

    let record = app
        .state
        .stores
        .document_types
        .document_type("transcription")
        .await
        .unwrap()
        .expect("type registered");
    assert_eq!(record.registered_by, "transcribe");
}
