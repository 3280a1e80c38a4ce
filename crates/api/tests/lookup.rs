use std::sync::Arc;

use berth_api::{
    BerthError, Container, ContainerEntity, ContainerLookup, InProcApi, LookupOptions, ResourceStore, SearchToken,
    StoreConfig, TracingReporter,
};
use berth_core::{ContainerState, Endpoint, TransportError};
use berth_transport::{FixtureTransport, Op};

fn api() -> (Arc<FixtureTransport>, InProcApi) {
    let t = FixtureTransport::default();
    t.set_endpoints(vec![Endpoint::new(1, "local")]);
    t.set_containers(
        1,
        vec![
            Container::new("c1", "web", Some(ContainerState::Running)),
            Container::new("c2", "worker", Some(ContainerState::Exited)),
        ],
    );
    let t = Arc::new(t);
    let store = ResourceStore::new(t.clone(), Arc::new(TracingReporter), StoreConfig::default());
    (t, InProcApi::new(store))
}

fn keys(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn offline() -> BerthError {
    BerthError::Transport(TransportError::Network("offline".into()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolves_known_ids_in_key_order() {
    let (_t, api) = api();
    let got = api.resolve(1, &keys(&["c2", "nope:ghost", "c1:web"]), LookupOptions::default()).await.unwrap();
    assert_eq!(got, vec![ContainerEntity::new("c2", Some("worker".into())), ContainerEntity::new("c1", Some("web".into()))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolves_recreated_container_by_name() {
    let (t, api) = api();
    t.set_containers(1, vec![Container::new("c1-new", "web", Some(ContainerState::Running))]);
    let opts = LookupOptions { resolve_by_name: true, ..Default::default() };
    let got = api.resolve(1, &keys(&["c1:web"]), opts).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id, "c1-new");
    assert_eq!(got[0].key(), "c1-new:web");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_resolution_uses_cache_then_stubs() {
    let (t, api) = api();
    api.store().setup().await.unwrap();

    t.fail_next(Op::ListContainers, offline());
    let opts = LookupOptions { resolve_offline: true, ..Default::default() };
    let got = api.resolve(1, &keys(&["c1", "x9:ghost"]), opts).await.unwrap();
    assert_eq!(got, vec![ContainerEntity::new("c1", Some("web".into())), ContainerEntity::new("x9", Some("ghost".into()))]);

    t.fail_next(Op::ListContainers, offline());
    let err = api.resolve(1, &keys(&["c1"]), LookupOptions::default()).await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_mode_does_not_hide_server_errors() {
    let (t, api) = api();
    t.fail_next(Op::ListContainers, BerthError::Transport(TransportError::Status { code: 500, message: "boom".into() }));
    let opts = LookupOptions { resolve_offline: true, ..Default::default() };
    assert!(api.resolve(1, &keys(&["c1"]), opts).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn matching_and_suggested() {
    let (t, api) = api();
    let got = api.matching(1, "wor").await;
    assert_eq!(got, vec![ContainerEntity::new("c2", Some("worker".into()))]);
    assert_eq!(api.suggested(1).await.unwrap().len(), 2);

    t.fail_next(Op::ListContainers, offline());
    assert!(api.matching(1, "web").await.is_empty());
    assert!(api.matching(7, "web").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_over_store_snapshot() {
    let (_t, api) = api();
    assert!(api.search("").is_empty());
    api.store().setup().await.unwrap();

    let running = api.search("state:running");
    assert_eq!(running.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);
    assert_eq!(api.search("work").len(), 1);

    let applied = [SearchToken::State(Some(ContainerState::Running))];
    let suggestions = api.suggested_tokens(&applied);
    assert_eq!(suggestions, vec![SearchToken::State(Some(ContainerState::Exited))]);
}
