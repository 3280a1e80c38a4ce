use std::sync::{Arc, Mutex};
use std::time::Duration;

use berth_core::{
    BerthError, Container, ContainerState, Endpoint, ErrorReporter, ExecuteAction, TransportError, ViewState,
};
use berth_store::{ResourceStore, StoreConfig, StoreEvent};
use berth_transport::{FixtureTransport, Op};

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl ErrorReporter for Recorder {
    fn report(&self, error: &BerthError, context: &str) {
        self.0.lock().unwrap().push(format!("{context}: {error}"));
    }
}

impl Recorder {
    fn reports(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn fixture() -> Arc<FixtureTransport> {
    let t = FixtureTransport::default();
    t.set_endpoints(vec![Endpoint::new(1, "local"), Endpoint::new(2, "edge")]);
    t.set_containers(
        1,
        vec![
            Container::new("c1", "web", Some(ContainerState::Running)),
            Container::new("c2", "db", Some(ContainerState::Exited)),
        ],
    );
    t.set_containers(2, vec![Container::new("e1", "agent", Some(ContainerState::Running))]);
    Arc::new(t)
}

fn store(t: &Arc<FixtureTransport>) -> (Arc<ResourceStore>, Arc<Recorder>) {
    let rec = Arc::new(Recorder::default());
    let s = ResourceStore::new(t.clone(), rec.clone(), StoreConfig::default());
    (s, rec)
}

fn ids(v: &ViewState<Vec<Container>>) -> Vec<String> {
    v.unwrapped_value().map(|cs| cs.iter().map(|c| c.id.clone()).collect()).unwrap_or_default()
}

fn network(msg: &str) -> BerthError {
    BerthError::Transport(TransportError::Network(msg.into()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_selects_single_endpoint_and_lists_it() {
    let t = Arc::new(FixtureTransport::default());
    t.set_endpoints(vec![Endpoint::new(1, "local")]);
    t.set_containers(1, vec![Container::new("c1", "web", Some(ContainerState::Running))]);
    let (s, rec) = store(&t);
    assert_eq!(s.selected_endpoint(), None);

    s.setup().await.unwrap();

    let snap = s.snapshot();
    assert!(snap.is_setup);
    assert_eq!(snap.selected_endpoint, Some(1));
    assert!(snap.containers.is_success());
    assert_eq!(ids(&snap.containers), vec!["c1"]);
    assert!(rec.reports().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_setup_is_joined() {
    let t = fixture();
    t.set_delay(Op::ListEndpoints, Duration::from_millis(50));
    let (s, _) = store(&t);
    let (a, b) = tokio::join!(s.setup(), s.setup());
    a.unwrap();
    b.unwrap();
    assert_eq!(t.calls(Op::ListEndpoints), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_failure_keeps_store_unset_and_reports() {
    let t = fixture();
    t.fail_next(Op::ListEndpoints, network("unreachable"));
    let (s, rec) = store(&t);

    let err = s.setup().await.unwrap_err();
    assert!(err.is_network());
    let snap = s.snapshot();
    assert!(!snap.is_setup);
    assert_eq!(snap.selected_endpoint, None);
    assert_eq!(snap.endpoints.error(), Some(&err));
    assert_eq!(rec.reports(), vec!["setup: transport: network: unreachable".to_string()]);

    s.setup().await.unwrap();
    assert_eq!(s.selected_endpoint(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_latest_refresh_commits() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();

    t.set_delay(Op::ListContainers, Duration::from_millis(150));
    let first = s.refresh_containers();
    tokio::time::sleep(Duration::from_millis(20)).await;

    t.clear_delays();
    t.set_containers(1, vec![Container::new("c3", "cache", Some(ContainerState::Running))]);
    let second = s.refresh_containers();

    assert_eq!(second.await, Ok(()));
    assert_eq!(first.await, Err(BerthError::Cancelled));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ids(&s.containers()), vec!["c3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_moves_success_to_reloading() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();

    t.set_delay(Op::ListContainers, Duration::from_millis(100));
    let task = s.refresh_containers();
    tokio::time::sleep(Duration::from_millis(20)).await;
    match s.containers() {
        ViewState::Reloading(cs) => assert_eq!(cs.len(), 2),
        other => panic!("expected reloading, got {other:?}"),
    }
    assert!(s.is_loading());
    task.await.unwrap();
    assert!(s.containers().is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_refresh_after_execute_keeps_last_known_good() {
    let t = fixture();
    let (s, rec) = store(&t);
    s.setup().await.unwrap();

    t.fail_next(Op::ListContainers, network("down"));
    let refresh = s.execute(ExecuteAction::Kill, "c1").await.unwrap();
    let err = refresh.await.unwrap_err();
    assert!(err.is_network());

    match s.containers() {
        ViewState::Failure { error, stale: Some(cs) } => {
            assert_eq!(error, err);
            assert_eq!(cs[0].id, "c1");
            assert_eq!(cs[0].state, Some(ContainerState::Running));
        }
        other => panic!("expected failure with stale payload, got {other:?}"),
    }
    assert_eq!(rec.reports(), vec!["containers: transport: network: down".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_action_starts_no_refresh() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();
    let listings = t.calls(Op::ListContainers);

    let err = s.execute(ExecuteAction::Unpause, "c1").await.unwrap_err();
    assert!(matches!(err, BerthError::ActionRejected { .. }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(t.calls(Op::ListContainers), listings);
    assert!(s.containers().is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_needs_selection() {
    let t = fixture();
    let (s, _) = store(&t);
    let err = s.execute(ExecuteAction::Start, "c2").await.unwrap_err();
    assert_eq!(err, BerthError::NoEndpointSelected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switching_endpoint_cancels_old_listing() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();

    t.set_delay_for(Op::ListContainers, "1", Duration::from_millis(150));
    let old = s.refresh_containers();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let new = s.select_endpoint(Some(2));

    assert_eq!(old.await, Err(BerthError::Cancelled));
    new.await.unwrap();
    assert_eq!(s.selected_endpoint(), Some(2));
    assert_eq!(ids(&s.containers()), vec!["e1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_endpoint_means_no_selection() {
    let t = fixture();
    let (s, rec) = store(&t);
    s.setup().await.unwrap();

    s.select_endpoint(Some(42)).await.unwrap();
    assert_eq!(s.selected_endpoint(), None);
    assert_eq!(s.containers(), ViewState::Success(Vec::new()));
    assert!(rec.reports().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endpoint_refresh_revalidates_selection() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();
    s.select_endpoint(Some(2)).await.unwrap();

    t.set_endpoints(vec![Endpoint::new(1, "local")]);
    s.refresh_endpoints().await.unwrap();
    assert_eq!(s.selected_endpoint(), Some(1));
    if let Some(task) = s.containers_task() {
        task.await.unwrap();
    }
    assert_eq!(ids(&s.containers()), vec!["c1", "c2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preferred_endpoint_wins_on_first_setup() {
    let t = fixture();
    let rec = Arc::new(Recorder::default());
    let cfg = StoreConfig { preferred_endpoint: Some(2), ..StoreConfig::default() };
    let s = ResourceStore::new(t.clone(), rec, cfg);
    s.setup().await.unwrap();
    assert_eq!(s.selected_endpoint(), Some(2));
    assert_eq!(ids(&s.containers()), vec!["e1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_cancels_and_clears() {
    let t = fixture();
    let (s, _) = store(&t);
    s.setup().await.unwrap();
    let epoch = s.snapshot().epoch;
    let mut events = s.subscribe_events();

    t.set_delay(Op::ListContainers, Duration::from_millis(150));
    let inflight = s.refresh_containers();
    tokio::time::sleep(Duration::from_millis(20)).await;
    s.reset();

    assert_eq!(inflight.await, Err(BerthError::Cancelled));
    let snap = s.snapshot();
    assert!(!snap.is_setup);
    assert_eq!(snap.selected_endpoint, None);
    assert_eq!(snap.containers, ViewState::Loading);
    assert_eq!(snap.endpoints, ViewState::Loading);
    assert!(snap.epoch > epoch);
    assert!(!s.is_loading());

    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        seen.push(ev);
    }
    assert_eq!(seen.last(), Some(&StoreEvent::Reset));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeded_stubs_are_replaced_by_listing() {
    let t = fixture();
    t.set_delay(Op::ListContainers, Duration::from_millis(80));
    let (s, _) = store(&t);
    s.setup_task().await.unwrap();

    assert!(s.seed_containers(1, vec![Container::placeholder("c1", Some("web"))]));
    let stub = s.cached_container("c1").unwrap();
    assert!(stub.is_stored);
    let err = s.execute(ExecuteAction::Stop, "c1").await.unwrap_err();
    assert!(matches!(err, BerthError::ActionRejected { .. }));

    if let Some(task) = s.containers_task() {
        task.await.unwrap();
    }
    let listed = s.cached_container("c1").unwrap();
    assert!(!listed.is_stored);
    assert_eq!(ids(&s.containers()), vec!["c1", "c2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn epoch_advances_on_commits() {
    let t = fixture();
    let (s, _) = store(&t);
    let mut epoch = s.subscribe_epoch();
    s.setup().await.unwrap();
    assert!(epoch.has_changed().unwrap());
    assert_eq!(*epoch.borrow_and_update(), s.snapshot().epoch);
}
