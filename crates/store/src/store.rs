//! Authoritative endpoint and container collections.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use berth_core::{
    BerthError, BerthResult, Container, ContainerDetails, Endpoint, EndpointId, ErrorReporter, ExecuteAction,
    FetchFilters, ViewState,
};
use berth_transport::Transport;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::slot::{SlotGuard, SlotTask, TaskSlot};

/// Immutable view of the store, replaced wholesale on every committed mutation.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub epoch: u64,
    pub is_setup: bool,
    pub selected_endpoint: Option<EndpointId>,
    pub endpoints: ViewState<Vec<Endpoint>>,
    pub containers: ViewState<Vec<Container>>,
}

impl StoreSnapshot {
    pub fn endpoint(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.unwrapped_value()?.iter().find(|e| e.id == id)
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.unwrapped_value()?.iter().find(|c| c.id == id)
    }
}

/// Published after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    EndpointsChanged,
    SelectionChanged(Option<EndpointId>),
    ContainersChanged,
    SetupFinished,
    Reset,
}

/// Selection rule: keep `previous` if still listed, else `preferred` if listed, else the first endpoint.
fn pick_selection(previous: Option<EndpointId>, preferred: Option<EndpointId>, endpoints: &[Endpoint]) -> Option<EndpointId> {
    let listed = |id: EndpointId| endpoints.iter().any(|e| e.id == id);
    previous
        .filter(|id| listed(*id))
        .or_else(|| preferred.filter(|id| listed(*id)))
        .or_else(|| endpoints.first().map(|e| e.id))
}

pub struct ResourceStore {
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
    config: StoreConfig,
    snap: ArcSwap<StoreSnapshot>,
    writer: Mutex<()>,
    epoch_tx: watch::Sender<u64>,
    events: broadcast::Sender<StoreEvent>,
    setup_gate: Mutex<()>,
    setup_slot: TaskSlot<()>,
    endpoints_slot: TaskSlot<()>,
    containers_slot: TaskSlot<()>,
}

impl ResourceStore {
    pub fn new(transport: Arc<dyn Transport>, reporter: Arc<dyn ErrorReporter>, config: StoreConfig) -> Arc<Self> {
        let (epoch_tx, _) = watch::channel(0u64);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            transport,
            reporter,
            config,
            snap: ArcSwap::from_pointee(StoreSnapshot::default()),
            writer: Mutex::new(()),
            epoch_tx,
            events,
            setup_gate: Mutex::new(()),
            setup_slot: TaskSlot::new("setup"),
            endpoints_slot: TaskSlot::new("endpoints"),
            containers_slot: TaskSlot::new("containers"),
        })
    }

    // ----- read side -----

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snap.load_full()
    }

    pub fn endpoints(&self) -> ViewState<Vec<Endpoint>> {
        self.snap.load().endpoints.clone()
    }

    pub fn containers(&self) -> ViewState<Vec<Container>> {
        self.snap.load().containers.clone()
    }

    pub fn selected_endpoint(&self) -> Option<EndpointId> {
        self.snap.load().selected_endpoint
    }

    pub fn is_setup(&self) -> bool {
        self.snap.load().is_setup
    }

    /// Container with `id` from the last listing (or seeded stubs).
    pub fn cached_container(&self, id: &str) -> Option<Container> {
        self.snap.load().container(id).cloned()
    }

    /// Whether any slot has work in flight.
    pub fn is_loading(&self) -> bool {
        self.setup_slot.is_running() || self.endpoints_slot.is_running() || self.containers_slot.is_running()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Apply `f` to a copy of the current snapshot and publish it if `f` reported changes.
    fn write(&self, f: impl FnOnce(&mut StoreSnapshot) -> Vec<StoreEvent>) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = StoreSnapshot::clone(&self.snap.load());
        let events = f(&mut next);
        if events.is_empty() {
            return false;
        }
        next.epoch += 1;
        let epoch = next.epoch;
        self.snap.store(Arc::new(next));
        self.epoch_tx.send_replace(epoch);
        for ev in events {
            let _ = self.events.send(ev);
        }
        true
    }

    // ----- setup -----

    /// Bootstrap: list endpoints, pick the selection, then refresh containers. A running setup is
    /// joined instead of duplicated. Resolves once the triggered container refresh settles.
    pub async fn setup(self: &Arc<Self>) -> BerthResult<()> {
        self.setup_task().await?;
        if let Some(refresh) = self.containers_slot.current() {
            if let Err(e) = refresh.await {
                debug!(error = %e, "store: post-setup refresh did not commit");
            }
        }
        Ok(())
    }

    /// Start setup, or join the one in flight.
    pub fn setup_task(self: &Arc<Self>) -> SlotTask<()> {
        let _gate = self.setup_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = self.setup_slot.current() {
            debug!("store: joining running setup");
            return running;
        }
        let this = Arc::clone(self);
        self.setup_slot.run(move |guard| this.run_setup(guard))
    }

    /// Await a running setup, if any.
    pub async fn wait_for_setup(&self) -> BerthResult<()> {
        match self.setup_slot.current() {
            Some(task) => task.await,
            None => Ok(()),
        }
    }

    async fn run_setup(self: Arc<Self>, guard: SlotGuard) -> BerthResult<()> {
        let t0 = Instant::now();
        guard.commit(|| {
            self.mark_endpoints_reloading();
        });
        let endpoints = match guard.guard(self.transport.list_endpoints()).await {
            Ok(v) => v,
            Err(e) => return Err(self.endpoints_failed(&guard, e, "setup")),
        };
        let count = endpoints.len();
        let mut selected = None;
        let committed = guard.commit(|| {
            selected = self.commit_endpoints(endpoints, true).0;
        });
        if !committed {
            return Err(BerthError::Cancelled);
        }
        metrics::histogram!("store_refresh_ms", t0.elapsed().as_millis() as f64, "target" => "setup");
        info!(endpoints = count, selected = ?selected, took_ms = %t0.elapsed().as_millis(), "store: setup ok");
        self.refresh_containers();
        Ok(())
    }

    // ----- endpoints -----

    /// Re-list endpoints and re-validate the selection. A changed selection clears the container
    /// collection and refreshes it.
    pub fn refresh_endpoints(self: &Arc<Self>) -> SlotTask<()> {
        let this = Arc::clone(self);
        self.endpoints_slot.run(move |guard| this.run_endpoints(guard))
    }

    async fn run_endpoints(self: Arc<Self>, guard: SlotGuard) -> BerthResult<()> {
        let t0 = Instant::now();
        guard.commit(|| {
            self.mark_endpoints_reloading();
        });
        let endpoints = match guard.guard(self.transport.list_endpoints()).await {
            Ok(v) => v,
            Err(e) => return Err(self.endpoints_failed(&guard, e, "endpoints")),
        };
        let count = endpoints.len();
        let mut outcome = (None, false);
        if !guard.commit(|| outcome = self.commit_endpoints(endpoints, false)) {
            return Err(BerthError::Cancelled);
        }
        let (selected, changed) = outcome;
        metrics::counter!("store_refresh_total", 1u64, "target" => "endpoints", "outcome" => "ok");
        info!(endpoints = count, selected = ?selected, selection_changed = changed, took_ms = %t0.elapsed().as_millis(), "store: endpoints ok");
        if changed {
            self.refresh_containers();
        }
        Ok(())
    }

    fn mark_endpoints_reloading(&self) {
        self.write(|s| {
            if s.endpoints.is_loading() {
                return Vec::new();
            }
            s.endpoints = std::mem::take(&mut s.endpoints).reloading_projection();
            vec![StoreEvent::EndpointsChanged]
        });
    }

    /// Returns the resulting selection and whether it changed.
    fn commit_endpoints(&self, endpoints: Vec<Endpoint>, mark_setup: bool) -> (Option<EndpointId>, bool) {
        let mut outcome = (None, false);
        self.write(|s| {
            let previous = s.selected_endpoint;
            let next = pick_selection(previous, self.config.preferred_endpoint, &endpoints);
            let mut events = vec![StoreEvent::EndpointsChanged];
            s.endpoints = ViewState::Success(endpoints);
            if next != previous {
                s.selected_endpoint = next;
                s.containers = ViewState::Loading;
                events.push(StoreEvent::SelectionChanged(next));
                events.push(StoreEvent::ContainersChanged);
            }
            if mark_setup && !s.is_setup {
                s.is_setup = true;
                events.push(StoreEvent::SetupFinished);
            }
            outcome = (next, next != previous);
            events
        });
        outcome
    }

    fn endpoints_failed(&self, guard: &SlotGuard, error: BerthError, context: &'static str) -> BerthError {
        if error.is_silent() {
            return error;
        }
        let committed = guard.commit(|| {
            self.write(|s| {
                s.endpoints = std::mem::take(&mut s.endpoints).failed(error.clone());
                vec![StoreEvent::EndpointsChanged]
            });
        });
        if committed {
            metrics::counter!("store_refresh_total", 1u64, "target" => "endpoints", "outcome" => "err");
            self.reporter.report(&error, context);
        }
        error
    }

    // ----- containers -----

    pub fn refresh_containers(self: &Arc<Self>) -> SlotTask<()> {
        self.refresh_containers_with(FetchFilters::default())
    }

    /// List containers of the selected endpoint, superseding any listing in flight. The result is
    /// dropped if the selection changed meanwhile.
    pub fn refresh_containers_with(self: &Arc<Self>, filters: FetchFilters) -> SlotTask<()> {
        let this = Arc::clone(self);
        self.containers_slot.run(move |guard| this.run_containers(guard, filters))
    }

    /// Handle on the container listing in flight.
    pub fn containers_task(&self) -> Option<SlotTask<()>> {
        self.containers_slot.current()
    }

    async fn run_containers(self: Arc<Self>, guard: SlotGuard, filters: FetchFilters) -> BerthResult<()> {
        if let Err(e) = self.wait_for_setup().await {
            debug!(error = %e, "store: setup unavailable, listing with current selection");
        }
        guard.check()?;

        let Some(endpoint) = self.selected_endpoint() else {
            guard.commit(|| {
                self.write(|s| {
                    if s.selected_endpoint.is_some() {
                        return Vec::new();
                    }
                    s.containers = ViewState::Success(Vec::new());
                    vec![StoreEvent::ContainersChanged]
                });
            });
            return Ok(());
        };

        guard.commit(|| {
            self.write(|s| {
                if s.selected_endpoint != Some(endpoint) || s.containers.is_loading() {
                    return Vec::new();
                }
                s.containers = std::mem::take(&mut s.containers).reloading_projection();
                vec![StoreEvent::ContainersChanged]
            });
        });

        let t0 = Instant::now();
        let result = guard.guard(self.transport.list_containers(endpoint, &filters)).await;
        let took_ms = t0.elapsed().as_millis();
        match result {
            Ok(containers) => {
                let count = containers.len();
                let mut applied = false;
                let current = guard.commit(|| {
                    applied = self.write(|s| {
                        if s.selected_endpoint != Some(endpoint) {
                            return Vec::new();
                        }
                        s.containers = ViewState::Success(containers);
                        vec![StoreEvent::ContainersChanged]
                    });
                });
                if !current {
                    return Err(BerthError::Cancelled);
                }
                if !applied {
                    debug!(endpoint, "store: selection changed, listing dropped");
                    metrics::counter!("store_stale_selection_total", 1u64);
                    return Err(BerthError::StaleSelection);
                }
                metrics::histogram!("store_refresh_ms", took_ms as f64, "target" => "containers");
                metrics::counter!("store_refresh_total", 1u64, "target" => "containers", "outcome" => "ok");
                info!(endpoint, containers = count, took_ms = %took_ms, "store: containers ok");
                Ok(())
            }
            Err(e) if e.is_silent() => Err(e),
            Err(e) => {
                let mut applied = false;
                let current = guard.commit(|| {
                    applied = self.write(|s| {
                        if s.selected_endpoint != Some(endpoint) {
                            return Vec::new();
                        }
                        s.containers = std::mem::take(&mut s.containers).failed(e.clone());
                        vec![StoreEvent::ContainersChanged]
                    });
                });
                if !current {
                    return Err(BerthError::Cancelled);
                }
                if !applied {
                    debug!(endpoint, error = %e, "store: selection changed, failure dropped");
                    metrics::counter!("store_stale_selection_total", 1u64);
                    return Err(BerthError::StaleSelection);
                }
                metrics::counter!("store_refresh_total", 1u64, "target" => "containers", "outcome" => "err");
                warn!(endpoint, error = %e, took_ms = %took_ms, "store: containers failed");
                self.reporter.report(&e, "containers");
                Err(e)
            }
        }
    }

    /// Change the selected endpoint. Unknown ids select nothing. The listing for the old endpoint is
    /// cancelled and a listing for the new selection starts.
    pub fn select_endpoint(self: &Arc<Self>, id: Option<EndpointId>) -> SlotTask<()> {
        self.containers_slot.cancel();
        let mut selected = None;
        let changed = self.write(|s| {
            let known = id.filter(|id| s.endpoint(*id).is_some());
            if id.is_some() && known.is_none() {
                debug!(requested = ?id, "store: unknown endpoint, clearing selection");
            }
            selected = known;
            if known == s.selected_endpoint {
                return Vec::new();
            }
            s.selected_endpoint = known;
            s.containers = ViewState::Loading;
            vec![StoreEvent::SelectionChanged(known), StoreEvent::ContainersChanged]
        });
        info!(selected = ?selected, changed, "store: endpoint selected");
        self.refresh_containers()
    }

    /// Install stored stubs (from a cache or a deep link) for `endpoint` while nothing was listed yet.
    pub fn seed_containers(&self, endpoint: EndpointId, containers: Vec<Container>) -> bool {
        self.write(|s| {
            if s.selected_endpoint != Some(endpoint) || s.containers.unwrapped_value().is_some() {
                return Vec::new();
            }
            let stubs = containers
                .into_iter()
                .map(|mut c| {
                    c.is_stored = true;
                    c
                })
                .collect();
            s.containers = ViewState::Reloading(stubs);
            vec![StoreEvent::ContainersChanged]
        })
    }

    // ----- actions -----

    /// Run `action` on a container of the selected endpoint. On success a container refresh is
    /// started and its handle returned; on failure nothing is refreshed.
    pub async fn execute(self: &Arc<Self>, action: ExecuteAction, container_id: &str) -> BerthResult<SlotTask<()>> {
        let endpoint = self.selected_endpoint().ok_or(BerthError::NoEndpointSelected)?;
        if self.cached_container(container_id).is_some_and(|c| c.is_stored) {
            return Err(BerthError::ActionRejected {
                action,
                container_id: container_id.to_string(),
                reason: "container is not confirmed by the server".into(),
            });
        }
        let t0 = Instant::now();
        if let Err(e) = self.transport.execute(action, container_id, endpoint).await {
            metrics::counter!("store_execute_total", 1u64, "action" => action.as_str(), "outcome" => "err");
            warn!(endpoint, container = container_id, action = %action, error = %e, "store: execute failed");
            return Err(e);
        }
        metrics::counter!("store_execute_total", 1u64, "action" => action.as_str(), "outcome" => "ok");
        info!(endpoint, container = container_id, action = %action, took_ms = %t0.elapsed().as_millis(), "store: execute ok");
        Ok(self.refresh_containers())
    }

    // ----- pass-throughs for fetchers -----

    /// `endpoint`, or the selected endpoint when `None`.
    pub fn resolve_endpoint(&self, endpoint: Option<EndpointId>) -> BerthResult<EndpointId> {
        endpoint.or_else(|| self.selected_endpoint()).ok_or(BerthError::NoEndpointSelected)
    }

    /// Listing without committing anything to the store.
    pub async fn fetch_containers(&self, endpoint: Option<EndpointId>, filters: &FetchFilters) -> BerthResult<Vec<Container>> {
        let endpoint = self.resolve_endpoint(endpoint)?;
        self.transport.list_containers(endpoint, filters).await
    }

    pub async fn inspect_container(&self, container_id: &str, endpoint: Option<EndpointId>) -> BerthResult<ContainerDetails> {
        let endpoint = self.resolve_endpoint(endpoint)?;
        self.transport.inspect_container(container_id, endpoint).await
    }

    // ----- teardown -----

    /// Cancel every slot and forget all state (logout, server switch).
    pub fn reset(&self) {
        self.setup_slot.cancel();
        self.endpoints_slot.cancel();
        self.containers_slot.cancel();
        self.write(|s| {
            *s = StoreSnapshot { epoch: s.epoch, ..Default::default() };
            vec![StoreEvent::Reset]
        });
        info!("store: reset");
    }
}
