use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use berth_core::{BerthError, Container, ContainerDetails, ContainerRef, FetchFilters, ViewState};
use berth_store::{ResourceStore, SlotTask, TaskSlot};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{same_identity, Scoped};

/// Listing entry and inspection payload of one container. Either half may be missing in stale data.
pub type DetailPayload = (Option<Container>, Option<ContainerDetails>);

/// Identity and view published together, so a payload is never shown under another identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailState {
    pub identity: Option<ContainerRef>,
    pub view: ViewState<DetailPayload>,
}

impl Scoped for DetailState {
    type Payload = DetailPayload;

    fn parts(&mut self) -> (&mut Option<ContainerRef>, &mut ViewState<DetailPayload>) {
        (&mut self.identity, &mut self.view)
    }
}

/// Detail screen workflow: list-by-id and inspect, fetched together.
pub struct DetailFetcher {
    store: Arc<ResourceStore>,
    slot: TaskSlot<()>,
    state: Arc<watch::Sender<DetailState>>,
    /// Serializes cancel, placeholder publication and slot install across concurrent `load`s.
    load_gate: Mutex<()>,
}

impl DetailFetcher {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        let (tx, _) = watch::channel(DetailState::default());
        Self { store, slot: TaskSlot::new("details"), state: Arc::new(tx), load_gate: Mutex::new(()) }
    }

    pub fn state(&self) -> DetailState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailState> {
        self.state.subscribe()
    }

    pub fn identity(&self) -> Option<ContainerRef> {
        self.state.borrow().identity.clone()
    }

    pub fn container(&self) -> Option<Container> {
        self.state.borrow().view.unwrapped_value().and_then(|(c, _)| c.clone())
    }

    pub fn details(&self) -> Option<ContainerDetails> {
        self.state.borrow().view.unwrapped_value().and_then(|(_, d)| d.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.slot.is_running()
    }

    /// Drop the fetch in flight without touching the published state.
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    /// Best local data for `identity` while its fetch runs.
    fn placeholder_view(&self, identity: &ContainerRef) -> ViewState<DetailPayload> {
        {
            let current = self.state.borrow();
            if current.identity.as_ref().is_some_and(|i| same_identity(i, identity)) {
                return current.view.clone().reloading_projection();
            }
        }
        let in_scope = identity.endpoint_id.is_none() || identity.endpoint_id == self.store.selected_endpoint();
        match self.store.cached_container(&identity.id).filter(|_| in_scope) {
            Some(c) => ViewState::Reloading((Some(c), None)),
            None => ViewState::Loading,
        }
    }

    /// Cancel any fetch in flight and load `identity`. An identity without an endpoint is pinned to
    /// the selected endpoint, or to the one selected once setup finishes.
    pub fn load(&self, identity: ContainerRef) -> SlotTask<()> {
        let _gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.slot.cancel();
        let identity = crate::pin_endpoint(identity, self.store.selected_endpoint());
        let view = self.placeholder_view(&identity);
        self.state.send_replace(DetailState { identity: Some(identity.clone()), view });

        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        self.slot.run(move |guard| async move {
            let t0 = Instant::now();
            if let Err(e) = guard.guard(store.wait_for_setup()).await {
                if e == BerthError::Cancelled {
                    return Err(e);
                }
                debug!(error = %e, "details: setup unavailable");
            }
            let resolved = crate::pin_endpoint(identity.clone(), store.selected_endpoint());
            let id = resolved.id.clone();
            let endpoint = resolved.endpoint_id;
            let filters = FetchFilters::by_id([id.clone()]);
            let fetched = guard
                .guard(async {
                    tokio::try_join!(store.fetch_containers(endpoint, &filters), store.inspect_container(&id, endpoint))
                })
                .await;
            match fetched {
                Ok((listed, details)) => {
                    let container = listed.into_iter().find(|c| c.id == id);
                    let success = ViewState::Success((container, Some(details)));
                    if !crate::commit_owned(&guard, &*state, &identity, resolved, |_| success) {
                        return Err(BerthError::Cancelled);
                    }
                    metrics::histogram!("fetch_ms", t0.elapsed().as_millis() as f64, "workflow" => "details");
                    info!(container = %id, endpoint = ?endpoint, took_ms = %t0.elapsed().as_millis(), "details: ok");
                    Ok(())
                }
                Err(e) if e.is_silent() => Err(e),
                Err(e) => {
                    if crate::commit_owned(&guard, &*state, &identity, resolved, |v| v.failed(e.clone())) {
                        metrics::counter!("fetch_errors_total", 1u64, "workflow" => "details");
                        store.reporter().report(&e, "details");
                    }
                    Err(e)
                }
            }
        })
    }
}
