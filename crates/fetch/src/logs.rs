use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use berth_core::{BerthError, ContainerRef, LogRequest, LogText, ViewState};
use berth_store::{ResourceStore, SlotTask, TaskSlot};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{same_identity, Scoped};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogState {
    pub identity: Option<ContainerRef>,
    pub view: ViewState<LogText>,
}

impl Scoped for LogState {
    type Payload = LogText;

    fn parts(&mut self) -> (&mut Option<ContainerRef>, &mut ViewState<LogText>) {
        (&mut self.identity, &mut self.view)
    }
}

/// Log screen workflow. Changing an option reloads the current identity.
pub struct LogFetcher {
    store: Arc<ResourceStore>,
    slot: TaskSlot<()>,
    state: Arc<watch::Sender<LogState>>,
    options: Mutex<LogRequest>,
    load_gate: Mutex<()>,
}

impl LogFetcher {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        let options = LogRequest {
            line_count: store.config().log_lines,
            include_timestamps: store.config().log_timestamps,
        };
        let (tx, _) = watch::channel(LogState::default());
        Self { store, slot: TaskSlot::new("logs"), state: Arc::new(tx), options: Mutex::new(options), load_gate: Mutex::new(()) }
    }

    pub fn state(&self) -> LogState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LogState> {
        self.state.subscribe()
    }

    pub fn options(&self) -> LogRequest {
        *self.options.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn line_count(&self) -> u32 {
        self.options().line_count
    }

    pub fn include_timestamps(&self) -> bool {
        self.options().include_timestamps
    }

    pub fn is_loading(&self) -> bool {
        self.slot.is_running()
    }

    /// Set the line count; reloads when it changed and an identity is loaded.
    pub fn set_line_count(&self, line_count: u32) -> Option<SlotTask<()>> {
        self.update(|o| {
            let changed = o.line_count != line_count;
            o.line_count = line_count;
            changed
        })
    }

    pub fn set_include_timestamps(&self, include: bool) -> Option<SlotTask<()>> {
        self.update(|o| {
            let changed = o.include_timestamps != include;
            o.include_timestamps = include;
            changed
        })
    }

    fn update(&self, f: impl FnOnce(&mut LogRequest) -> bool) -> Option<SlotTask<()>> {
        let changed = f(&mut self.options.lock().unwrap_or_else(PoisonError::into_inner));
        if !changed {
            return None;
        }
        let identity = self.state.borrow().identity.clone()?;
        debug!(container = %identity.id, "logs: options changed, reloading");
        Some(self.load(identity))
    }

    /// Cancel any fetch in flight and load the logs of `identity` with the current options.
    pub fn load(&self, identity: ContainerRef) -> SlotTask<()> {
        let _gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.slot.cancel();
        let identity = crate::pin_endpoint(identity, self.store.selected_endpoint());
        let view = {
            let current = self.state.borrow();
            if current.identity.as_ref().is_some_and(|i| same_identity(i, &identity)) {
                current.view.clone().reloading_projection()
            } else {
                ViewState::Loading
            }
        };
        self.state.send_replace(LogState { identity: Some(identity.clone()), view });

        let request = self.options();
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        self.slot.run(move |guard| async move {
            let t0 = Instant::now();
            if let Err(e) = guard.guard(store.wait_for_setup()).await {
                if e == BerthError::Cancelled {
                    return Err(e);
                }
                debug!(error = %e, "logs: setup unavailable");
            }
            let resolved = crate::pin_endpoint(identity.clone(), store.selected_endpoint());
            let fetched = guard
                .guard(async {
                    let endpoint = store.resolve_endpoint(resolved.endpoint_id)?;
                    store.transport().fetch_logs(&resolved.id, endpoint, request).await
                })
                .await;
            match fetched {
                Ok(text) => {
                    let lines = text.line_count();
                    if !crate::commit_owned(&guard, &*state, &identity, resolved, |_| ViewState::Success(text)) {
                        return Err(BerthError::Cancelled);
                    }
                    metrics::histogram!("fetch_ms", t0.elapsed().as_millis() as f64, "workflow" => "logs");
                    info!(container = %identity.id, lines, requested = request.line_count, took_ms = %t0.elapsed().as_millis(), "logs: ok");
                    Ok(())
                }
                Err(e) if e.is_silent() => Err(e),
                Err(e) => {
                    if crate::commit_owned(&guard, &*state, &identity, resolved, |v| v.failed(e.clone())) {
                        metrics::counter!("fetch_errors_total", 1u64, "workflow" => "logs");
                        store.reporter().report(&e, "logs");
                    }
                    Err(e)
                }
            }
        })
    }
}
