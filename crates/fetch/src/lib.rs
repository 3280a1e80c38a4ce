//! Berth fetch workflows scoped to one screen identity: container details and logs.
//!
//! Each fetcher owns a task slot, so loading a new identity supersedes the previous fetch, and
//! publishes its state through a `watch` channel.

#![forbid(unsafe_code)]

use berth_core::{ContainerRef, EndpointId, ViewState};
use berth_store::SlotGuard;
use tokio::sync::watch;
use tracing::debug;

mod detail;
mod logs;

pub use detail::{DetailFetcher, DetailPayload, DetailState};
pub use logs::{LogFetcher, LogState};

/// Same container on the same endpoint. Display names are ignored.
pub(crate) fn same_identity(a: &ContainerRef, b: &ContainerRef) -> bool {
    a.id == b.id && a.endpoint_id == b.endpoint_id
}

/// Identity to use for a fetch: a missing endpoint becomes `selected`.
pub(crate) fn pin_endpoint(mut identity: ContainerRef, selected: Option<EndpointId>) -> ContainerRef {
    if identity.endpoint_id.is_none() {
        identity.endpoint_id = selected;
    }
    identity
}

/// Published state of a fetcher: the identity on screen and its view.
pub(crate) trait Scoped {
    type Payload;

    fn parts(&mut self) -> (&mut Option<ContainerRef>, &mut ViewState<Self::Payload>);
}

/// Commit `next` through `guard`, only while `state` still shows `requested`. The published identity
/// becomes `resolved`. Returns whether the state changed.
pub(crate) fn commit_owned<S: Scoped>(
    guard: &SlotGuard,
    state: &watch::Sender<S>,
    requested: &ContainerRef,
    resolved: ContainerRef,
    next: impl FnOnce(ViewState<S::Payload>) -> ViewState<S::Payload>,
) -> bool {
    let mut applied = false;
    let current = guard.commit(|| {
        applied = state.send_if_modified(|s| {
            let (identity, view) = s.parts();
            if !identity.as_ref().is_some_and(|i| same_identity(i, requested)) {
                return false;
            }
            *identity = Some(resolved);
            *view = next(std::mem::take(view));
            true
        });
    });
    if current && !applied {
        debug!(container = %requested.id, "fetch: identity changed, commit dropped");
    }
    current && applied
}
