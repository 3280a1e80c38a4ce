//! Single-occupancy cancellable task holder.
//!
//! A [`TaskSlot`] runs at most one unit of work at a time. `run` cancels the previous occupant
//! before installing the new one. Units commit through [`SlotGuard::commit`], which checks under
//! the slot lock that the unit is still current, so a superseded unit can never write.

use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use berth_core::{BerthError, BerthResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Awaitable handle on a unit started by [`TaskSlot::run`]. Clones join the same unit.
pub struct SlotTask<T: Clone> {
    generation: u64,
    fut: Shared<BoxFuture<'static, BerthResult<T>>>,
}

impl<T: Clone> Clone for SlotTask<T> {
    fn clone(&self) -> Self {
        Self { generation: self.generation, fut: self.fut.clone() }
    }
}

impl<T: Clone> std::fmt::Debug for SlotTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTask").field("generation", &self.generation).finish_non_exhaustive()
    }
}

impl<T: Clone> SlotTask<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Outcome if the unit already finished.
    pub fn peek(&self) -> Option<BerthResult<T>> {
        self.fut.peek().cloned()
    }
}

impl<T: Clone> IntoFuture for SlotTask<T> {
    type Output = BerthResult<T>;
    type IntoFuture = Shared<BoxFuture<'static, BerthResult<T>>>;

    fn into_future(self) -> Self::IntoFuture {
        self.fut
    }
}

struct Unit<T: Clone> {
    token: CancellationToken,
    task: SlotTask<T>,
}

/// Capability handed to a unit of work: cancellation checks and guarded commits.
#[derive(Clone)]
pub struct SlotGuard {
    slot: &'static str,
    generation: u64,
    current: Arc<Mutex<u64>>,
    token: CancellationToken,
}

impl SlotGuard {
    pub fn is_current(&self) -> bool {
        *lock(&self.current) == self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || !self.is_current()
    }

    /// `Err(Cancelled)` once superseded.
    pub fn check(&self) -> BerthResult<()> {
        if self.is_cancelled() {
            Err(BerthError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Drive `fut`, aborting with `Cancelled` as soon as the unit is cancelled.
    pub async fn guard<F, R>(&self, fut: F) -> BerthResult<R>
    where
        F: Future<Output = BerthResult<R>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BerthError::Cancelled),
            r = fut => r,
        }
    }

    /// Run `f` only if this unit is still the slot's occupant. Holds the slot lock while `f` runs,
    /// so `run` and `cancel` on the same slot wait for the commit to finish.
    pub fn commit(&self, f: impl FnOnce()) -> bool {
        let current = lock(&self.current);
        if *current != self.generation || self.token.is_cancelled() {
            debug!(slot = self.slot, generation = self.generation, "slot: commit dropped");
            metrics::counter!("slot_dropped_commits_total", 1u64, "slot" => self.slot);
            return false;
        }
        f();
        true
    }
}

/// Holder of at most one outstanding unit of work.
pub struct TaskSlot<T: Clone> {
    name: &'static str,
    generation: Arc<Mutex<u64>>,
    unit: Arc<Mutex<Option<Unit<T>>>>,
}

impl<T> TaskSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self { name, generation: Arc::new(Mutex::new(0)), unit: Arc::new(Mutex::new(None)) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel the held unit (if any) and start `work` as the new occupant.
    pub fn run<F, Fut>(&self, work: F) -> SlotTask<T>
    where
        F: FnOnce(SlotGuard) -> Fut,
        Fut: Future<Output = BerthResult<T>> + Send + 'static,
    {
        let mut generation = lock(&self.generation);
        *generation += 1;
        let mine = *generation;
        let token = CancellationToken::new();
        let guard = SlotGuard {
            slot: self.name,
            generation: mine,
            current: Arc::clone(&self.generation),
            token: token.clone(),
        };
        let fut = work(guard);

        let name = self.name;
        let gen_cell = Arc::clone(&self.generation);
        let unit_cell = Arc::clone(&self.unit);
        let handle = tokio::spawn(async move {
            let out = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(out) => out,
                Err(_) => {
                    error!(slot = name, generation = mine, "slot: unit panicked");
                    Err(BerthError::Cancelled)
                }
            };
            {
                let current = lock(&gen_cell);
                if *current == mine {
                    lock(&unit_cell).take();
                }
            }
            out
        });

        let joined = async move {
            match handle.await {
                Ok(out) => out,
                Err(e) => {
                    error!(slot = name, error = %e, "slot: unit aborted");
                    Err(BerthError::Cancelled)
                }
            }
        };
        let task = SlotTask { generation: mine, fut: joined.boxed().shared() };

        let previous = lock(&self.unit).replace(Unit { token, task: task.clone() });
        if let Some(prev) = previous {
            prev.token.cancel();
            metrics::counter!("slot_superseded_total", 1u64, "slot" => self.name);
            debug!(slot = self.name, superseded = prev.task.generation, generation = mine, "slot: superseded");
        }
        drop(generation);
        task
    }

    /// Cancel the held unit. The slot is empty afterwards.
    pub fn cancel(&self) {
        let mut generation = lock(&self.generation);
        *generation += 1;
        if let Some(prev) = lock(&self.unit).take() {
            prev.token.cancel();
            debug!(slot = self.name, cancelled = prev.task.generation, "slot: cancelled");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.unit).is_some()
    }

    /// Handle on the running unit, to join it instead of starting another.
    pub fn current(&self) -> Option<SlotTask<T>> {
        lock(&self.unit).as_ref().map(|u| u.task.clone())
    }
}
