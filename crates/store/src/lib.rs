//! Berth resource store: endpoint and container collections kept in sync with the server.
//!
//! Remote work runs in [`TaskSlot`]s (`setup`, `endpoints`, `containers`), so at most one operation
//! of each kind is in flight and superseded work never commits. Readers take immutable
//! [`StoreSnapshot`]s and subscribe to the epoch or [`StoreEvent`] channels.

#![forbid(unsafe_code)]

mod config;
mod slot;
mod store;

pub use config::{nearest_line_choice, StoreConfig, LOG_LINE_CHOICES};
pub use slot::{SlotGuard, SlotTask, TaskSlot};
pub use store::{ResourceStore, StoreEvent, StoreSnapshot};
