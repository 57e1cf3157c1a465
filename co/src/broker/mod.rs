//! Change notification substrate
//!
//! Store mutations fan out to watchers (UI, per-work orchestrator lanes)
//! as coarse-grained "something changed, re-read" events.

mod bus;
mod types;

pub use bus::{ChangeBroker, ChangeStream};
pub use types::ChangeEvent;
