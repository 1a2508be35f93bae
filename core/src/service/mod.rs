//! Services: the directional sync engine and the reconciliation loop.

pub mod sync;
pub mod watcher;
