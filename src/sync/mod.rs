//! Member-list synchronization.
//!
//! [`worker::SyncWorker`] walks every visible guild once per cycle, one
//! account per guild (first claim wins), pulling the lazy member list chunk
//! by chunk and batch-upserting the sightings. [`channels`] holds the
//! text-channel selection heuristics the walk drives.

pub mod channels;
pub mod worker;

pub use worker::{CycleStats, SyncWorker};
