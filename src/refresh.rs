//! Refresh coordination: lifecycle state, per-identity serialization, and the live trigger.

pub mod coordinator;
pub mod inflight;
pub mod state;
pub mod trigger;
