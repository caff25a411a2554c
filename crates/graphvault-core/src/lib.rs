//! Graphvault Core - Domain model and port definitions
//!
//! This crate contains the pieces shared by every other graphvault crate:
//! - Domain entities (ids, repo paths, collection states, item kinds)
//! - The engine error taxonomy
//! - Fault aggregation for partial-failure runs
//! - Cooperative cancellation
//! - Port definitions (traits implemented by the transport and consumed by
//!   the storage layer)

pub mod cancel;
pub mod control;
pub mod domain;
pub mod fault;
pub mod ports;
