//! Graphvault Graph - transport adapter for graph-style APIs
//!
//! Implements the core transport ports against a Microsoft-Graph-shaped
//! HTTP API:
//! - [`client::GraphClient`]: authenticated requests with retry, backoff,
//!   and jitter
//! - [`delta::GraphItemPager`]: the paginator / delta driver state machine
//! - [`drive::GraphDriveClient`]: drive enumeration and per-item access
//! - [`mailbox::GraphMailboxClient`]: container trees and per-container
//!   item deltas for mail, contacts, and events
//! - [`lists::GraphListClient`]: auxiliary list endpoints (columns, content
//!   types, column links, fields)

pub mod client;
pub mod delta;
pub mod drive;
pub mod error;
pub mod lists;
pub mod mailbox;
pub mod models;

pub use client::GraphClient;
pub use delta::GraphItemPager;
pub use drive::GraphDriveClient;
pub use lists::GraphListClient;
pub use mailbox::{GraphMailboxClient, MailboxKind};
