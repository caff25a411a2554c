//! Integration tests for the graph transport adapter
//!
//! Each module drives the adapter against a wiremock server standing in
//! for the real API.

mod common;
mod test_delta;
mod test_retry;
