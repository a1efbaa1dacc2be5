//! Caller-facing orchestration.
//!
//! [`SumoSearch`] owns the transport and job settings, creates controllers, binds result
//! sequences to them, and runs bounded retrieval of both kinds. CLI and library callers go
//! through this module instead of wiring controllers by hand.

mod controller;
mod search;

pub use controller::SumoSearch;
pub use search::MAX_AGGREGATE_LIMIT;
