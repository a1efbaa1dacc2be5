//! Client for the Sumo Logic search-job API.
//!
//! A search runs as a remote job: it is submitted, polled until the service has gathered
//! everything, and drained page by page. [`SumoSearch`] is the entry point; it hands out
//! [`JobController`]s for low-level control, [`ResultSequence`]s that pull results on
//! demand, and a bounded [`SumoSearch::search`] that collects both kinds at once.

pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;

pub use engine::{
    ClientConfig, JobController, JobLifecycle, ResultSequence, SearchApi, SumoClient,
};
pub use error::{ApiError, SearchError, SearchResult};
pub use model::{
    Credentials, Item, JobConfig, JobState, JobStatus, ResultKind, SearchResults, SearchSpec,
};
pub use orchestrator::{SumoSearch, MAX_AGGREGATE_LIMIT};
