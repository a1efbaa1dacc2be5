pub mod api;
mod backoff;
pub mod job;
pub mod sequence;
pub mod sumo;

#[cfg(test)]
pub(crate) mod testing;

pub use api::SearchApi;
pub use job::{JobController, JobLifecycle, JobSnapshot};
pub use sequence::{ResultSequence, SequenceBinder};
pub use sumo::{ClientConfig, SumoClient, DEFAULT_BASE_URL};
