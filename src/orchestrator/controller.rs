//! Search facade.
//!
//! Creates job controllers and hands out result sequences bound to them.

use crate::engine::{ClientConfig, JobController, ResultSequence, SearchApi, SumoClient};
use crate::error::SearchResult;
use crate::model::{JobConfig, ResultKind, SearchSpec};
use std::sync::Arc;
use tracing::debug;

/// Entry point for running searches. Cheap to clone.
#[derive(Clone)]
pub struct SumoSearch {
    api: Arc<dyn SearchApi>,
    job_config: JobConfig,
}

impl SumoSearch {
    /// Talk to the service described by `cfg` over HTTP.
    pub fn new(cfg: &ClientConfig) -> SearchResult<Self> {
        Ok(Self::with_api(Arc::new(SumoClient::new(cfg)?)))
    }

    /// Run searches against any [`SearchApi`] implementation.
    pub fn with_api(api: Arc<dyn SearchApi>) -> Self {
        Self {
            api,
            job_config: JobConfig::default(),
        }
    }

    pub fn with_job_config(mut self, job_config: JobConfig) -> Self {
        self.job_config = job_config;
        self
    }

    /// Submit the search and return its controller once the job exists.
    pub async fn create_job(&self, spec: &SearchSpec) -> SearchResult<JobController> {
        JobController::create(self.api.clone(), spec, self.job_config.clone()).await
    }

    /// Start the search in the background and return a sequence over one kind.
    ///
    /// The sequence is returned immediately; its first pull waits for job creation, and a
    /// creation failure is its first and only item. Must be called inside a tokio runtime.
    pub fn stream(&self, kind: ResultKind, spec: SearchSpec) -> ResultSequence {
        let (seq, binder) = ResultSequence::unbound(kind);
        let search = self.clone();
        tokio::spawn(async move {
            match search.create_job(&spec).await {
                Ok(job) => binder.attach(job),
                Err(e) => {
                    debug!(%kind, error = %e, "search job creation failed");
                    binder.fail(e);
                }
            }
        });
        seq
    }

    /// [`stream`](Self::stream) with the kind given by name (`message(s)`/`record(s)`).
    pub fn stream_named(&self, kind: &str, spec: SearchSpec) -> SearchResult<ResultSequence> {
        Ok(self.stream(kind.parse()?, spec))
    }
}
