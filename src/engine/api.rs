use crate::error::ApiError;
use crate::model::{Credentials, JobHandle, ResultKind, ResultPage, SearchSpec, StatusUpdate};
use async_trait::async_trait;

/// The three calls a job controller makes against the search service.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Submit a search job and return the handle for follow-up requests.
    async fn create_job(
        &self,
        spec: &SearchSpec,
        credentials: &Credentials,
    ) -> Result<JobHandle, ApiError>;

    async fn job_status(&self, job: &JobHandle) -> Result<StatusUpdate, ApiError>;

    async fn fetch_page(
        &self,
        job: &JobHandle,
        kind: ResultKind,
        offset: u64,
        limit: u64,
    ) -> Result<ResultPage, ApiError>;
}
