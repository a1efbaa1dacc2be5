//! Lifecycle of one remote search job.
//!
//! A [`JobController`] submits the job, polls its status in a background task until the
//! service reports it done, and serves paginated fetches with retry on throttling. Status
//! and lifecycle are published through a `watch` channel so sequences can react to
//! completion without listener lists.

use crate::engine::api::SearchApi;
use crate::engine::backoff;
use crate::error::{SearchError, SearchResult};
use crate::model::{
    FieldDescriptor, Item, JobConfig, JobHandle, JobState, JobStatus, ResultKind, ResultPage,
    SearchSpec,
};
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Terminal or running state of a controller, as seen by its consumers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JobLifecycle {
    #[default]
    Running,
    /// The service reported `DONE GATHERING RESULTS`.
    Completed,
    /// Polling stopped on an error or cancellation; no further fetches are made.
    Failed(SearchError),
}

impl JobLifecycle {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobLifecycle::Running)
    }
}

/// Status and lifecycle, always published together.
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub lifecycle: JobLifecycle,
}

/// Items of one kind fetched so far. `taken + items.len() == offset` always holds.
#[derive(Debug, Default)]
struct ResultBuffer {
    fields: Vec<FieldDescriptor>,
    items: VecDeque<Item>,
    offset: u64,
    taken: u64,
}

struct JobInner {
    api: Arc<dyn SearchApi>,
    handle: JobHandle,
    cfg: JobConfig,
    ready_at: Instant,
    snapshot: watch::Sender<JobSnapshot>,
    buffers: Mutex<[ResultBuffer; 2]>,
    poller: Mutex<Option<AbortHandle>>,
}

impl Drop for JobInner {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = poller.take() {
            handle.abort();
        }
    }
}

/// Owns one remote search job. Cheap to clone; all clones share the same job.
///
/// Polling stops on completion, on failure, on [`JobController::cancel`], or once the
/// last clone is dropped.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<JobInner>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("job", &self.inner.handle.url.as_str())
            .field("snapshot", &*self.inner.snapshot.borrow())
            .finish()
    }
}

impl JobController {
    /// Submit the search and start polling. Submission failures are not retried.
    pub async fn create(
        api: Arc<dyn SearchApi>,
        spec: &SearchSpec,
        cfg: JobConfig,
    ) -> SearchResult<Self> {
        let credentials = spec.resolve_credentials()?;
        let handle = api
            .create_job(spec, &credentials)
            .await
            .map_err(SearchError::Creation)?;
        info!(job = %handle.url, "search job created");
        Ok(Self::start(api, handle, cfg))
    }

    fn start(api: Arc<dyn SearchApi>, handle: JobHandle, cfg: JobConfig) -> Self {
        let (snapshot, _) = watch::channel(JobSnapshot::default());
        let inner = Arc::new(JobInner {
            api,
            handle,
            ready_at: Instant::now() + cfg.settle_delay,
            cfg,
            snapshot,
            buffers: Mutex::new(Default::default()),
            poller: Mutex::new(None),
        });
        let task = tokio::spawn(poll_status(
            Arc::downgrade(&inner),
            inner.cfg.poll_interval,
        ));
        *lock(&inner.poller) = Some(task.abort_handle());
        Self { inner }
    }

    pub fn job_url(&self) -> &Url {
        &self.inner.handle.url
    }

    pub fn config(&self) -> &JobConfig {
        &self.inner.cfg
    }

    /// Resolves once the job exists and its settle delay has passed.
    pub async fn wait_until_created(&self) {
        tokio::time::sleep_until(self.inner.ready_at).await;
    }

    /// Issue one status request and merge it into the status record.
    pub async fn check_status(&self) -> SearchResult<JobStatus> {
        self.wait_until_created().await;
        let update = self
            .inner
            .api
            .job_status(&self.inner.handle)
            .await
            .map_err(SearchError::Status)?;

        let mut merged = JobStatus::default();
        self.inner.snapshot.send_modify(|snap| {
            snap.status.merge(update);
            merged = snap.status.clone();
        });
        debug!(
            state = ?merged.state,
            messages = merged.message_count,
            records = merged.record_count,
            "job status"
        );
        Ok(merged)
    }

    pub fn status(&self) -> JobStatus {
        self.inner.snapshot.borrow().status.clone()
    }

    pub fn lifecycle(&self) -> JobLifecycle {
        self.inner.snapshot.borrow().lifecycle.clone()
    }

    /// Receiver that observes every status merge and lifecycle transition.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Stop polling and fail everything still waiting on this job.
    pub fn cancel(&self) {
        if let Some(handle) = lock(&self.inner.poller).take() {
            handle.abort();
        }
        if self.finish(JobLifecycle::Failed(SearchError::JobCancelled)) {
            info!(job = %self.inner.handle.url, "search job cancelled");
        }
    }

    /// Publish a terminal lifecycle. Only the first call has an effect.
    fn finish(&self, lifecycle: JobLifecycle) -> bool {
        self.inner.snapshot.send_if_modified(|snap| {
            if snap.lifecycle.is_terminal() {
                return false;
            }
            snap.lifecycle = lifecycle;
            true
        })
    }

    fn failure(&self) -> Option<SearchError> {
        match &self.inner.snapshot.borrow().lifecycle {
            JobLifecycle::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Wait until the status reports at least one item of `kind`.
    ///
    /// Also resolves once the job has completed: the count is final then and the fetch
    /// itself tells whether anything is there.
    pub async fn await_non_empty(&self, kind: ResultKind) -> SearchResult<()> {
        let started = Instant::now();
        let max_attempts = self.inner.cfg.max_attempts;
        let mut updates = self.subscribe();
        let mut attempt = 0;

        loop {
            {
                let snap = updates.borrow_and_update();
                match &snap.lifecycle {
                    JobLifecycle::Failed(e) => return Err(e.clone()),
                    JobLifecycle::Completed => return Ok(()),
                    JobLifecycle::Running if snap.status.count(kind) > 0 => return Ok(()),
                    JobLifecycle::Running => {}
                }
            }

            attempt += 1;
            if attempt > max_attempts {
                let waited = started.elapsed();
                warn!(%kind, attempts = max_attempts, ?waited, "no results found");
                return Err(SearchError::NoResults {
                    kind,
                    attempts: max_attempts,
                    waited,
                });
            }

            let wait = backoff::delay(&self.inner.cfg, attempt);
            debug!(%kind, attempt, ?wait, "no results yet");
            let terminal = async {
                let _ = updates.wait_for(|snap| snap.lifecycle.is_terminal()).await;
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = terminal => {}
            }
        }
    }

    /// Fetch up to `limit` items of `kind` starting at `offset` (default: the cursor).
    ///
    /// The items are appended to the kind's buffer and the cursor advances by the number
    /// returned. HTTP 429 is retried with backoff; every other failure is returned as is.
    pub async fn fetch_page(
        &self,
        kind: ResultKind,
        limit: u64,
        offset: Option<u64>,
    ) -> SearchResult<ResultPage> {
        let page = self.fetch(kind, limit, offset).await?;
        let mut buffers = lock(&self.inner.buffers);
        let buf = &mut buffers[kind.index()];
        buf.fields = page.fields.clone();
        buf.items.extend(page.items.iter().cloned());
        buf.offset += page.items.len() as u64;
        Ok(page)
    }

    /// Like [`fetch_page`](Self::fetch_page) from the cursor, moving the items straight
    /// into the buffer. Returns how many arrived.
    pub(crate) async fn fetch_into_buffer(&self, kind: ResultKind, limit: u64) -> SearchResult<usize> {
        let page = self.fetch(kind, limit, None).await?;
        let n = page.items.len();
        let mut buffers = lock(&self.inner.buffers);
        let buf = &mut buffers[kind.index()];
        buf.fields = page.fields;
        buf.items.extend(page.items);
        buf.offset += n as u64;
        Ok(n)
    }

    async fn fetch(
        &self,
        kind: ResultKind,
        limit: u64,
        offset: Option<u64>,
    ) -> SearchResult<ResultPage> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        self.await_non_empty(kind).await?;
        self.wait_until_created().await;

        let offset = offset.unwrap_or_else(|| self.cursor(kind));
        let max_attempts = self.inner.cfg.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let res = self
                .inner
                .api
                .fetch_page(&self.inner.handle, kind, offset, limit)
                .await;
            match res {
                Ok(page) => {
                    debug!(%kind, offset, received = page.items.len(), "fetched page");
                    return Ok(page);
                }
                Err(e) if e.is_throttled() && attempt <= max_attempts => {
                    let wait = backoff::delay(&self.inner.cfg, attempt);
                    warn!(%kind, attempt, ?wait, "throttled by search api, backing off");
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_throttled() => {
                    return Err(SearchError::Throttled {
                        kind,
                        attempts: attempt,
                    });
                }
                Err(source) => return Err(SearchError::Fetch { kind, source }),
            }
        }
    }

    /// Number of items of `kind` requested from the service so far.
    pub fn cursor(&self, kind: ResultKind) -> u64 {
        lock(&self.inner.buffers)[kind.index()].offset
    }

    /// Field descriptors from the most recent page of `kind`.
    pub fn fields(&self, kind: ResultKind) -> Vec<FieldDescriptor> {
        lock(&self.inner.buffers)[kind.index()].fields.clone()
    }

    pub fn buffered(&self, kind: ResultKind) -> usize {
        lock(&self.inner.buffers)[kind.index()].items.len()
    }

    /// Pop the oldest buffered item of `kind`.
    pub fn take_next(&self, kind: ResultKind) -> Option<Item> {
        let mut buffers = lock(&self.inner.buffers);
        let buf = &mut buffers[kind.index()];
        let item = buf.items.pop_front()?;
        buf.taken += 1;
        Some(item)
    }

    /// Pop up to `max` buffered items of `kind`, oldest first.
    pub fn take_buffered(&self, kind: ResultKind, max: usize) -> Vec<Item> {
        let mut buffers = lock(&self.inner.buffers);
        let buf = &mut buffers[kind.index()];
        let n = max.min(buf.items.len());
        buf.taken += n as u64;
        buf.items.drain(..n).collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background status loop. Holds only a weak reference so an abandoned job stops polling.
async fn poll_status(job: Weak<JobInner>, interval: Duration) {
    loop {
        let Some(inner) = job.upgrade() else {
            debug!("search job dropped, status polling stopped");
            return;
        };
        let controller = JobController { inner };

        match controller.check_status().await {
            Ok(status) if status.state.is_done() => {
                info!(
                    job = %controller.job_url(),
                    messages = status.message_count,
                    records = status.record_count,
                    "search job done gathering results"
                );
                controller.finish(JobLifecycle::Completed);
                return;
            }
            Ok(status) if status.state == JobState::ForcePaused => {
                // The service stopped gathering for good; what it has is all there will be.
                warn!(
                    job = %controller.job_url(),
                    messages = status.message_count,
                    records = status.record_count,
                    "search job force paused, results may be incomplete"
                );
                controller.finish(JobLifecycle::Completed);
                return;
            }
            Ok(status) if status.state == JobState::Cancelled => {
                warn!(job = %controller.job_url(), "search job cancelled by the service");
                controller.finish(JobLifecycle::Failed(SearchError::JobCancelled));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job = %controller.job_url(), error = %e, "status polling stopped");
                controller.finish(JobLifecycle::Failed(e));
                return;
            }
        }

        drop(controller);
        tokio::time::sleep(interval).await;
    }
}
