//! Pull-based sequence of one kind's results.
//!
//! Each call to [`ResultSequence::next`] either hands out the next buffered item or issues
//! exactly one page fetch. The sequence only ends once the job had completed before the
//! most recent fetch was issued and that fetch came back empty, so results that arrive
//! between status polls are never cut off.

use crate::engine::job::{JobController, JobLifecycle, JobSnapshot};
use crate::error::{SearchError, SearchResult};
use crate::model::{FieldDescriptor, Item, ResultKind};
use futures::Stream;
use tokio::sync::{oneshot, watch};
use tracing::debug;

enum SequenceState {
    /// Waiting for the controller; pulls block here until it is attached.
    Unbound(oneshot::Receiver<SearchResult<JobController>>),
    Draining(Draining),
    Completed,
    Failed,
}

struct Draining {
    job: JobController,
    updates: watch::Receiver<JobSnapshot>,
}

enum Step {
    Item(Item),
    End,
    Fail(SearchError),
}

impl Draining {
    fn new(job: JobController) -> Self {
        let updates = job.subscribe();
        Self { job, updates }
    }

    /// Whether the job had completed as of now. Marks the snapshot seen so a later
    /// `changed()` only fires for newer updates.
    fn observe(&mut self) -> SearchResult<bool> {
        let snap = self.updates.borrow_and_update();
        match &snap.lifecycle {
            JobLifecycle::Running => Ok(false),
            JobLifecycle::Completed => Ok(true),
            JobLifecycle::Failed(e) => Err(e.clone()),
        }
    }

    async fn pull(&mut self, kind: ResultKind, limit: u64) -> Step {
        loop {
            if let Some(item) = self.job.take_next(kind) {
                return Step::Item(item);
            }

            let completed_before = match self.observe() {
                Ok(done) => done,
                Err(e) => return Step::Fail(e),
            };

            match self.job.fetch_into_buffer(kind, limit).await {
                Err(e) => return Step::Fail(e),
                Ok(0) if completed_before => return Step::End,
                Ok(0) => {
                    // Nothing new yet: let the next status merge pace the refetch.
                    debug!(%kind, "no new items, waiting for job progress");
                    if self.updates.changed().await.is_err() {
                        return Step::Fail(SearchError::JobCancelled);
                    }
                }
                Ok(_) => {}
            }
        }
    }
}

/// Hands a controller to an unbound [`ResultSequence`]. Consumed on use.
pub struct SequenceBinder {
    tx: oneshot::Sender<SearchResult<JobController>>,
}

impl SequenceBinder {
    pub fn attach(self, job: JobController) {
        let _ = self.tx.send(Ok(job));
    }

    /// Deliver a creation failure to the sequence instead of a controller.
    pub fn fail(self, err: SearchError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Ordered, single-pass, demand-driven sequence of one kind's items.
pub struct ResultSequence {
    kind: ResultKind,
    page_size: Option<u64>,
    state: SequenceState,
}

impl ResultSequence {
    pub fn new(kind: ResultKind, job: JobController) -> Self {
        Self {
            kind,
            page_size: None,
            state: SequenceState::Draining(Draining::new(job)),
        }
    }

    /// A sequence whose controller is still being created.
    pub fn unbound(kind: ResultKind) -> (Self, SequenceBinder) {
        let (tx, rx) = oneshot::channel();
        let seq = Self {
            kind,
            page_size: None,
            state: SequenceState::Unbound(rx),
        };
        (seq, SequenceBinder { tx })
    }

    /// Items requested per fetch. Defaults to the controller's page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn job(&self) -> Option<&JobController> {
        match &self.state {
            SequenceState::Draining(d) => Some(&d.job),
            _ => None,
        }
    }

    /// Field descriptors of the most recent page, once one has been fetched.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.job()
            .map(|job| job.fields(self.kind))
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SequenceState::Completed | SequenceState::Failed
        )
    }

    /// Produce the next item, an error (once), or `None` at the end.
    pub async fn next(&mut self) -> Option<SearchResult<Item>> {
        loop {
            match &mut self.state {
                SequenceState::Unbound(rx) => {
                    let bound = rx.await.unwrap_or(Err(SearchError::JobCancelled));
                    match bound {
                        Ok(job) => {
                            debug!(kind = %self.kind, job = %job.job_url(), "sequence attached");
                            self.state = SequenceState::Draining(Draining::new(job));
                        }
                        Err(e) => {
                            self.state = SequenceState::Failed;
                            return Some(Err(e));
                        }
                    }
                }
                SequenceState::Draining(d) => {
                    let limit = self.page_size.unwrap_or_else(|| d.job.config().page_size);
                    return match d.pull(self.kind, limit).await {
                        Step::Item(item) => Some(Ok(item)),
                        Step::End => {
                            debug!(kind = %self.kind, "sequence exhausted");
                            self.state = SequenceState::Completed;
                            None
                        }
                        Step::Fail(e) => {
                            self.state = SequenceState::Failed;
                            Some(Err(e))
                        }
                    };
                }
                SequenceState::Completed | SequenceState::Failed => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SearchResult<Item>> + Send + 'static {
        futures::stream::unfold(self, |mut seq| async move {
            let item = seq.next().await?;
            Some((item, seq))
        })
    }
}
