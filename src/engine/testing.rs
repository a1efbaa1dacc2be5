//! Scripted in-memory [`SearchApi`] for controller and sequence tests.

use crate::engine::api::SearchApi;
use crate::error::ApiError;
use crate::model::{
    Credentials, FieldDescriptor, Item, JobHandle, JobState, ResultKind, ResultPage, SearchSpec,
    StatusUpdate,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) struct FetchCall {
    pub kind: ResultKind,
    pub offset: u64,
    pub limit: u64,
    pub at: Instant,
}

/// Status responses are consumed in order and the last one repeats. Pages are consumed in
/// order per kind; once exhausted every fetch returns an empty page. With a fetch delay set,
/// every fetch is recorded when issued and answered after the delay.
#[derive(Default)]
pub(crate) struct FakeApi {
    create_error: Option<ApiError>,
    fetch_delay: Option<Duration>,
    statuses: Mutex<VecDeque<Result<StatusUpdate, ApiError>>>,
    pages: Mutex<HashMap<ResultKind, VecDeque<Result<ResultPage, ApiError>>>>,
    create_calls: Mutex<usize>,
    status_calls: Mutex<usize>,
    fetch_calls: Mutex<Vec<FetchCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(mut self, err: ApiError) -> Self {
        self.create_error = Some(err);
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn status(self, update: StatusUpdate) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(update));
        self
    }

    pub fn status_err(self, err: ApiError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn page(self, kind: ResultKind, items: Vec<Item>) -> Self {
        let page = ResultPage {
            fields: fields(),
            items,
        };
        self.pages
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(Ok(page));
        self
    }

    pub fn page_err(self, kind: ResultKind, err: ApiError) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(Err(err));
        self
    }

    pub fn throttled() -> ApiError {
        ApiError::Status {
            status: 429,
            body: "rate limit exceeded".into(),
        }
    }

    pub fn create_calls(&self) -> usize {
        *self.create_calls.lock().unwrap()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn fetches_of(&self, kind: ResultKind) -> usize {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }
}

#[async_trait]
impl SearchApi for FakeApi {
    async fn create_job(
        &self,
        _spec: &SearchSpec,
        credentials: &Credentials,
    ) -> Result<JobHandle, ApiError> {
        *self.create_calls.lock().unwrap() += 1;
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        Ok(JobHandle {
            url: reqwest::Url::parse("https://api.example.test/api/v1/search/jobs/FAKE").unwrap(),
            cookie: Some("JSESSIONID=fake".into()),
            credentials: credentials.clone(),
        })
    }

    async fn job_status(&self, _job: &JobHandle) -> Result<StatusUpdate, ApiError> {
        *self.status_calls.lock().unwrap() += 1;
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            return statuses.pop_front().unwrap();
        }
        statuses
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(gathering(-1, -1)))
    }

    async fn fetch_page(
        &self,
        _job: &JobHandle,
        kind: ResultKind,
        offset: u64,
        limit: u64,
    ) -> Result<ResultPage, ApiError> {
        self.fetch_calls.lock().unwrap().push(FetchCall {
            kind,
            offset,
            limit,
            at: Instant::now(),
        });
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Ok(ResultPage {
                    fields: fields(),
                    items: Vec::new(),
                })
            })
    }
}

pub(crate) fn fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor {
            name: "_raw".into(),
            field_type: Some("string".into()),
            key_field: false,
        },
        FieldDescriptor {
            name: "_messageid".into(),
            field_type: Some("long".into()),
            key_field: false,
        },
    ]
}

/// Items whose `_messageid` is the index, so order and duplicates are easy to check.
pub(crate) fn items(range: Range<u64>) -> Vec<Item> {
    range
        .map(|i| {
            let mut item = Item::new();
            item.insert("_raw".into(), format!("line {i}\n").into());
            item.insert("_messageid".into(), i.to_string().into());
            item
        })
        .collect()
}

pub(crate) fn gathering(messages: i64, records: i64) -> StatusUpdate {
    StatusUpdate {
        state: Some(JobState::GatheringResults),
        message_count: Some(messages),
        record_count: Some(records),
        ..Default::default()
    }
}

pub(crate) fn force_paused(messages: i64, records: i64) -> StatusUpdate {
    StatusUpdate {
        state: Some(JobState::ForcePaused),
        ..gathering(messages, records)
    }
}

pub(crate) fn done(messages: i64, records: i64) -> StatusUpdate {
    StatusUpdate {
        state: Some(JobState::DoneGatheringResults),
        ..gathering(messages, records)
    }
}

pub(crate) fn spec() -> SearchSpec {
    let to = OffsetDateTime::from_unix_timestamp(1_487_733_356).unwrap();
    SearchSpec::new("error | count by _sourceCategory", to - time::Duration::minutes(5), to)
        .with_credentials(Credentials::new("some-access-id", "some-access-key"))
}

/// Within a few milliseconds of `secs` seconds; the paused clock rounds timers to 1ms.
pub(crate) fn about(d: Duration, secs: u64) -> bool {
    let target = Duration::from_secs(secs);
    d >= target && d < target + Duration::from_millis(50)
}
