use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Environment variables consulted for credentials, in order of preference.
const ACCESS_ID_VARS: [&str; 2] = ["SUMO_LOGIC_ACCESS_ID", "MAPBOX_CLI_SUMOLOGIC_ACCESS_ID"];
const ACCESS_KEY_VARS: [&str; 2] = ["SUMO_LOGIC_ACCESS_KEY", "MAPBOX_CLI_SUMOLOGIC_ACCESS_KEY"];

/// Access id / access key pair used as basic-auth credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_id: String,
    pub access_key: String,
}

impl Credentials {
    pub fn new(access_id: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            access_key: access_key.into(),
        }
    }

    /// Read credentials from the process environment. Empty values count as unset.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|v| !v.is_empty())
        };
        Some(Self::new(first(&ACCESS_ID_VARS)?, first(&ACCESS_KEY_VARS)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

/// What to search for and over which window.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub query: String,
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub time_zone: Option<String>,
    pub credentials: Option<Credentials>,
}

impl SearchSpec {
    pub fn new(query: impl Into<String>, from: OffsetDateTime, to: OffsetDateTime) -> Self {
        Self {
            query: query.into(),
            from,
            to,
            time_zone: None,
            credentials: None,
        }
    }

    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Explicit credentials win; otherwise fall back to the environment. An explicit pair
    /// with an empty half is rejected rather than silently replaced.
    pub fn resolve_credentials(&self) -> Result<Credentials, SearchError> {
        match &self.credentials {
            Some(c) if c.access_id.is_empty() || c.access_key.is_empty() => {
                Err(SearchError::MissingCredentials)
            }
            Some(c) => Ok(c.clone()),
            None => Credentials::from_env().ok_or(SearchError::MissingCredentials),
        }
    }
}

/// Milliseconds since the Unix epoch, the unit the search API expects.
pub fn unix_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// JSON body of a job submission. Timestamps travel as strings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub query: String,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl From<&SearchSpec> for CreateJobRequest {
    fn from(spec: &SearchSpec) -> Self {
        Self {
            query: spec.query.clone(),
            from: unix_millis(spec.from).to_string(),
            to: unix_millis(spec.to).to_string(),
            time_zone: spec.time_zone.clone(),
        }
    }
}

/// The two result flavours a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Message,
    Record,
}

impl ResultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Message => "message",
            ResultKind::Record => "record",
        }
    }

    /// Path segment and response key, e.g. `messages`.
    pub fn plural(self) -> &'static str {
        match self {
            ResultKind::Message => "messages",
            ResultKind::Record => "records",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ResultKind::Message => 0,
            ResultKind::Record => 1,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" | "messages" => Ok(ResultKind::Message),
            "record" | "records" => Ok(ResultKind::Record),
            other => Err(SearchError::InvalidKind(other.to_string())),
        }
    }
}

/// Where the remote job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobState {
    /// Local state between submission and the first status response.
    #[default]
    #[serde(rename = "CREATING")]
    Creating,
    #[serde(rename = "NOT STARTED")]
    NotStarted,
    #[serde(rename = "GATHERING RESULTS")]
    GatheringResults,
    #[serde(rename = "DONE GATHERING RESULTS")]
    DoneGatheringResults,
    #[serde(rename = "FORCE PAUSED")]
    ForcePaused,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_done(&self) -> bool {
        matches!(self, JobState::DoneGatheringResults)
    }
}

/// Authoritative status record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    /// `-1` until the service reports a count.
    pub message_count: i64,
    pub record_count: i64,
    #[serde(default)]
    pub pending_warnings: Vec<serde_json::Value>,
    #[serde(default)]
    pub pending_errors: Vec<serde_json::Value>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::Creating,
            message_count: -1,
            record_count: -1,
            pending_warnings: Vec::new(),
            pending_errors: Vec::new(),
        }
    }
}

impl JobStatus {
    pub fn count(&self, kind: ResultKind) -> i64 {
        match kind {
            ResultKind::Message => self.message_count,
            ResultKind::Record => self.record_count,
        }
    }

    /// Overwrite the fields present in `update`, keep the rest.
    pub fn merge(&mut self, update: StatusUpdate) {
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(n) = update.message_count {
            self.message_count = n;
        }
        if let Some(n) = update.record_count {
            self.record_count = n;
        }
        if let Some(w) = update.pending_warnings {
            self.pending_warnings = w;
        }
        if let Some(e) = update.pending_errors {
            self.pending_errors = e;
        }
    }
}

/// Body of a status response; every field is optional so merges are additive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default)]
    pub state: Option<JobState>,
    #[serde(default)]
    pub message_count: Option<i64>,
    #[serde(default)]
    pub record_count: Option<i64>,
    #[serde(default)]
    pub pending_warnings: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub pending_errors: Option<Vec<serde_json::Value>>,
}

/// One result item: field name to value.
pub type Item = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub key_field: bool,
}

/// One page of results as returned by a fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub fields: Vec<FieldDescriptor>,
    pub items: Vec<Item>,
}

/// Identifies a created job: its follow-up URL and the session to replay.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub url: reqwest::Url,
    pub cookie: Option<String>,
    pub credentials: Credentials,
}

/// Outcome of a bounded retrieval of both kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub messages: Vec<Item>,
    pub records: Vec<Item>,
    /// Effective per-kind limit after capping.
    pub limit: u64,
    /// True when the caller asked for more than the cap allows.
    pub limit_capped: bool,
}

/// Timing and paging knobs for one job controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Grace period after creation before the job accepts follow-up requests.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_floor: Duration,
    pub max_attempts: u32,
    pub page_size: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2500),
            settle_delay: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
            backoff_floor: Duration::from_secs(5),
            max_attempts: 6,
            page_size: 10_000,
        }
    }
}
