use crate::engine::api::SearchApi;
use crate::error::{ApiError, SearchError};
use crate::model::{
    CreateJobRequest, Credentials, FieldDescriptor, Item, JobHandle, ResultKind, ResultPage,
    SearchSpec, StatusUpdate,
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.sumologic.com/api/v1";

/// Connection settings for [`SumoClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("sumo-search/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// HTTP implementation of [`SearchApi`] for the Sumo Logic search-job API.
#[derive(Clone)]
pub struct SumoClient {
    http: reqwest::Client,
    base_url: Url,
    jobs_url: Url,
}

impl SumoClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, SearchError> {
        // Url::join drops the last segment unless the base ends with a slash.
        let mut base = cfg.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| SearchError::Client(format!("invalid base url {base}: {e}")))?;
        let jobs_url = base_url
            .join("search/jobs")
            .map_err(|e| SearchError::Client(e.to_string()))?;

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| SearchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            jobs_url,
        })
    }

    pub fn jobs_url(&self) -> Url {
        self.jobs_url.clone()
    }

    pub fn page_url(job: &JobHandle, kind: ResultKind, offset: u64, limit: u64) -> Url {
        let mut url = job.url.clone();
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty().push(kind.plural());
        }
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        url
    }

    fn authed(&self, req: RequestBuilder, job: &JobHandle) -> RequestBuilder {
        let req = req
            .basic_auth(&job.credentials.access_id, Some(&job.credentials.access_key))
            .header(ACCEPT, "application/json");
        match job.cookie.as_deref() {
            Some(cookie) => req.header(COOKIE, cookie),
            None => req,
        }
    }

    fn resolve_location(&self, location: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(location)
            .map_err(|e| ApiError::Decode(format!("bad location header {location:?}: {e}")))
    }
}

/// Turn `Set-Cookie` headers into a single `Cookie` header value.
fn session_cookie(resp: &Response) -> Option<String> {
    let pairs: Vec<&str> = resp
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[derive(Deserialize)]
struct WrappedItem {
    map: Item,
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
    #[serde(default)]
    messages: Vec<WrappedItem>,
    #[serde(default)]
    records: Vec<WrappedItem>,
}

impl RawPage {
    fn into_page(self, kind: ResultKind) -> ResultPage {
        let items = match kind {
            ResultKind::Message => self.messages,
            ResultKind::Record => self.records,
        };
        ResultPage {
            fields: self.fields,
            items: items.into_iter().map(|w| w.map).collect(),
        }
    }
}

#[async_trait]
impl SearchApi for SumoClient {
    async fn create_job(
        &self,
        spec: &SearchSpec,
        credentials: &Credentials,
    ) -> Result<JobHandle, ApiError> {
        let url = self.jobs_url();
        debug!(%url, query = %spec.query, "submitting search job");

        let resp = self
            .http
            .post(url)
            .basic_auth(&credentials.access_id, Some(&credentials.access_key))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&CreateJobRequest::from(spec))
            .send()
            .await?;
        let resp = check(resp).await?;

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Decode("job response has no location header".into()))?;
        let url = self.resolve_location(location)?;
        let cookie = session_cookie(&resp);

        Ok(JobHandle {
            url,
            cookie,
            credentials: credentials.clone(),
        })
    }

    async fn job_status(&self, job: &JobHandle) -> Result<StatusUpdate, ApiError> {
        let resp = self
            .authed(self.http.get(job.url.clone()), job)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    async fn fetch_page(
        &self,
        job: &JobHandle,
        kind: ResultKind,
        offset: u64,
        limit: u64,
    ) -> Result<ResultPage, ApiError> {
        let url = Self::page_url(job, kind, offset, limit);
        debug!(%url, "fetching page");
        let resp = self.authed(self.http.get(url), job).send().await?;
        let raw: RawPage = decode(check(resp).await?).await?;
        Ok(raw.into_page(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobState;
    use mockito::{Matcher, Server};
    use time::OffsetDateTime;

    fn creds() -> Credentials {
        Credentials::new("some-access-id", "some-access-key")
    }

    // base64("some-access-id:some-access-key")
    const BASIC: &str = "Basic c29tZS1hY2Nlc3MtaWQ6c29tZS1hY2Nlc3Mta2V5";

    fn client(server: &Server) -> SumoClient {
        SumoClient::new(&ClientConfig::default().with_base_url(server.url())).unwrap()
    }

    fn handle(server: &Server) -> JobHandle {
        JobHandle {
            url: Url::parse(&format!("{}/search/jobs/ABC123", server.url())).unwrap(),
            cookie: Some("JSESSIONID=s1; AWSELB=lb".into()),
            credentials: creds(),
        }
    }

    #[tokio::test]
    async fn create_job_reads_location_and_cookies() {
        let mut server = Server::new_async().await;
        let from = OffsetDateTime::from_unix_timestamp(1_487_733_054).unwrap();
        let to = OffsetDateTime::from_unix_timestamp(1_487_733_356).unwrap();
        let mock = server
            .mock("POST", "/search/jobs")
            .match_header("authorization", BASIC)
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({
                "query": "error | count by _sourceCategory",
                "from": "1487733054000",
                "to": "1487733356000",
                "timeZone": "UTC"
            })))
            .with_status(202)
            .with_header("location", "/search/jobs/ABC123")
            .with_header("set-cookie", "JSESSIONID=s1; Path=/api; Secure")
            .with_header("set-cookie", "AWSELB=lb; Path=/")
            .with_body(r#"{"id":"ABC123"}"#)
            .create_async()
            .await;

        let spec = SearchSpec::new("error | count by _sourceCategory", from, to)
            .with_time_zone("UTC");
        let job = client(&server).create_job(&spec, &creds()).await.unwrap();

        assert_eq!(job.url.as_str(), format!("{}/search/jobs/ABC123", server.url()));
        assert_eq!(job.cookie.as_deref(), Some("JSESSIONID=s1; AWSELB=lb"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_job_surfaces_auth_failure() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/search/jobs")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let now = OffsetDateTime::now_utc();
        let spec = SearchSpec::new("error", now, now);
        let err = client(&server).create_job(&spec, &creds()).await.unwrap_err();

        assert_eq!(
            err,
            ApiError::Status {
                status: 401,
                body: "Unauthorized".into()
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_replays_session_cookie() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/search/jobs/ABC123")
            .match_header("cookie", "JSESSIONID=s1; AWSELB=lb")
            .match_header("authorization", BASIC)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"state":"GATHERING RESULTS","messageCount":42,"recordCount":0}"#)
            .create_async()
            .await;

        let update = client(&server).job_status(&handle(&server)).await.unwrap();

        assert_eq!(update.state, Some(JobState::GatheringResults));
        assert_eq!(update.message_count, Some(42));
        assert_eq!(update.record_count, Some(0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_page_unwraps_item_maps() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/search/jobs/ABC123/records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "20".into()),
                Matcher::UrlEncoded("limit".into(), "10".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{
                    "fields":[{"name":"_sourcecategory","fieldType":"string","keyField":true},
                              {"name":"_count","fieldType":"int","keyField":false}],
                    "records":[{"map":{"_sourcecategory":"api","_count":"7"}},
                               {"map":{"_sourcecategory":"web","_count":"3"}}]
                }"#,
            )
            .create_async()
            .await;

        let page = client(&server)
            .fetch_page(&handle(&server), ResultKind::Record, 20, 10)
            .await
            .unwrap();

        assert_eq!(page.fields.len(), 2);
        assert!(page.fields[0].key_field);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0]["_sourcecategory"], "api");
        assert_eq!(page.items[1]["_count"], "3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_page_reports_throttling() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/search/jobs/ABC123/messages")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("rate limit exceeded")
            .create_async()
            .await;

        let err = client(&server)
            .fetch_page(&handle(&server), ResultKind::Message, 0, 100)
            .await
            .unwrap_err();

        assert!(err.is_throttled());
        mock.assert_async().await;
    }

    #[test]
    fn page_url_appends_kind_and_query() {
        let job = JobHandle {
            url: Url::parse("https://api.sumologic.com/api/v1/search/jobs/XYZ").unwrap(),
            cookie: None,
            credentials: creds(),
        };
        let url = SumoClient::page_url(&job, ResultKind::Message, 0, 10000);
        assert_eq!(
            url.as_str(),
            "https://api.sumologic.com/api/v1/search/jobs/XYZ/messages?offset=0&limit=10000"
        );
    }

    #[test]
    fn base_url_keeps_api_prefix() {
        let client = SumoClient::new(&ClientConfig::default()).unwrap();
        assert_eq!(
            client.jobs_url().as_str(),
            "https://api.sumologic.com/api/v1/search/jobs"
        );
    }
}
