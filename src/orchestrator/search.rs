//! Bounded retrieval of both result kinds.

use crate::engine::{JobController, ResultSequence};
use crate::error::{SearchError, SearchResult};
use crate::model::{Item, ResultKind, SearchResults, SearchSpec};
use crate::orchestrator::SumoSearch;
use tracing::{info, warn};

/// Upper bound on items collected per kind by [`SumoSearch::search`].
pub const MAX_AGGREGATE_LIMIT: u64 = 100;

impl SumoSearch {
    /// Collect up to `limit` messages and `limit` records of one job concurrently.
    ///
    /// `None` or `0` means [`MAX_AGGREGATE_LIMIT`]; larger limits are capped and flagged
    /// with `limit_capped`. A kind that never produces anything contributes an empty list.
    pub async fn search(&self, spec: &SearchSpec, limit: Option<u64>) -> SearchResult<SearchResults> {
        let requested = limit.filter(|&n| n > 0).unwrap_or(MAX_AGGREGATE_LIMIT);
        let limit_capped = requested > MAX_AGGREGATE_LIMIT;
        let limit = requested.min(MAX_AGGREGATE_LIMIT);
        if limit_capped {
            warn!(requested, limit, "limit above maximum, capping");
        }

        let job = self.create_job(spec).await?;
        let (messages, records) = tokio::try_join!(
            collect_kind(&job, ResultKind::Message, limit),
            collect_kind(&job, ResultKind::Record, limit),
        )?;
        info!(
            messages = messages.len(),
            records = records.len(),
            "search finished"
        );

        Ok(SearchResults {
            messages,
            records,
            limit,
            limit_capped,
        })
    }
}

async fn collect_kind(job: &JobController, kind: ResultKind, limit: u64) -> SearchResult<Vec<Item>> {
    let mut seq = ResultSequence::new(kind, job.clone()).with_page_size(limit);
    let mut out = Vec::new();
    while (out.len() as u64) < limit {
        match seq.next().await {
            Some(Ok(item)) => out.push(item),
            Some(Err(SearchError::NoResults { .. })) if out.is_empty() => break,
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(out)
}
