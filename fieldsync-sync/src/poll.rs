//! One poll-loop tick: conditional fetch, cursor advance, forward reconcile.
//!
//! Callers drive ticks from a single task so they never overlap.

use chrono::{DateTime, Utc};
use serde::Serialize;

use fieldsync_core::GrowerRecord;

use crate::cursor::format_since;
use crate::error::SyncResult;
use crate::forward::{ForwardReconciler, ReconcileOutcome, RecordReport};
use crate::provider::{Fetched, Provider};
use crate::state::SyncState;

/// How the fetch step of a tick ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum FetchStatus {
    Fetched,
    /// Not modified twice in a row; the cursor stays put.
    NotModified,
    Failed(String),
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Conditional-header value used for the fetch.
    pub since: String,
    pub fetch: FetchStatus,
    /// Cursor after the tick.
    pub cursor: String,
    pub records: Vec<RecordReport>,
    /// Set when reconciliation stopped partway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl TickReport {
    pub fn count(&self, outcome: ReconcileOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Records whose processing wrote to the Store.
    pub fn writes(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.wrote()).count()
    }

    pub fn failed(&self) -> usize {
        self.count(ReconcileOutcome::Failed) + usize::from(self.aborted.is_some())
    }
}

/// Fetch growers changed since `since`, retrying exactly once on
/// "not modified". `Ok(None)` means both attempts reported not modified.
pub async fn fetch_with_retry(
    provider: &dyn Provider,
    since: &str,
) -> SyncResult<Option<Vec<GrowerRecord>>> {
    match provider.fetch_growers(since).await? {
        Fetched::Growers(growers) => return Ok(Some(growers)),
        Fetched::NotModified => tracing::debug!("not modified since {}; retrying once", since),
    }
    match provider.fetch_growers(since).await? {
        Fetched::Growers(growers) => Ok(Some(growers)),
        Fetched::NotModified => Ok(None),
    }
}

/// Run one tick at wall-clock `now`.
///
/// Fetch failures leave the cursor untouched. A successful fetch advances
/// the cursor to `now` before reconciliation starts, so records that fail
/// later in the tick are not refetched.
pub async fn run_tick(state: &mut SyncState, now: DateTime<Utc>) -> TickReport {
    let since = state.cursor.header_value();
    let next_since = now;

    let fetched = fetch_with_retry(state.session.provider.as_ref(), &since).await;
    let growers = match fetched {
        Ok(Some(growers)) => growers,
        Ok(None) => {
            return TickReport {
                cursor: since.clone(),
                since,
                fetch: FetchStatus::NotModified,
                records: Vec::new(),
                aborted: None,
            };
        }
        Err(err) => {
            tracing::warn!("grower fetch failed: {}", err);
            return TickReport {
                cursor: since.clone(),
                since,
                fetch: FetchStatus::Failed(err.to_string()),
                records: Vec::new(),
                aborted: None,
            };
        }
    };

    state.cursor.advance(next_since);
    let mut report = TickReport {
        since,
        fetch: FetchStatus::Fetched,
        cursor: format_since(state.cursor.since()),
        records: Vec::new(),
        aborted: None,
    };

    let mut growers = growers.into_iter();
    let Some(grower) = growers.next() else {
        tracing::debug!("fetch returned no growers");
        return report;
    };
    let extra = growers.count();
    if extra > 0 {
        tracing::warn!("ignoring {} additional grower(s) in listing", extra);
    }

    let reconciler = ForwardReconciler::new(&state.session);
    if let Err(err) = reconciler.reconcile_grower(&grower, &mut report.records).await {
        tracing::warn!("tick aborted: {}", err);
        report.aborted = Some(err.to_string());
    }
    report
}
