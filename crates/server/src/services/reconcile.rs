//! Reconciliation imports.
//!
//! An external system (the admin endpoint or the hourly poller) hands over
//! absolute referral counts per code, and each matched account's count is
//! overwritten to that value. Codes no account holds are skipped without
//! error: the source routinely references ambassadors that have not verified
//! here yet.
//!
//! Each entry is applied independently. Transient storage failures are
//! retried a bounded number of times with doubling delays; one bad entry
//! never aborts the rest of the batch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use ambassador_core::ReferralCode;

use crate::clock::Clock;
use crate::db::AccountStore;

/// Attempts per entry, counting the first.
const MAX_ENTRY_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// One absolute count from the reconciliation source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountEntry {
    pub code: ReferralCode,
    pub count: u32,
}

/// How an individual entry fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// The matched account's count was overwritten.
    Applied,
    /// No account holds this code.
    Skipped,
    /// Storage kept failing past the retry budget.
    Failed,
}

/// Per-entry result of a reconciliation batch.
#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub code: ReferralCode,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies reconciliation batches against the store.
pub struct Importer {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl Importer {
    /// Create a new importer.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            last_run: Mutex::new(None),
        }
    }

    /// When the last batch finished, if any has.
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self
            .last_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Tally raw source rows into per-code absolute counts.
    ///
    /// Each row is free text; every code-shaped token in it counts as one
    /// referral for that code. Rows with no recognizable code contribute
    /// nothing. Output is sorted by code.
    #[must_use]
    pub fn tally_rows<'a, I>(rows: I) -> Vec<CountEntry>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts: BTreeMap<ReferralCode, u32> = BTreeMap::new();
        for row in rows {
            for code in ReferralCode::extract_all(row) {
                *counts.entry(code).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .map(|(code, count)| CountEntry { code, count })
            .collect()
    }

    /// Apply a batch of absolute counts.
    ///
    /// Always returns one outcome per entry, in input order. Failures are
    /// reported in the outcome rather than returned, so a partial batch still
    /// lands every entry it can.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub async fn import_batch(&self, entries: &[CountEntry]) -> Vec<EntryOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.apply_entry(entry).await);
        }

        let applied = outcomes
            .iter()
            .filter(|o| o.status == EntryStatus::Applied)
            .count();
        tracing::info!(
            entries = entries.len(),
            applied,
            "reconciliation batch finished"
        );

        *self
            .last_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(self.clock.now());
        outcomes
    }

    async fn apply_entry(&self, entry: &CountEntry) -> EntryOutcome {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.store.set_referral_count(&entry.code, entry.count).await {
                Ok(true) => {
                    return EntryOutcome {
                        code: entry.code.clone(),
                        status: EntryStatus::Applied,
                        error: None,
                    };
                }
                Ok(false) => {
                    tracing::debug!(code = %entry.code, "no account for code, skipping");
                    return EntryOutcome {
                        code: entry.code.clone(),
                        status: EntryStatus::Skipped,
                        error: None,
                    };
                }
                Err(e) if e.is_transient() && attempt < MAX_ENTRY_ATTEMPTS => {
                    tracing::warn!(code = %entry.code, attempt, error = %e, "retrying entry");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(code = %entry.code, error = %e, "entry failed");
                    return EntryOutcome {
                        code: entry.code.clone(),
                        status: EntryStatus::Failed,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    /// Fetch the source grid, tally it, and apply the result.
    ///
    /// The source answers with a JSON grid of rows of cells, each row one
    /// referral record.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the source is unreachable or answers with
    /// a non-success status or unparseable body.
    pub async fn poll_source(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<Vec<EntryOutcome>, reqwest::Error> {
        let grid: Vec<Vec<String>> = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let rows: Vec<String> = grid.iter().map(|cells| cells.join(" ")).collect();
        let entries = Self::tally_rows(rows.iter().map(String::as_str));
        Ok(self.import_batch(&entries).await)
    }
}

/// Run [`Importer::poll_source`] forever on a fixed interval.
///
/// An unreachable source is logged and skipped; the next tick tries again.
pub fn spawn_poller(
    importer: Arc<Importer>,
    url: String,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is not gated
        // on the source being up.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match importer.poll_source(&client, &url).await {
                Ok(outcomes) => {
                    tracing::debug!(entries = outcomes.len(), "poll applied");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reconciliation source unreachable, will retry");
                }
            }
        }
    })
}
