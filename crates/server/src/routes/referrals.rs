//! Referral tracking and reconciliation handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use ambassador_core::ReferralCode;

use crate::error::Result;
use crate::services::reconcile::{CountEntry, EntryStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub email: String,
    pub referral_code: String,
}

#[derive(Serialize)]
pub struct TrackResponse {
    message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCountsRequest {
    pub entries: Vec<UpdateCountsEntry>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCountsEntry {
    pub code: String,
    pub count: u32,
}

#[derive(Serialize)]
pub struct EntryResult {
    code: String,
    status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateCountsResponse {
    message: &'static str,
    results: Vec<EntryResult>,
}

/// `POST /api/track-referral`
pub async fn track(
    State(state): State<AppState>,
    Json(req): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TrackResponse>)> {
    state.referrals().track(&req.email, &req.referral_code).await?;

    Ok((
        StatusCode::CREATED,
        Json(TrackResponse {
            message: "Referral recorded",
        }),
    ))
}

/// `POST /api/update-referral-counts`
///
/// Applies absolute counts per code. Codes that match no account, including
/// strings that are not code-shaped at all, are skipped without failing the
/// batch. Answers 200 when everything landed or was skipped, 207 when at
/// least one entry failed on storage.
pub async fn update_counts(
    State(state): State<AppState>,
    Json(req): Json<UpdateCountsRequest>,
) -> Result<(StatusCode, Json<UpdateCountsResponse>)> {
    let parsed: Vec<Option<CountEntry>> = req
        .entries
        .iter()
        .map(|e| {
            ReferralCode::parse(&e.code).ok().map(|code| CountEntry {
                code,
                count: e.count,
            })
        })
        .collect();

    let batch: Vec<CountEntry> = parsed.iter().flatten().cloned().collect();
    let mut outcomes = state.importer().import_batch(&batch).await.into_iter();

    let results: Vec<EntryResult> = req
        .entries
        .iter()
        .zip(&parsed)
        .map(|(body, parsed)| match parsed {
            // One outcome per batch entry, in order.
            Some(_) => outcomes.next().map_or(
                EntryResult {
                    code: body.code.clone(),
                    status: EntryStatus::Failed,
                    error: Some("missing outcome".to_owned()),
                },
                |o| EntryResult {
                    code: body.code.clone(),
                    status: o.status,
                    error: o.error,
                },
            ),
            None => EntryResult {
                code: body.code.clone(),
                status: EntryStatus::Skipped,
                error: None,
            },
        })
        .collect();

    let any_failed = results.iter().any(|r| r.status == EntryStatus::Failed);
    let status = if any_failed {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    let message = if any_failed {
        "Some entries failed"
    } else {
        "Counts updated"
    };

    Ok((status, Json(UpdateCountsResponse { message, results })))
}
