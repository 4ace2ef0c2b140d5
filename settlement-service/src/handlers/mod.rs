use crate::models::{SettlementRecord, SettlementTrigger};
use crate::services::StoreError;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct TriggerAccepted {
    pub status: &'static str,
    pub document: String,
}

/// Queue a reconciliation for one VisaNet document.
#[tracing::instrument(skip_all)]
pub async fn trigger_settlement(
    State(state): State<AppState>,
    Json(trigger): Json<SettlementTrigger>,
) -> Result<(StatusCode, Json<TriggerAccepted>), AppError> {
    let document = trigger.document.trim().to_string();
    if document.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "document must not be empty"
        )));
    }

    state.queue.enqueue(SettlementTrigger {
        document: document.clone(),
        ..trigger
    })?;

    tracing::info!(document = %document, "Settlement trigger queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerAccepted {
            status: "accepted",
            document,
        }),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn get_settlement(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<SettlementRecord>, AppError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!("Invalid settlement date: {}", date))
    })?;

    let record = state.store.find(date).await.map_err(|e| match e {
        StoreError::Database(e) => e,
        other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
    })?;

    record.map(Json).ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Settlement not found for {}", date))
    })
}
