//! Terminal failures of a reconciliation flow.

use crate::extraction::ExtractionError;
use crate::matching::MatchResult;
use crate::reports::ReportError;
use crate::services::StoreError;
use chrono::NaiveDate;
use service_core::error::AppError;
use thiserror::Error;

/// Why a flow ended in the errored state. An already completed settlement
/// is not an error and never appears here.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("VisaNet extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("FAC report generation failed: {0}")]
    Generation(#[from] ReportError),

    #[error("No settlement exists for {0}")]
    NotFound(NaiveDate),

    #[error("Unresolved discrepancy for {date} after {iterations} window(s): {last}")]
    UnresolvedDiscrepancy {
        date: NaiveDate,
        iterations: u32,
        last: MatchResult,
    },

    #[error("Settlement store error: {0}")]
    Store(AppError),
}

impl ReconciliationError {
    /// Label used for the `settlement_flows_total` outcome.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction_failed",
            Self::Generation(_) => "generation_failed",
            Self::NotFound(_) => "store_error",
            Self::UnresolvedDiscrepancy { .. } => "unresolved",
            Self::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for ReconciliationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(date) => Self::NotFound(date),
            StoreError::Database(e) => Self::Store(e),
            StoreError::AlreadyCompleted(date) => Self::Store(AppError::Conflict(anyhow::anyhow!(
                "Settlement for {} is already completed",
                date
            ))),
        }
    }
}
