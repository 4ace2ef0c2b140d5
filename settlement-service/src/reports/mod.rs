//! Acquirer (FAC) transaction reports.
//!
//! A [`FacReportSource`] makes exactly one attempt against the remote
//! portal. A [`FacReportGenerator`] turns that into the bounded, cached
//! operation the reconciliation flow relies on.

pub mod archive;
pub mod generator;
pub mod portal;

use crate::matching::{totals, ReconciliationWindow};
use crate::models::FacTransaction;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub use archive::ReportArchive;
pub use generator::RetryingReportGenerator;
pub use portal::{FacPortalClient, FacPortalConfig};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Remote report system error: {0}")]
    Remote(String),

    #[error("Malformed report: {0}")]
    Malformed(String),

    #[error("Report archive error: {0}")]
    Archive(String),

    #[error("Report generation failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        ReportError::Malformed(err.to_string())
    }
}

/// Rows exported for one window, plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct FacReport {
    pub file_name: String,
    pub window: ReconciliationWindow,
    pub rows: Vec<FacTransaction>,
    /// Remote attempts spent; zero when served from the archive.
    pub attempts: u32,
    pub from_archive: bool,
}

impl FacReport {
    pub fn transaction_count(&self) -> i64 {
        totals(&self.rows).0
    }

    pub fn total(&self) -> Decimal {
        totals(&self.rows).1
    }

    pub fn contains(&self, row: &FacTransaction) -> bool {
        self.rows.contains(row)
    }
}

/// One attempt at exporting approved transactions for a window.
#[async_trait]
pub trait FacReportSource: Send + Sync {
    async fn fetch(&self, window: &ReconciliationWindow) -> Result<Vec<FacTransaction>, ReportError>;
}

/// Produces the report for a window, retrying and caching as needed.
#[async_trait]
pub trait FacReportGenerator: Send + Sync {
    async fn generate(&self, window: &ReconciliationWindow) -> Result<FacReport, ReportError>;
}
