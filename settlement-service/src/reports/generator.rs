use super::{FacReport, FacReportGenerator, FacReportSource, ReportArchive, ReportError};
use crate::matching::ReconciliationWindow;
use crate::services::metrics;
use async_trait::async_trait;
use dashmap::DashMap;
use service_core::retry::{retry_async, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Bounded-retry, archive-backed report generation.
///
/// A report is identified by its logical file name. If the archive already
/// holds it, the remote source is not touched. Otherwise the source is tried
/// up to `policy.max_attempts` times with the policy's back-off, and the rows
/// are archived on success. Concurrent requests for the same name share a
/// lock, so only one remote session per window is ever in flight.
pub struct RetryingReportGenerator {
    source: Arc<dyn FacReportSource>,
    archive: ReportArchive,
    policy: RetryPolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RetryingReportGenerator {
    pub fn new(source: Arc<dyn FacReportSource>, archive: ReportArchive, policy: RetryPolicy) -> Self {
        Self {
            source,
            archive,
            policy,
            locks: DashMap::new(),
        }
    }

    /// Fixed back-off between a bounded number of attempts.
    pub fn with_fixed_backoff(
        source: Arc<dyn FacReportSource>,
        archive: ReportArchive,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self::new(source, archive, RetryPolicy::fixed(max_attempts, backoff))
    }

    pub fn archive(&self) -> &ReportArchive {
        &self.archive
    }

    /// Windows with a generation currently running or waiting.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, file_name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other caller holds or waits on it.
    fn release(&self, file_name: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(file_name, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn generate_locked(
        &self,
        window: &ReconciliationWindow,
        file_name: String,
    ) -> Result<FacReport, ReportError> {
        if let Some(rows) = self.archive.load(&file_name).await? {
            metrics::record_report_attempt("cached");
            tracing::info!(file_name = %file_name, rows = rows.len(), "Reusing archived FAC report");
            return Ok(FacReport {
                file_name,
                window: *window,
                rows,
                attempts: 0,
                from_archive: true,
            });
        }

        let source = &self.source;
        let fetched = retry_async(&self.policy, "fac_report", |attempt| async move {
            tracing::info!(attempt, "Generating FAC report");
            let result = source.fetch(window).await;
            metrics::record_report_attempt(if result.is_ok() { "success" } else { "failure" });
            result
        })
        .await
        .map_err(|e| ReportError::Exhausted {
            attempts: e.attempts,
            last_error: e.last_error.to_string(),
        })?;

        self.archive.store(&file_name, &fetched.value).await?;

        Ok(FacReport {
            file_name,
            window: *window,
            rows: fetched.value,
            attempts: fetched.attempts,
            from_archive: false,
        })
    }
}

#[async_trait]
impl FacReportGenerator for RetryingReportGenerator {
    #[tracing::instrument(skip(self, window), fields(window = %window))]
    async fn generate(&self, window: &ReconciliationWindow) -> Result<FacReport, ReportError> {
        let file_name = window.report_file_name();
        let lock = self.lock_for(&file_name);
        let result = {
            let _guard = lock.lock().await;
            self.generate_locked(window, file_name.clone()).await
        };
        self.release(&file_name, lock);
        result
    }
}
