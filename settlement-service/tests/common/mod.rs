//! Common test utilities for settlement-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use rust_decimal::Decimal;
use settlement_service::extraction::{ExtractionError, VisaNetExtractor};
use settlement_service::matching::{BoundaryProximitySearch, MatchEngine, ReconciliationWindow};
use settlement_service::models::{
    CreateOutcome, FacTransaction, NewSettlement, SettlementRecord, SettlementUpdate, VisaNetSummary,
};
use settlement_service::orchestrator::ReconciliationOrchestrator;
use settlement_service::reports::{
    FacReportSource, ReportArchive, ReportError, RetryingReportGenerator,
};
use settlement_service::services::{
    MemorySettlementStore, NotificationKind, Notifier, NotifyError, SettlementStore, StoreError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,settlement_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

pub fn tx(id: &str, timestamp: NaiveDateTime, amount_cents: i64) -> FacTransaction {
    FacTransaction {
        timestamp,
        identifier: id.to_string(),
        amount: cents(amount_cents),
        currency: "780".to_string(),
    }
}

/// Extractor returning fixed figures for any document.
pub struct FixedExtractor {
    summary: Option<VisaNetSummary>,
    pub calls: AtomicU32,
}

impl FixedExtractor {
    pub fn returning(count: i32, amount_cents: i64, report_date: NaiveDate) -> Self {
        Self {
            summary: Some(VisaNetSummary {
                transaction_count: count,
                clearing_amount: cents(amount_cents),
                report_date,
            }),
            calls: AtomicU32::new(0),
        }
    }

    pub fn unrecognized() -> Self {
        Self {
            summary: None,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VisaNetExtractor for FixedExtractor {
    async fn extract(&self, _document: &str) -> Result<VisaNetSummary, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summary
            .clone()
            .ok_or_else(|| ExtractionError::NotRecognized("report page not located".to_string()))
    }
}

/// Portal stand-in serving every window from one list of transactions.
///
/// The first `failures` calls fail; `delay` is slept on every call.
pub struct LedgerSource {
    rows: Vec<FacTransaction>,
    failures: u32,
    delay: Duration,
    pub calls: AtomicU32,
    pub windows: Mutex<Vec<ReconciliationWindow>>,
}

impl LedgerSource {
    pub fn new(rows: Vec<FacTransaction>) -> Self {
        Self {
            rows,
            failures: 0,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FacReportSource for LedgerSource {
    async fn fetch(&self, window: &ReconciliationWindow) -> Result<Vec<FacTransaction>, ReportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.windows.lock().unwrap().push(*window);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call <= self.failures {
            return Err(ReportError::Remote(format!("portal timeout on call {}", call)));
        }
        Ok(self
            .rows
            .iter()
            .filter(|row| window.contains(row.timestamp))
            .cloned()
            .collect())
    }
}

/// Notifier recording what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    pub sent: Mutex<Vec<(NotificationKind, NaiveDate)>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, kind: NotificationKind, settlement: &SettlementRecord) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((kind, settlement.settlement_date));
        if self.fail {
            return Err(NotifyError::SendFailed("relay refused".to_string()));
        }
        Ok(())
    }
}

/// Store that lets a competing flow complete the record right before the
/// `nth` update reaches it.
pub struct CompetingStore {
    inner: Arc<MemorySettlementStore>,
    nth: u32,
    updates: AtomicU32,
}

impl CompetingStore {
    pub fn completing_before_update(inner: Arc<MemorySettlementStore>, nth: u32) -> Self {
        Self {
            inner,
            nth,
            updates: AtomicU32::new(0),
        }
    }

    /// Figures written by the competing flow.
    pub fn competing_update() -> SettlementUpdate {
        SettlementUpdate {
            fac_file_name: Some("fac_report_completed_elsewhere".to_string()),
            fac_transaction_count: Some(42),
            fac_transaction_total: Some(cents(4200)),
            adjustment_note: Some("completed by a concurrent flow".to_string()),
            ..SettlementUpdate::default()
        }
    }
}

#[async_trait]
impl SettlementStore for CompetingStore {
    async fn create(&self, target: &NewSettlement) -> Result<CreateOutcome, StoreError> {
        self.inner.create(target).await
    }

    async fn update(
        &self,
        date: NaiveDate,
        update: &SettlementUpdate,
        mark_completed: bool,
    ) -> Result<SettlementRecord, StoreError> {
        let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.nth {
            self.inner
                .update(date, &Self::competing_update(), true)
                .await?;
        }
        self.inner.update(date, update, mark_completed).await
    }

    async fn find(&self, date: NaiveDate) -> Result<Option<SettlementRecord>, StoreError> {
        self.inner.find(date).await
    }
}

/// Orchestrator over in-memory fakes, with handles to inspect them.
pub struct Harness {
    pub orchestrator: ReconciliationOrchestrator,
    pub store: Arc<MemorySettlementStore>,
    pub source: Arc<LedgerSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub extractor: Arc<FixedExtractor>,
    pub archive_dir: TempDir,
}

pub struct HarnessBuilder {
    extractor: FixedExtractor,
    source: LedgerSource,
    notifier: RecordingNotifier,
    max_iterations: u32,
    racing_update: Option<u32>,
}

impl HarnessBuilder {
    pub fn new(extractor: FixedExtractor, source: LedgerSource) -> Self {
        Self {
            extractor,
            source,
            notifier: RecordingNotifier::default(),
            max_iterations: 6,
            racing_update: None,
        }
    }

    /// Complete the record from outside the flow just before its `nth`
    /// store update.
    pub fn completed_elsewhere_before_update(mut self, nth: u32) -> Self {
        self.racing_update = Some(nth);
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn build(self) -> Harness {
        init_tracing();

        let archive_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySettlementStore::new());
        let source = Arc::new(self.source);
        let notifier = Arc::new(self.notifier);
        let extractor = Arc::new(self.extractor);

        let generator = RetryingReportGenerator::with_fixed_backoff(
            source.clone(),
            ReportArchive::new(archive_dir.path()),
            3,
            Duration::from_secs(5),
        );
        let engine = MatchEngine::new(
            Weekday::Tue,
            self.max_iterations,
            Arc::new(BoundaryProximitySearch::default()),
        );
        let store_dyn: Arc<dyn SettlementStore> = match self.racing_update {
            Some(nth) => Arc::new(CompetingStore::completing_before_update(store.clone(), nth)),
            None => store.clone(),
        };

        let orchestrator = ReconciliationOrchestrator::new(
            extractor.clone(),
            Arc::new(generator),
            store_dyn,
            notifier.clone(),
            engine,
        );

        Harness {
            orchestrator,
            store,
            source,
            notifier,
            extractor,
            archive_dir,
        }
    }
}
