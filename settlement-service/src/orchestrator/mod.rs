//! The reconciliation flow for one VisaNet document.
//!
//! ```text
//! Extracting -> Opened -> Generating -> Comparing -> Notifying -> Done
//!                            ^              |
//!                            +- Adjusting <-+
//! ```
//!
//! Any step may end in `Errored`. Steps run strictly in sequence; the only
//! coordination with other flows is the store's uniqueness on the
//! settlement date.

use crate::error::ReconciliationError;
use crate::extraction::VisaNetExtractor;
use crate::matching::{MatchEngine, MatchResult, ReconciliationWindow, Resolution};
use crate::models::{NewSettlement, SettlementRecord, SettlementTrigger, SettlementUpdate};
use crate::reports::{FacReport, FacReportGenerator};
use crate::services::metrics;
use crate::services::{NotificationKind, Notifier, SettlementStore, StoreError};
use chrono::NaiveDate;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{field, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Extracting,
    Opened,
    Generating,
    Comparing,
    Adjusting,
    Notifying,
    Done,
    Errored,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extracting => "extracting",
            Self::Opened => "opened",
            Self::Generating => "generating",
            Self::Comparing => "comparing",
            Self::Adjusting => "adjusting",
            Self::Notifying => "notifying",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Successful terminal outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    Completed(SettlementRecord),
    /// The date was reconciled before; nothing was changed or sent.
    AlreadyCompleted(NaiveDate),
}

/// How the final candidate figures were obtained.
enum Settled {
    Exact(FacReport),
    Adjusted(Resolution),
}

/// Narrow a candidate count to the store's column type.
fn stored_count(count: i64) -> Result<i32, ReconciliationError> {
    i32::try_from(count).map_err(|_| {
        ReconciliationError::Store(AppError::InternalError(anyhow::anyhow!(
            "Candidate transaction count {} exceeds the storable range",
            count
        )))
    })
}

/// Candidate figures of a whole report window.
fn report_update(
    report: &FacReport,
    adjustment_note: Option<String>,
) -> Result<SettlementUpdate, ReconciliationError> {
    Ok(SettlementUpdate {
        fac_file_name: Some(report.file_name.clone()),
        fac_window_start: Some(report.window.start_at()),
        fac_window_end: Some(report.window.end_at()),
        fac_transaction_count: Some(stored_count(report.transaction_count())?),
        fac_transaction_total: Some(report.total()),
        adjustment_note,
    })
}

impl Settled {
    /// Final figures. An exact match reached after moving the window
    /// overwrites the discrepancy note left by earlier windows.
    fn update(&self, iterations: u32) -> Result<SettlementUpdate, ReconciliationError> {
        match self {
            Settled::Exact(report) => {
                let note = (iterations > 1).then(|| format!("Matched on window {}", report.window));
                report_update(report, note)
            }
            Settled::Adjusted(resolution) => Ok(SettlementUpdate {
                fac_file_name: Some(resolution.window.report_file_name()),
                fac_window_start: Some(resolution.window.start_at()),
                fac_window_end: Some(resolution.window.end_at()),
                fac_transaction_count: Some(stored_count(resolution.transaction_count)?),
                fac_transaction_total: Some(resolution.total),
                adjustment_note: Some(resolution.note()),
            }),
        }
    }
}

struct Flow {
    state: FlowState,
    date: Option<NaiveDate>,
    iterations: u32,
}

impl Flow {
    fn new() -> Self {
        Self {
            state: FlowState::Extracting,
            date: None,
            iterations: 0,
        }
    }

    fn enter(&mut self, next: FlowState) {
        tracing::debug!(
            from = %self.state,
            to = %next,
            settlement_date = ?self.date,
            "Flow transition"
        );
        self.state = next;
    }
}

pub struct ReconciliationOrchestrator {
    extractor: Arc<dyn VisaNetExtractor>,
    generator: Arc<dyn FacReportGenerator>,
    store: Arc<dyn SettlementStore>,
    notifier: Arc<dyn Notifier>,
    engine: MatchEngine,
}

impl ReconciliationOrchestrator {
    pub fn new(
        extractor: Arc<dyn VisaNetExtractor>,
        generator: Arc<dyn FacReportGenerator>,
        store: Arc<dyn SettlementStore>,
        notifier: Arc<dyn Notifier>,
        engine: MatchEngine,
    ) -> Self {
        Self {
            extractor,
            generator,
            store,
            notifier,
            engine,
        }
    }

    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    /// Reconcile the document named by `trigger`, end to end.
    pub async fn run(&self, trigger: &SettlementTrigger) -> Result<FlowOutcome, ReconciliationError> {
        let span = tracing::info_span!(
            "settlement_flow",
            document = %trigger.document,
            settlement_date = field::Empty,
        );

        async {
            let mut flow = Flow::new();
            let result = self.drive(trigger, &mut flow).await;

            match &result {
                Ok(FlowOutcome::Completed(record)) => {
                    flow.enter(FlowState::Done);
                    metrics::record_flow("completed");
                    metrics::record_search_iterations(flow.iterations);
                    tracing::info!(
                        settlement_id = %record.settlement_id,
                        iterations = flow.iterations,
                        "Settlement reconciled"
                    );
                }
                Ok(FlowOutcome::AlreadyCompleted(date)) => {
                    flow.enter(FlowState::Done);
                    metrics::record_flow("already_completed");
                    tracing::info!(settlement_date = %date, "Settlement already completed, nothing to do");
                }
                Err(e) => {
                    let last_state = flow.state;
                    flow.enter(FlowState::Errored);
                    metrics::record_flow(e.outcome_label());
                    if flow.iterations > 0 {
                        metrics::record_search_iterations(flow.iterations);
                    }
                    tracing::error!(
                        settlement_date = ?flow.date,
                        state = %last_state,
                        error = %e,
                        "Settlement flow failed"
                    );
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        trigger: &SettlementTrigger,
        flow: &mut Flow,
    ) -> Result<FlowOutcome, ReconciliationError> {
        let summary = self.extractor.extract(&trigger.document).await?;
        let date = summary.report_date;
        flow.date = Some(date);
        tracing::Span::current().record("settlement_date", field::display(date));

        flow.enter(FlowState::Opened);
        let target = NewSettlement::from_summary(&summary, trigger);
        match self.store.create(&target).await {
            Ok(outcome) => {
                tracing::info!(
                    settlement_id = %outcome.record().settlement_id,
                    count = target.transaction_count,
                    amount = %target.clearing_amount,
                    "Settlement opened"
                );
            }
            Err(StoreError::AlreadyCompleted(date)) => return Ok(FlowOutcome::AlreadyCompleted(date)),
            Err(e) => return Err(e.into()),
        }

        let target_count = i64::from(target.transaction_count);
        let target_amount = target.clearing_amount.round_dp(2);

        let mut reports: HashMap<ReconciliationWindow, FacReport> = HashMap::new();
        let mut visited: HashSet<ReconciliationWindow> = HashSet::new();
        let mut window = self.engine.initial_window(date);

        let settled = loop {
            flow.iterations += 1;
            visited.insert(window);

            flow.enter(FlowState::Generating);
            let report = self.report_for(window, &mut reports).await?;

            flow.enter(FlowState::Comparing);
            let result = self
                .engine
                .evaluate(target_count, target_amount, &report.rows);
            tracing::info!(
                window = %window,
                fac_count = report.transaction_count(),
                fac_total = %report.total(),
                result = %result,
                "Window compared"
            );

            if result.is_match {
                break Settled::Exact(report);
            }

            let partial = report_update(&report, Some(result.to_string()))?;
            if self.persist(date, &partial, false).await?.is_none() {
                return Ok(FlowOutcome::AlreadyCompleted(date));
            }

            if let Some(resolution) = self.resolve(&report, &result, &mut reports).await? {
                tracing::info!(note = %resolution.note(), "Discrepancy resolved by transaction adjustment");
                break Settled::Adjusted(resolution);
            }

            let next = if flow.iterations < self.engine.max_iterations() {
                self.engine.next_window(&window, &result, &visited)
            } else {
                None
            };

            match next {
                Some(next) => {
                    flow.enter(FlowState::Adjusting);
                    window = next;
                }
                None => {
                    return Err(ReconciliationError::UnresolvedDiscrepancy {
                        date,
                        iterations: flow.iterations,
                        last: result,
                    })
                }
            }
        };

        flow.enter(FlowState::Notifying);
        let Some(record) = self
            .persist(date, &settled.update(flow.iterations)?, true)
            .await?
        else {
            return Ok(FlowOutcome::AlreadyCompleted(date));
        };

        self.notify_all(&record).await;
        Ok(FlowOutcome::Completed(record))
    }

    /// Write candidate figures; `None` when another flow completed the
    /// record in the meantime.
    async fn persist(
        &self,
        date: NaiveDate,
        update: &SettlementUpdate,
        mark_completed: bool,
    ) -> Result<Option<SettlementRecord>, ReconciliationError> {
        match self.store.update(date, update, mark_completed).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::AlreadyCompleted(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn report_for(
        &self,
        window: ReconciliationWindow,
        reports: &mut HashMap<ReconciliationWindow, FacReport>,
    ) -> Result<FacReport, ReconciliationError> {
        if let Some(report) = reports.get(&window) {
            return Ok(report.clone());
        }
        let report = self.generator.generate(&window).await?;
        tracing::debug!(
            file_name = %report.file_name,
            attempts = report.attempts,
            from_archive = report.from_archive,
            "FAC report ready"
        );
        reports.insert(window, report.clone());
        Ok(report)
    }

    /// Try to close the gap with individual transactions before moving the
    /// window.
    async fn resolve(
        &self,
        report: &FacReport,
        result: &MatchResult,
        reports: &mut HashMap<ReconciliationWindow, FacReport>,
    ) -> Result<Option<Resolution>, ReconciliationError> {
        if result.count_delta < 0 {
            return Ok(self
                .engine
                .resolve_removals(&report.window, &report.rows, result));
        }
        if result.count_delta > 0 {
            let wider = self.report_for(report.window.widened(), reports).await?;
            return Ok(self.engine.resolve_inclusions(
                &report.window,
                &report.rows,
                &wider.window,
                &wider.rows,
                result,
            ));
        }
        Ok(None)
    }

    async fn notify_all(&self, record: &SettlementRecord) {
        for kind in [NotificationKind::AcquirerReply, NotificationKind::InternalSummary] {
            match self.notifier.notify(kind, record).await {
                Ok(()) => metrics::record_notification(kind.as_str(), "sent"),
                Err(e) => {
                    metrics::record_notification(kind.as_str(), "failed");
                    tracing::warn!(
                        kind = kind.as_str(),
                        settlement_date = %record.settlement_date,
                        error = %e,
                        "Notification failed; settlement stays completed"
                    );
                }
            }
        }
    }
}
