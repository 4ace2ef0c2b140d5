//! Bounded trigger queue and the worker pool that drains it.

use crate::models::SettlementTrigger;
use crate::orchestrator::{FlowOutcome, ReconciliationOrchestrator};
use crate::services::metrics;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Producer side of the trigger queue. Never blocks the caller.
#[derive(Clone)]
pub struct SettlementQueue {
    tx: mpsc::Sender<SettlementTrigger>,
}

impl SettlementQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SettlementTrigger>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, trigger: SettlementTrigger) -> Result<(), AppError> {
        self.tx.try_send(trigger).map_err(|e| match e {
            TrySendError::Full(rejected) => {
                metrics::record_queue_rejection();
                tracing::warn!(document = %rejected.document, "Settlement queue full, trigger rejected");
                AppError::ServiceUnavailable
            }
            TrySendError::Closed(_) => {
                AppError::InternalError(anyhow::anyhow!("Settlement queue is closed"))
            }
        })
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Runs at most `concurrency` flows at a time.
pub struct SettlementWorker {
    orchestrator: Arc<ReconciliationOrchestrator>,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl SettlementWorker {
    pub fn new(
        orchestrator: Arc<ReconciliationOrchestrator>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// Consume triggers until cancelled or the queue closes, then wait for
    /// in-flight flows to finish. Queued triggers not yet started are dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<SettlementTrigger>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(concurrency = self.concurrency, "Starting settlement worker");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let trigger = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => {
                        tracing::info!("Settlement queue closed, worker exiting");
                        break;
                    }
                },
            };

            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match orchestrator.run(&trigger).await {
                    Ok(FlowOutcome::Completed(record)) => tracing::debug!(
                        settlement_date = %record.settlement_date,
                        "Settlement flow finished"
                    ),
                    Ok(FlowOutcome::AlreadyCompleted(date)) => tracing::debug!(
                        settlement_date = %date,
                        "Settlement already reconciled"
                    ),
                    // Already logged with flow context by the orchestrator.
                    Err(_) => {}
                }
            });
        }

        rx.close();
        tracing::info!("Waiting for in-flight settlement flows");
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if permits.acquire_many(all).await.is_ok() {
            tracing::info!("Settlement worker drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_rejects_with_service_unavailable() {
        let (queue, _rx) = SettlementQueue::new(1);
        queue
            .enqueue(SettlementTrigger::for_document("a.pdf"))
            .unwrap();
        assert_eq!(queue.available(), 0);

        let err = queue
            .enqueue(SettlementTrigger::for_document("b.pdf"))
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable));
    }

    #[test]
    fn closed_queue_is_an_internal_error() {
        let (queue, rx) = SettlementQueue::new(1);
        drop(rx);
        let err = queue
            .enqueue(SettlementTrigger::for_document("a.pdf"))
            .unwrap_err();
        assert!(matches!(err, AppError::InternalError(_)));
    }
}
