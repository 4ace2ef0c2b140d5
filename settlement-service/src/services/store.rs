//! Settlement persistence contract and the in-process implementation.

use crate::models::{CreateOutcome, NewSettlement, SettlementRecord, SettlementUpdate};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Settlement for {0} is already completed")]
    AlreadyCompleted(NaiveDate),

    #[error("No settlement exists for {0}")]
    NotFound(NaiveDate),

    #[error(transparent)]
    Database(#[from] AppError),
}

/// Settlement records keyed by settlement date.
///
/// Implementations guarantee at most one record per date, even under
/// concurrent `create` calls, and never mutate a `Completed` record.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Find-or-insert on the settlement date.
    ///
    /// A `New` record that already exists is returned untouched; a
    /// `Completed` one fails with [`StoreError::AlreadyCompleted`].
    async fn create(&self, target: &NewSettlement) -> Result<CreateOutcome, StoreError>;

    /// Merge the provided fields into the `New` record for `date` and
    /// optionally complete it, atomically.
    async fn update(
        &self,
        date: NaiveDate,
        update: &SettlementUpdate,
        mark_completed: bool,
    ) -> Result<SettlementRecord, StoreError>;

    async fn find(&self, date: NaiveDate) -> Result<Option<SettlementRecord>, StoreError>;
}

/// Map-backed store; a single lock makes find-or-insert atomic.
#[derive(Debug, Default)]
pub struct MemorySettlementStore {
    records: Mutex<HashMap<NaiveDate, SettlementRecord>>,
}

impl MemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl SettlementStore for MemorySettlementStore {
    async fn create(&self, target: &NewSettlement) -> Result<CreateOutcome, StoreError> {
        let mut records = self.records.lock().await;
        match records.get(&target.settlement_date) {
            Some(existing) if existing.is_completed() => {
                Err(StoreError::AlreadyCompleted(target.settlement_date))
            }
            Some(existing) => Ok(CreateOutcome::Existing(existing.clone())),
            None => {
                let record = SettlementRecord::new(target);
                records.insert(target.settlement_date, record.clone());
                Ok(CreateOutcome::Created(record))
            }
        }
    }

    async fn update(
        &self,
        date: NaiveDate,
        update: &SettlementUpdate,
        mark_completed: bool,
    ) -> Result<SettlementRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&date).ok_or(StoreError::NotFound(date))?;
        if record.is_completed() {
            return Err(StoreError::AlreadyCompleted(date));
        }

        record.apply(update, mark_completed);
        Ok(record.clone())
    }

    async fn find(&self, date: NaiveDate) -> Result<Option<SettlementRecord>, StoreError> {
        Ok(self.records.lock().await.get(&date).cloned())
    }
}
