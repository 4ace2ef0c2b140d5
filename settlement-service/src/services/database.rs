//! Postgres-backed settlement store.

use crate::models::{CreateOutcome, NewSettlement, SettlementRecord, SettlementUpdate};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{SettlementStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SETTLEMENT_COLUMNS: &str = "settlement_id, settlement_date, name, description, \
     transaction_count, clearing_amount, source_file_name, source_email_id, source_attachment_id, \
     fac_file_name, fac_window_start, fac_window_end, fac_transaction_count, fac_transaction_total, \
     adjustment_note, status, created_at, last_attempt_at, attempt_count";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "settlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_by_date(&self, date: NaiveDate) -> Result<Option<SettlementRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_settlement"])
            .start_timer();

        let record = sqlx::query_as::<_, SettlementRecord>(&format!(
            "SELECT {} FROM settlements WHERE settlement_date = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get settlement: {}", e)))?;

        timer.observe_duration();
        Ok(record)
    }
}

#[async_trait]
impl SettlementStore for Database {
    #[instrument(skip(self, target), fields(settlement_date = %target.settlement_date))]
    async fn create(&self, target: &NewSettlement) -> Result<CreateOutcome, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_settlement"])
            .start_timer();

        let inserted = sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            INSERT INTO settlements (settlement_id, settlement_date, name, description,
                transaction_count, clearing_amount, source_file_name, source_email_id,
                source_attachment_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'new')
            ON CONFLICT (settlement_date) DO NOTHING
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(target.settlement_date)
        .bind(target.display_name())
        .bind(target.display_name())
        .bind(target.transaction_count)
        .bind(target.clearing_amount.round_dp(2))
        .bind(&target.source_file_name)
        .bind(&target.source_email_id)
        .bind(&target.source_attachment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create settlement: {}", e)))?;

        timer.observe_duration();

        if let Some(record) = inserted {
            info!(settlement_id = %record.settlement_id, "Settlement created");
            return Ok(CreateOutcome::Created(record));
        }

        let existing = self.fetch_by_date(target.settlement_date).await?.ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Settlement for {} conflicted on insert but could not be read",
                target.settlement_date
            ))
        })?;

        if existing.is_completed() {
            return Err(StoreError::AlreadyCompleted(target.settlement_date));
        }

        info!(settlement_id = %existing.settlement_id, "Settlement already open");
        Ok(CreateOutcome::Existing(existing))
    }

    #[instrument(skip(self, update), fields(settlement_date = %date))]
    async fn update(
        &self,
        date: NaiveDate,
        update: &SettlementUpdate,
        mark_completed: bool,
    ) -> Result<SettlementRecord, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_settlement"])
            .start_timer();

        // Fields and the completion flag land in one statement, guarded on
        // the record still being open.
        let updated = sqlx::query_as::<_, SettlementRecord>(&format!(
            r#"
            UPDATE settlements SET
                fac_file_name = COALESCE($2, fac_file_name),
                fac_window_start = COALESCE($3, fac_window_start),
                fac_window_end = COALESCE($4, fac_window_end),
                fac_transaction_count = COALESCE($5, fac_transaction_count),
                fac_transaction_total = COALESCE($6, fac_transaction_total),
                adjustment_note = COALESCE($7, adjustment_note),
                attempt_count = attempt_count + 1,
                last_attempt_at = NOW(),
                status = CASE WHEN $8 THEN 'completed' ELSE status END
            WHERE settlement_date = $1 AND status = 'new'
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(date)
        .bind(&update.fac_file_name)
        .bind(update.fac_window_start)
        .bind(update.fac_window_end)
        .bind(update.fac_transaction_count)
        .bind(update.fac_transaction_total.map(|t| t.round_dp(2)))
        .bind(&update.adjustment_note)
        .bind(mark_completed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update settlement: {}", e)))?;

        timer.observe_duration();

        match updated {
            Some(record) => {
                info!(
                    attempt_count = record.attempt_count,
                    status = %record.status,
                    "Settlement updated"
                );
                Ok(record)
            }
            None => match self.fetch_by_date(date).await? {
                Some(_) => Err(StoreError::AlreadyCompleted(date)),
                None => Err(StoreError::NotFound(date)),
            },
        }
    }

    #[instrument(skip(self))]
    async fn find(&self, date: NaiveDate) -> Result<Option<SettlementRecord>, StoreError> {
        Ok(self.fetch_by_date(date).await?)
    }
}
