//! Domain models for settlement-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Settlement Models
// ============================================================================

/// Lifecycle of a settlement record. Moves `New -> Completed` once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    New,
    Completed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            _ => Self::New,
        }
    }
}

/// One reconciliation unit, keyed by the VisaNet report date.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SettlementRecord {
    pub settlement_id: Uuid,
    pub settlement_date: NaiveDate,
    pub name: String,
    pub description: Option<String>,

    // Target figures (VisaNet).
    pub transaction_count: i32,
    pub clearing_amount: Decimal,
    pub source_file_name: String,
    pub source_email_id: Option<String>,
    pub source_attachment_id: Option<String>,

    // Candidate figures (FAC).
    pub fac_file_name: Option<String>,
    pub fac_window_start: Option<NaiveDateTime>,
    pub fac_window_end: Option<NaiveDateTime>,
    pub fac_transaction_count: Option<i32>,
    pub fac_transaction_total: Option<Decimal>,
    pub adjustment_note: Option<String>,

    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub attempt_count: i32,
}

impl SettlementRecord {
    /// Fresh `New` record for the given target, as it would be inserted.
    pub fn new(target: &NewSettlement) -> Self {
        let now = Utc::now();
        Self {
            settlement_id: Uuid::new_v4(),
            settlement_date: target.settlement_date,
            name: target.display_name(),
            description: Some(target.display_name()),
            transaction_count: target.transaction_count,
            clearing_amount: target.clearing_amount.round_dp(2),
            source_file_name: target.source_file_name.clone(),
            source_email_id: target.source_email_id.clone(),
            source_attachment_id: target.source_attachment_id.clone(),
            fac_file_name: None,
            fac_window_start: None,
            fac_window_end: None,
            fac_transaction_count: None,
            fac_transaction_total: None,
            adjustment_note: None,
            status: SettlementStatus::New.as_str().to_string(),
            created_at: now,
            last_attempt_at: now,
            attempt_count: 0,
        }
    }

    pub fn status(&self) -> SettlementStatus {
        SettlementStatus::from_str(&self.status)
    }

    pub fn is_completed(&self) -> bool {
        self.status() == SettlementStatus::Completed
    }

    /// Merge the provided fields, bump the audit counters and optionally
    /// complete. Callers must have checked the record is still `New`.
    pub fn apply(&mut self, update: &SettlementUpdate, mark_completed: bool) {
        if let Some(name) = &update.fac_file_name {
            self.fac_file_name = Some(name.clone());
        }
        if let Some(start) = update.fac_window_start {
            self.fac_window_start = Some(start);
        }
        if let Some(end) = update.fac_window_end {
            self.fac_window_end = Some(end);
        }
        if let Some(count) = update.fac_transaction_count {
            self.fac_transaction_count = Some(count);
        }
        if let Some(total) = update.fac_transaction_total {
            self.fac_transaction_total = Some(total.round_dp(2));
        }
        if let Some(note) = &update.adjustment_note {
            self.adjustment_note = Some(note.clone());
        }

        self.attempt_count += 1;
        self.last_attempt_at = Utc::now();

        if mark_completed {
            self.status = SettlementStatus::Completed.as_str().to_string();
        }
    }
}

/// Target figures used to open a settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSettlement {
    pub settlement_date: NaiveDate,
    pub transaction_count: i32,
    pub clearing_amount: Decimal,
    pub source_file_name: String,
    pub source_email_id: Option<String>,
    pub source_attachment_id: Option<String>,
}

impl NewSettlement {
    pub fn from_summary(summary: &VisaNetSummary, trigger: &SettlementTrigger) -> Self {
        Self {
            settlement_date: summary.report_date,
            transaction_count: summary.transaction_count,
            clearing_amount: summary.clearing_amount,
            source_file_name: trigger.document.clone(),
            source_email_id: trigger.email_id.clone(),
            source_attachment_id: trigger.attachment_id.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("Settlement for {}", self.settlement_date)
    }
}

/// Candidate fields to merge into a settlement. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementUpdate {
    pub fac_file_name: Option<String>,
    pub fac_window_start: Option<NaiveDateTime>,
    pub fac_window_end: Option<NaiveDateTime>,
    pub fac_transaction_count: Option<i32>,
    pub fac_transaction_total: Option<Decimal>,
    pub adjustment_note: Option<String>,
}

/// Result of a find-or-insert on the settlement date.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(SettlementRecord),
    /// A `New` record already existed; returned untouched.
    Existing(SettlementRecord),
}

impl CreateOutcome {
    pub fn record(&self) -> &SettlementRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> SettlementRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

// ============================================================================
// Source Document Models
// ============================================================================

/// Figures read from the VisaNet settlement report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisaNetSummary {
    pub transaction_count: i32,
    pub clearing_amount: Decimal,
    pub report_date: NaiveDate,
}

/// Request to reconcile one VisaNet document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettlementTrigger {
    /// Document name as known to the document source, e.g.
    /// `TT Acquirer Visa Files 07.05.2025.pdf`.
    pub document: String,
    #[serde(default)]
    pub email_id: Option<String>,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

impl SettlementTrigger {
    pub fn for_document(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            email_id: None,
            attachment_id: None,
        }
    }
}

// ============================================================================
// FAC Report Models
// ============================================================================

/// One approved authorisation row from an acquirer (FAC) report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacTransaction {
    #[serde(rename = "Date Time", with = "fac_datetime")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "Order ID")]
    pub identifier: String,
    #[serde(rename = "Amount", with = "fac_amount")]
    pub amount: Decimal,
    #[serde(rename = "Ccy")]
    pub currency: String,
}

/// Amounts as exported, tolerating thousands separators (`1,234.50`).
pub mod fac_amount {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn parse(raw: &str) -> Option<Decimal> {
        let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
        Decimal::from_str(&cleaned).ok().map(|d| d.round_dp(2))
    }

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:.2}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", raw)))
    }
}

/// Timestamps as the portal exports them (`04/14/2025 06:12:09 AM`), with
/// ISO `2025-04-14 06:12:09` accepted on read.
pub mod fac_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";
    const ACCEPTED: [&str; 4] = [
        FORMAT,
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        ACCEPTED
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date time: {}", raw)))
    }
}
