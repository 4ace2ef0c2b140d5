//! HTTP client for the acquirer merchant portal.
//!
//! The portal is session based: a form login sets a cookie, after which the
//! transaction export accepts the same filters as the interactive report
//! screen and answers with CSV. Exports carry a few banner lines above the
//! column header, so parsing starts at the `Date Time` header row.

use super::{FacReportSource, ReportError};
use crate::matching::ReconciliationWindow;
use crate::models::{fac_amount, fac_datetime, FacTransaction};
use async_trait::async_trait;
use csv::ReaderBuilder;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const LOGIN_PATH: &str = "/login";
const EXPORT_PATH: &str = "/reports/transactions/export";
const TRANSACTION_TYPE: &str = "Auth";
const TRANSACTION_STATUS: &str = "Approved";
const TIME_FORMAT: &str = "%I:%M %p";
const DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone)]
pub struct FacPortalConfig {
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
    pub merchant_name: String,
    pub currency_code: String,
    pub request_timeout: Duration,
}

pub struct FacPortalClient {
    config: FacPortalConfig,
}

impl FacPortalClient {
    pub fn new(config: FacPortalConfig) -> Self {
        Self { config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Every attempt gets a fresh cookie jar so a failed session never leaks
    /// into the next one.
    fn session(&self) -> Result<Client, ReportError> {
        Client::builder()
            .cookie_store(true)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| ReportError::Remote(format!("Failed to create HTTP client: {}", e)))
    }

    /// Form fields for the export request.
    pub fn export_form(&self, window: &ReconciliationWindow) -> Vec<(&'static str, String)> {
        vec![
            ("merchant", self.config.merchant_name.clone()),
            ("start_date", window.start_date.format(DATE_FORMAT).to_string()),
            ("start_time", window.start_time().format(TIME_FORMAT).to_string()),
            ("end_date", window.end_date.format(DATE_FORMAT).to_string()),
            ("end_time", window.end_time().format(TIME_FORMAT).to_string()),
            ("transaction_type", TRANSACTION_TYPE.to_string()),
            ("status", TRANSACTION_STATUS.to_string()),
            ("currency", self.config.currency_code.clone()),
            ("format", "csv".to_string()),
        ]
    }

    async fn login(&self, client: &Client) -> Result<(), ReportError> {
        let response = client
            .post(self.url(LOGIN_PATH))
            .form(&[
                ("txtUID", self.config.username.as_str()),
                ("txtPwd", self.config.password.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| ReportError::Remote(format!("Login request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ReportError::Remote(format!(
                "Login rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FacReportSource for FacPortalClient {
    async fn fetch(&self, window: &ReconciliationWindow) -> Result<Vec<FacTransaction>, ReportError> {
        let client = self.session()?;

        tracing::debug!(window = %window, "Logging in to FAC portal");
        self.login(&client).await?;

        let response = client
            .post(self.url(EXPORT_PATH))
            .form(&self.export_form(window))
            .send()
            .await
            .map_err(|e| ReportError::Remote(format!("Export request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Remote(format!(
                "Export failed with status {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ReportError::Remote(format!("Failed to read export: {}", e)))?;

        let rows = parse_export(&body)?;
        tracing::info!(window = %window, rows = rows.len(), "FAC export downloaded");
        Ok(rows)
    }
}

#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(rename = "Date Time", default)]
    timestamp: String,
    #[serde(rename = "Order ID", default)]
    identifier: String,
    #[serde(rename = "Amount", default)]
    amount: String,
    #[serde(rename = "Ccy", default)]
    currency: String,
}

/// Parse a portal CSV export, skipping banner lines and trailing total rows.
pub fn parse_export(body: &str) -> Result<Vec<FacTransaction>, ReportError> {
    let header_at = body
        .lines()
        .position(|line| line.trim_start_matches('\u{feff}').starts_with("Date Time"))
        .ok_or_else(|| ReportError::Malformed("export has no 'Date Time' header".to_string()))?;
    let table: String = body
        .lines()
        .skip(header_at)
        .map(|line| line.trim_start_matches('\u{feff}'))
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());

    let mut rows = Vec::new();
    for record in reader.deserialize::<ExportRow>() {
        let raw = record?;
        if raw.timestamp.is_empty() || raw.identifier.is_empty() {
            continue;
        }

        let timestamp = fac_datetime::parse(&raw.timestamp).ok_or_else(|| {
            ReportError::Malformed(format!("bad 'Date Time' value: {}", raw.timestamp))
        })?;
        let amount = fac_amount::parse(&raw.amount)
            .ok_or_else(|| ReportError::Malformed(format!("bad 'Amount' value: {}", raw.amount)))?;

        rows.push(FacTransaction {
            timestamp,
            identifier: raw.identifier,
            amount,
            currency: raw.currency,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn client() -> FacPortalClient {
        FacPortalClient::new(FacPortalConfig {
            base_url: "http://portal.test/".to_string(),
            username: "user".to_string(),
            password: SecretString::new("secret".to_string()),
            merchant_name: "ACME LTD".to_string(),
            currency_code: "780".to_string(),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn export_form_uses_fixed_clock_boundaries() {
        let window = ReconciliationWindow::new(
            NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 15).unwrap(),
        )
        .unwrap();

        let form = client().export_form(&window);
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("start_date"), "04/14/2025");
        assert_eq!(get("start_time"), "06:00 AM");
        assert_eq!(get("end_date"), "04/15/2025");
        assert_eq!(get("end_time"), "05:59 AM");
        assert_eq!(get("transaction_type"), "Auth");
        assert_eq!(get("status"), "Approved");
        assert_eq!(get("currency"), "780");
        assert_eq!(client().url(LOGIN_PATH), "http://portal.test/login");
    }

    #[test]
    fn parse_export_skips_banner_and_totals() {
        let body = "Merchant Transaction Report\n\
                    Generated 04/15/2025\n\
                    \n\
                    Date Time,Order ID,Card,Amount,Ccy\n\
                    04/14/2025 06:12:09 AM,ORD-1,4111,\"1,250.00\",780\n\
                    04/15/2025 05:01:00 AM,ORD-2,4222,20.5,780\n\
                    ,,,1270.50,\n";

        let rows = parse_export(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identifier, "ORD-1");
        assert_eq!(rows[0].amount, Decimal::new(125000, 2));
        assert_eq!(rows[1].amount, Decimal::new(2050, 2));
    }

    #[test]
    fn parse_export_without_header_is_malformed() {
        assert!(matches!(
            parse_export("<html>session expired</html>"),
            Err(ReportError::Malformed(_))
        ));
    }
}
