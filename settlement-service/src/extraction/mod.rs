//! VisaNet settlement report extraction.
//!
//! Text extraction from the PDF itself happens upstream; this module works
//! on page texts and pulls the `ORIGINAL SALE` figures out of the
//! interchange value report page for one report id and currency.

use crate::models::VisaNetSummary;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document not recognized: {0}")]
    NotRecognized(String),

    #[error("Failed to read document: {0}")]
    Io(String),
}

/// Pulls `(count, amount, report date)` out of a settlement document.
#[async_trait]
pub trait VisaNetExtractor: Send + Sync {
    async fn extract(&self, document: &str) -> Result<VisaNetSummary, ExtractionError>;
}

/// Yields the page texts of a named document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn pages(&self, document: &str) -> Result<Vec<String>, ExtractionError>;
}

/// Reads `<dir>/<stem>.txt`, one page per form-feed separated chunk.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    dir: PathBuf,
}

impl FsDocumentSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn text_path(&self, document: &str) -> Result<PathBuf, ExtractionError> {
        let name = Path::new(document);
        let plain = name.components().count() == 1
            && matches!(name.components().next(), Some(Component::Normal(_)));
        if !plain {
            return Err(ExtractionError::NotRecognized(format!(
                "invalid document name: {}",
                document
            )));
        }
        let stem = name
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ExtractionError::NotRecognized(format!("invalid document name: {}", document)))?;
        Ok(self.dir.join(format!("{}.txt", stem)))
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn pages(&self, document: &str) -> Result<Vec<String>, ExtractionError> {
        let path = self.text_path(document)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text.split('\u{c}').map(str::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ExtractionError::DocumentNotFound(document.to_string()))
            }
            Err(e) => Err(ExtractionError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Case-insensitive markers selecting the report page, and the row/date
/// patterns read from it.
#[derive(Debug, Clone)]
struct SectionPatterns {
    report_id: Regex,
    settlement_currency: Regex,
    clearing_currency: Regex,
    title: Regex,
    report_date: Regex,
    original_sale: Regex,
}

impl SectionPatterns {
    fn new(report_id: &str, currency: &str) -> Result<Self, regex::Error> {
        let build = |pattern: String| RegexBuilder::new(&pattern).case_insensitive(true).build();
        Ok(Self {
            report_id: build(format!(r"REPORT\s+ID:\s*{}", regex::escape(report_id)))?,
            settlement_currency: build(format!(
                r"SETTLEMENT\s+CURRENCY:\s*{}",
                regex::escape(currency)
            ))?,
            clearing_currency: build(format!(r"CLEARING\s+CURRENCY:\s*{}", regex::escape(currency)))?,
            title: build(r"INTERCHANGE\s+VALUE\s+REPORT".to_string())?,
            report_date: build(
                r"REPORT\s+DATE\s*:\s*([0-9]{1,2}(?:\s*[A-Z]{3,9}\s*|[/\-‑][0-9]{1,2}[/\-‑])[0-9]{2,4})"
                    .to_string(),
            )?,
            original_sale: build(r"ORIGINAL\s+SALE\s+([\d,]+)\s+([\d,]+\.\d{2})".to_string())?,
        })
    }

    fn is_report_page(&self, text: &str) -> bool {
        self.report_id.is_match(text)
            && self.settlement_currency.is_match(text)
            && self.clearing_currency.is_match(text)
            && self.title.is_match(text)
    }
}

/// Regex based extractor over any [`DocumentSource`].
#[derive(Debug, Clone)]
pub struct VisaNetTextExtractor<S> {
    source: S,
    patterns: SectionPatterns,
}

impl<S: DocumentSource> VisaNetTextExtractor<S> {
    pub fn new(source: S, report_id: &str, currency: &str) -> Result<Self, ExtractionError> {
        let patterns = SectionPatterns::new(report_id, currency)
            .map_err(|e| ExtractionError::NotRecognized(format!("invalid section pattern: {}", e)))?;
        Ok(Self { source, patterns })
    }

    /// Figures from a single page of text.
    ///
    /// A report page without an `ORIGINAL SALE` row settles nothing and
    /// yields zero count and amount for its date.
    pub fn summarize_page(&self, text: &str) -> Result<VisaNetSummary, ExtractionError> {
        let raw_date = self
            .patterns
            .report_date
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| ExtractionError::NotRecognized("report date not found".to_string()))?;
        let report_date = parse_report_date(raw_date)
            .ok_or_else(|| ExtractionError::NotRecognized(format!("unreadable report date: {}", raw_date)))?;

        let Some(row) = self.patterns.original_sale.captures(text) else {
            tracing::info!(%report_date, "No ORIGINAL SALE row on report page");
            return Ok(VisaNetSummary {
                transaction_count: 0,
                clearing_amount: Decimal::ZERO,
                report_date,
            });
        };

        let count_raw = row[1].replace(',', "");
        let amount_raw = row[2].replace(',', "");
        let transaction_count = count_raw
            .parse::<i32>()
            .map_err(|_| ExtractionError::NotRecognized(format!("bad transaction count: {}", &row[1])))?;
        let clearing_amount = Decimal::from_str(&amount_raw)
            .map_err(|_| ExtractionError::NotRecognized(format!("bad clearing amount: {}", &row[2])))?;

        Ok(VisaNetSummary {
            transaction_count,
            clearing_amount: clearing_amount.round_dp(2),
            report_date,
        })
    }
}

#[async_trait]
impl<S: DocumentSource> VisaNetExtractor for VisaNetTextExtractor<S> {
    #[tracing::instrument(skip(self))]
    async fn extract(&self, document: &str) -> Result<VisaNetSummary, ExtractionError> {
        let pages = self.source.pages(document).await?;
        let page = pages
            .iter()
            .find(|text| self.patterns.is_report_page(text))
            .ok_or_else(|| ExtractionError::NotRecognized("report page not located".to_string()))?;

        let summary = self.summarize_page(page)?;
        tracing::info!(
            count = summary.transaction_count,
            amount = %summary.clearing_amount,
            report_date = %summary.report_date,
            "VisaNet figures extracted"
        );
        Ok(summary)
    }
}

/// `07 MAY 2025`, `7 May 2025`, `07/05/2025`, `07-05-2025`, `06MAY25`, `06MAY2025`.
pub fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let compact: String = raw
        .trim()
        .replace('\u{2011}', "-")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if compact.contains('/') {
        return NaiveDate::parse_from_str(&compact, "%d/%m/%Y").ok();
    }
    if compact.contains('-') {
        return NaiveDate::parse_from_str(&compact, "%d-%m-%Y").ok();
    }

    let year_digits = compact
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    match year_digits {
        2 => NaiveDate::parse_from_str(&compact, "%d%b%y").ok(),
        4 => NaiveDate::parse_from_str(&compact, "%d%b%Y").ok(),
        _ => None,
    }
}
