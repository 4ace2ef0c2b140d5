//! Completion notifications.
//!
//! Sending is best effort: callers log failures and carry on.

use crate::config::{NotifyConfig, SmtpConfig};
use crate::models::SettlementRecord;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Reply to the acquirer that sent the VisaNet report.
    AcquirerReply,
    /// Summary for the internal finance team.
    InternalSummary,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcquirerReply => "acquirer_reply",
            Self::InternalSummary => "internal_summary",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NotificationKind, settlement: &SettlementRecord) -> Result<(), NotifyError>;
}

/// Escape text for an HTML body. Document names and notes come from callers.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Subject, plain text and HTML bodies for a completed settlement.
pub fn render(kind: NotificationKind, settlement: &SettlementRecord) -> (String, String, String) {
    let count = settlement
        .fac_transaction_count
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    let total = settlement
        .fac_transaction_total
        .map(|t| format!("{:.2}", t))
        .unwrap_or_else(|| "-".to_string());
    let window = match (settlement.fac_window_start, settlement.fac_window_end) {
        (Some(start), Some(end)) => format!(
            "{} to {}",
            start.format("%m/%d/%Y %I:%M %p"),
            end.format("%m/%d/%Y %I:%M %p")
        ),
        _ => "-".to_string(),
    };
    let note = settlement.adjustment_note.clone().unwrap_or_default();

    let subject = match kind {
        NotificationKind::AcquirerReply => format!("Re: {}", settlement.source_file_name),
        NotificationKind::InternalSummary => format!("Settlement completed for {}", settlement.settlement_date),
    };

    let mut text = format!(
        "Settlement date: {}\nVisaNet: {} transactions, {:.2}\nFAC: {} transactions, {}\nWindow: {}\nReport: {}\n",
        settlement.settlement_date,
        settlement.transaction_count,
        settlement.clearing_amount,
        count,
        total,
        window,
        settlement.fac_file_name.as_deref().unwrap_or("-"),
    );
    if !note.is_empty() {
        text.push_str(&format!("Adjustment: {}\n", note));
    }

    let mut html = format!(
        "<h3>{}</h3><table>\
         <tr><td>VisaNet</td><td>{}</td><td>{:.2}</td></tr>\
         <tr><td>FAC</td><td>{}</td><td>{}</td></tr>\
         </table><p>Window: {}</p>",
        escape_html(&subject),
        settlement.transaction_count,
        settlement.clearing_amount,
        count,
        total,
        window
    );
    if !note.is_empty() {
        html.push_str(&format!("<p>Adjustment: {}</p>", escape_html(&note)));
    }

    (subject, text, html)
}

/// SMTP notifier; each kind goes to its configured recipient list.
pub struct MailNotifier {
    config: SmtpConfig,
    recipients: NotifyConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl MailNotifier {
    pub fn new(config: SmtpConfig, recipients: NotifyConfig) -> Result<Self, NotifyError> {
        if !config.enabled {
            return Ok(Self {
                config,
                recipients,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            recipients,
            transport: Some(transport),
        })
    }

    fn recipients_for(&self, kind: NotificationKind) -> &[String] {
        match kind {
            NotificationKind::AcquirerReply => &self.recipients.acquirer_recipients,
            NotificationKind::InternalSummary => &self.recipients.internal_recipients,
        }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, kind: NotificationKind, settlement: &SettlementRecord) -> Result<(), NotifyError> {
        if !self.config.enabled {
            return Err(NotifyError::NotEnabled("SMTP notifier is not enabled".to_string()));
        }

        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| NotifyError::Configuration("SMTP transport not initialized".to_string()))?;

        let recipients = self.recipients_for(kind);
        if recipients.is_empty() {
            return Err(NotifyError::Configuration(format!(
                "No recipients configured for {}",
                kind.as_str()
            )));
        }

        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;

        let (subject, text, html) = render(kind, settlement);

        let mut builder = Message::builder().from(from_mailbox).subject(subject);
        for recipient in recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| NotifyError::Configuration(format!("Invalid recipient {}: {}", recipient, e)))?;
            builder = builder.to(to);
        }

        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )
            .map_err(|e| NotifyError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            kind = kind.as_str(),
            settlement_date = %settlement.settlement_date,
            recipients = recipients.len(),
            "Settlement notification sent"
        );
        Ok(())
    }
}

/// Logs instead of sending; used when SMTP is disabled.
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: NotificationKind, settlement: &SettlementRecord) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let (subject, _, _) = render(kind, settlement);
        tracing::info!(
            kind = kind.as_str(),
            settlement_date = %settlement.settlement_date,
            subject = %subject,
            "[LOG] Settlement notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSettlement, SettlementUpdate};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn completed() -> SettlementRecord {
        let mut record = SettlementRecord::new(&NewSettlement {
            settlement_date: NaiveDate::from_ymd_opt(2025, 5, 7).unwrap(),
            transaction_count: 3,
            clearing_amount: Decimal::new(4500, 2),
            source_file_name: "TT Acquirer Visa Files 07.05.2025.pdf".to_string(),
            source_email_id: None,
            source_attachment_id: None,
        });
        record.apply(
            &SettlementUpdate {
                fac_file_name: Some("fac_report_05_05_2025_05_06_2025".to_string()),
                fac_transaction_count: Some(3),
                fac_transaction_total: Some(Decimal::new(4500, 2)),
                adjustment_note: Some("excluded 1 transaction(s) near window boundary: X".to_string()),
                ..Default::default()
            },
            true,
        );
        record
    }

    #[test]
    fn render_includes_figures_and_note() {
        let (subject, text, html) = render(NotificationKind::InternalSummary, &completed());
        assert_eq!(subject, "Settlement completed for 2025-05-07");
        assert!(text.contains("VisaNet: 3 transactions, 45.00"));
        assert!(text.contains("FAC: 3 transactions, 45.00"));
        assert!(text.contains("Adjustment: excluded 1"));
        assert!(html.contains("<td>45.00</td>"));

        let (reply_subject, _, _) = render(NotificationKind::AcquirerReply, &completed());
        assert_eq!(reply_subject, "Re: TT Acquirer Visa Files 07.05.2025.pdf");
    }

    #[test]
    fn html_body_escapes_document_name_and_note() {
        let mut record = completed();
        record.source_file_name = "<script>alert(1)</script> & co.pdf".to_string();
        record.adjustment_note = Some("excluded <b>X</b>".to_string());

        let (subject, text, html) = render(NotificationKind::AcquirerReply, &record);

        assert_eq!(subject, "Re: <script>alert(1)</script> & co.pdf");
        assert!(text.contains("Adjustment: excluded <b>X</b>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<h3>Re: &lt;script&gt;alert(1)&lt;/script&gt; &amp; co.pdf</h3>"));
        assert!(html.contains("<p>Adjustment: excluded &lt;b&gt;X&lt;/b&gt;</p>"));
    }

    #[tokio::test]
    async fn disabled_mail_notifier_refuses() {
        let notifier = MailNotifier::new(
            SmtpConfig {
                host: "localhost".to_string(),
                port: 25,
                user: String::new(),
                password: String::new(),
                from_email: "noreply@example.com".to_string(),
                from_name: "Settlement Service".to_string(),
                enabled: false,
            },
            NotifyConfig {
                acquirer_recipients: vec![],
                internal_recipients: vec![],
            },
        )
        .unwrap();

        let result = notifier
            .notify(NotificationKind::AcquirerReply, &completed())
            .await;
        assert!(matches!(result, Err(NotifyError::NotEnabled(_))));
    }

    #[tokio::test]
    async fn log_notifier_counts() {
        let notifier = LogNotifier::new();
        notifier
            .notify(NotificationKind::InternalSummary, &completed())
            .await
            .unwrap();
        assert_eq!(notifier.sent_count(), 1);
    }
}
