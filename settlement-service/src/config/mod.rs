use chrono::Weekday;
use secrecy::SecretString;
use service_core::config::{self as core_config, get_env, is_production, list_env, parse_env};
use service_core::error::AppError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub fac: FacConfig,
    pub visanet: VisaNetConfig,
    pub search: SearchConfig,
    pub smtp: SmtpConfig,
    pub notify: NotifyConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct FacConfig {
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
    pub merchant_name: String,
    pub currency_code: String,
    pub report_dir: String,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VisaNetConfig {
    pub document_dir: String,
    pub report_id: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub max_iterations: u32,
    pub anchor_weekday: Weekday,
    pub max_pool: usize,
    pub max_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub acquirer_recipients: Vec<String>,
    pub internal_recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_size: usize,
    pub concurrency: usize,
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_production();

        Ok(SettlementConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("settlement-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            fac: FacConfig {
                base_url: get_env("FAC_BASE_URL", Some("http://localhost:9090"), is_prod)?,
                username: get_env("FAC_USERNAME", Some(""), is_prod)?,
                password: SecretString::new(get_env("FAC_PASSWORD", Some(""), is_prod)?),
                merchant_name: get_env("FAC_MERCHANT_NAME", Some(""), false)?,
                currency_code: get_env("FAC_CURRENCY_CODE", Some("780"), false)?,
                report_dir: get_env("FAC_REPORT_DIR", Some("static/fac_reports"), false)?,
                max_attempts: parse_env("FAC_MAX_ATTEMPTS", 3)?,
                retry_backoff: Duration::from_secs(parse_env("FAC_RETRY_BACKOFF_SECS", 5)?),
                request_timeout: Duration::from_secs(parse_env("FAC_REQUEST_TIMEOUT_SECS", 120)?),
            },
            visanet: VisaNetConfig {
                document_dir: get_env("VISANET_DOCUMENT_DIR", Some("static/visanet"), false)?,
                report_id: get_env("VISANET_REPORT_ID", Some("VSS-120"), false)?,
                currency: get_env("VISANET_CURRENCY", Some("TTD"), false)?,
            },
            search: SearchConfig {
                max_iterations: parse_env("SEARCH_MAX_ITERATIONS", 6)?,
                anchor_weekday: parse_env("SEARCH_ANCHOR_WEEKDAY", Weekday::Tue)?,
                max_pool: parse_env("SEARCH_MAX_POOL", 40)?,
                max_nodes: parse_env("SEARCH_MAX_NODES", 200_000)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), false)?,
                port: parse_env("SMTP_PORT", 587)?,
                user: get_env("SMTP_USER", Some(""), false)?,
                password: get_env("SMTP_PASSWORD", Some(""), false)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@example.com"), false)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Settlement Service"), false)?,
                enabled: parse_env("SMTP_ENABLED", false)?,
            },
            notify: NotifyConfig {
                acquirer_recipients: list_env("NOTIFY_ACQUIRER_RECIPIENTS"),
                internal_recipients: list_env("NOTIFY_INTERNAL_RECIPIENTS"),
            },
            worker: WorkerConfig {
                queue_size: parse_env("WORKER_QUEUE_SIZE", 32)?,
                concurrency: parse_env("WORKER_CONCURRENCY", 4)?,
            },
        })
    }
}
