//! Bounded retry, archive reuse and per-window exclusivity of report generation.

mod common;

use common::{at, date, init_tracing, tx, LedgerSource};
use settlement_service::matching::ReconciliationWindow;
use settlement_service::reports::{
    FacPortalClient, FacPortalConfig, FacReportGenerator, FacReportSource, ReportArchive,
    ReportError, RetryingReportGenerator,
};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> ReconciliationWindow {
    ReconciliationWindow::new(date(2025, 5, 5), date(2025, 5, 6)).unwrap()
}

fn generator(source: Arc<LedgerSource>, dir: &tempfile::TempDir) -> RetryingReportGenerator {
    RetryingReportGenerator::with_fixed_backoff(
        source,
        ReportArchive::new(dir.path()),
        3,
        Duration::from_secs(5),
    )
}

#[tokio::test(start_paused = true)]
async fn three_failures_surface_generation_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(LedgerSource::new(vec![]).failing_first(3));
    let started = tokio::time::Instant::now();

    let generator = generator(source.clone(), &dir);
    let err = generator.generate(&window()).await.unwrap_err();

    assert!(matches!(err, ReportError::Exhausted { attempts: 3, .. }));
    assert_eq!(source.call_count(), 3);
    // two fixed back-offs between three attempts
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(generator.in_flight(), 0);
    assert!(!ReportArchive::new(dir.path())
        .path_for(&window().report_file_name())
        .exists());
}

#[tokio::test(start_paused = true)]
async fn failure_then_success_records_two_attempts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        LedgerSource::new(vec![
            tx("A", at(2025, 5, 5, 10, 0), 1000),
            tx("B", at(2025, 5, 7, 10, 0), 2000),
        ])
        .failing_first(1),
    );

    let report = generator(source.clone(), &dir)
        .generate(&window())
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert!(!report.from_archive);
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.file_name, "fac_report_05_05_2025_05_06_2025");
    assert_eq!(source.call_count(), 2);
    assert!(dir.path().join("fac_report_05_05_2025_05_06_2025.csv").exists());
}

#[tokio::test]
async fn archived_report_is_reused_without_remote_call() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(LedgerSource::new(vec![tx("A", at(2025, 5, 5, 10, 0), 1000)]));
    let generator = generator(source.clone(), &dir);

    let first = generator.generate(&window()).await.unwrap();
    let second = generator.generate(&window()).await.unwrap();

    assert_eq!(source.call_count(), 1);
    assert!(second.from_archive);
    assert_eq!(second.attempts, 0);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.total(), first.total());
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_for_one_window_share_a_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        LedgerSource::new(vec![tx("A", at(2025, 5, 5, 10, 0), 1000)])
            .with_delay(Duration::from_secs(2)),
    );
    let generator = generator(source.clone(), &dir);

    let window = window();
    let (a, b) = tokio::join!(generator.generate(&window), generator.generate(&window));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(source.call_count(), 1);
    assert!(a.from_archive != b.from_archive);
    assert_eq!(generator.in_flight(), 0);
}

fn portal(server: &MockServer) -> FacPortalClient {
    FacPortalClient::new(FacPortalConfig {
        base_url: server.uri(),
        username: "ops".to_string(),
        password: SecretString::new("hunter2".to_string()),
        merchant_name: "ACME TRADING LTD".to_string(),
        currency_code: "780".to_string(),
        request_timeout: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn portal_logs_in_and_parses_export() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("txtUID=ops"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/reports/transactions/export"))
        .and(body_string_contains("start_date=05%2F05%2F2025"))
        .and(body_string_contains("status=Approved"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Transaction Report\nACME TRADING LTD\n\nDate Time,Order ID,Amount,Ccy\n\
             05/05/2025 10:00:00 AM,ORD-1,10.00,780\n\
             05/06/2025 05:30:00 AM,ORD-2,\"1,000.50\",780\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let rows = portal(&server).fetch(&window()).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].identifier, "ORD-1");
    assert_eq!(rows[1].amount.to_string(), "1000.50");
}

#[tokio::test]
async fn rejected_login_is_a_remote_error() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = portal(&server).fetch(&window()).await.unwrap_err();
    assert!(matches!(err, ReportError::Remote(_)));
}
