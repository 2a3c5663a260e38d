mod common;

use std::time::Duration;

use cmp_scrap::config::{FetchConfig, RetryPolicy, SourceMode};
use cmp_scrap::request::HttpFetcher;
use cmp_scrap::store::load_records;
use cmp_scrap::{CrawlConfig, Crawler, Fetch, FetchError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn fetches_page_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hola</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(&fast_fetch_config()).unwrap();
    let html = fetcher.fetch(&format!("{}/page", server.uri())).await.unwrap();
    assert_eq!(html, "<html>hola</html>");
}

#[tokio::test]
async fn server_errors_exhaust_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(&fast_fetch_config()).unwrap();
    let err = fetcher.fetch(&format!("{}/flaky", server.uri())).await.unwrap_err();
    match err {
        FetchError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::Status { status: 503, .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_page_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(&fast_fetch_config()).unwrap();
    let err = fetcher.fetch(&format!("{}/gone", server.uri())).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn refused_connection_is_retried_then_abandoned() {
    // Grab a free port and release it so nothing listens there.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let fetcher = HttpFetcher::new(&fast_fetch_config()).unwrap();

    let err = fetcher.fetch(&format!("http://127.0.0.1:{port}/x")).await.unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn crawls_over_http() {
    let server = MockServer::start().await;
    let pages = [
        ("/conoce/lista-especialidad.php", landing(&[("00001", "DERMATOLOGÍA")])),
        (
            "/conoce/lista-medicos-especialidad.php",
            listing("DERMATOLOGÍA", &[("11", "A", "B", "ONCE"), ("12", "C", "D", "DOCE")]),
        ),
    ];
    for (route, body) in pages {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
    }
    // Both detail links share a path; the doctor is picked by query string.
    Mock::given(method("GET"))
        .and(path("/conoce/datos-colegiado.php"))
        .and(wiremock::matchers::query_param("id", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail("11", "ONCE", "HÁBIL", &["DERMATOLOGÍA"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conoce/datos-colegiado.php"))
        .and(wiremock::matchers::query_param("id", "12"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail("12", "DOCE", "FALLECIDO", &[])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = CrawlConfig::new(&format!("{}/conoce/", server.uri())).unwrap();
    config.delay = Duration::ZERO;
    config.workers = 2;
    config.fetch = fast_fetch_config();
    config.store = store_config(dir.path(), 10);

    let summary = Crawler::from_config(config.clone()).unwrap().run().await.unwrap();

    assert_eq!(summary.collected, 1);
    assert_eq!(summary.deceased, 1);
    let records = load_records(&config.store).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].license_number, "11");
    assert_eq!(records[0].photo_url, "fotos/11.jpg");
}

#[tokio::test]
async fn crawls_saved_pages_from_disk() {
    let pages = tempfile::tempdir().unwrap();
    std::fs::write(pages.path().join("cmp.html"), landing(&[("00004", "NEUMOLOGÍA")])).unwrap();
    std::fs::write(
        pages.path().join("lista-medicos-especialidad.php"),
        listing("NEUMOLOGÍA", &[("40", "QUISPE", "CONDORI", "ROSA")]),
    )
    .unwrap();
    std::fs::write(
        pages.path().join("datos-colegiado.php"),
        detail("40", "ROSA", "HÁBIL", &["NEUMOLOGÍA"]),
    )
    .unwrap();

    let out = tempfile::tempdir().unwrap();
    let mut config = CrawlConfig::new(BASE).unwrap();
    config.mode = SourceMode::Local {
        root: pages.path().to_path_buf(),
    };
    config.workers = 8;
    config.store = store_config(out.path(), 30);

    let summary = Crawler::from_config(config.clone()).unwrap().run().await.unwrap();

    assert_eq!(summary.collected, 1);
    let records = load_records(&config.store).await;
    assert_eq!(records[0].first_names, "ROSA");
    assert_eq!(records[0].registrations[0].specialty_label, "NEUMOLOGÍA");
}
