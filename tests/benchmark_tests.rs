use std::{sync::Arc, time::Duration};

use http::Uri;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hbench::benchmark;
use hbench::config::Config;
use hbench::connection::Connector;
use hbench::context::RunContext;
use hbench::probe::detect_host;
use hbench::request::RequestTemplate;
use hbench::stats::{Stats, StopReason};

fn context(url: &str, configure: impl FnOnce(&mut Config)) -> Arc<RunContext> {
    let mut config = Config::new(url.parse::<Uri>().unwrap()).unwrap();
    config.threads = 2;
    configure(&mut config);
    config.validate().expect("test config should be valid");
    Arc::new(RunContext::new(config))
}

async fn run(ctx: &Arc<RunContext>, interrupt: flume::Receiver<()>) -> Stats {
    let template = RequestTemplate::new(ctx.config()).unwrap();
    let connector = detect_host(ctx, &template)
        .await
        .expect("probe should succeed");
    tokio::time::timeout(
        Duration::from_secs(20),
        benchmark::start(ctx.clone(), connector, template, interrupt),
    )
    .await
    .expect("benchmark should not deadlock")
    .expect("benchmark should report stats")
}

async fn hello_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "wiremock")
                .set_body_string("hello"),
        )
        .mount(&server)
        .await;
    server
}

// --- host probe ---

#[tokio::test]
async fn probe_records_server_and_content_size() {
    let server = hello_server().await;
    let ctx = context(&server.uri(), |_| {});
    let template = RequestTemplate::new(ctx.config()).unwrap();

    assert_eq!(ctx.server(), None);
    let connector = detect_host(&ctx, &template).await.unwrap();

    assert_eq!(&connector.addr(), server.address());
    assert!(!connector.is_tls());
    assert_eq!(ctx.server().as_deref(), Some("wiremock"));
    assert_eq!(ctx.content_size(), Some(5));
}

#[tokio::test]
async fn probe_fails_without_a_server() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let ctx = context(&format!("http://{}/", addr), |_| {});
    let template = RequestTemplate::new(ctx.config()).unwrap();

    assert!(detect_host(&ctx, &template).await.is_err());
    assert_eq!(ctx.content_size(), None);
}

#[tokio::test]
async fn probe_budget_covers_name_resolution() {
    let ctx = context("http://hbench-unresolvable.invalid/", |c| {
        c.execution_timeout = Duration::from_millis(500)
    });
    let template = RequestTemplate::new(ctx.config()).unwrap();

    let started = tokio::time::Instant::now();
    assert!(detect_host(&ctx, &template).await.is_err());
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "probe took {:?}",
        started.elapsed()
    );
    assert_eq!(ctx.content_size(), None);
}

// --- complete runs ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_request_is_recorded_once() {
    for (requests, concurrency) in [(1, 1), (10, 1), (10, 10), (57, 8), (200, 16)] {
        let server = hello_server().await;
        let ctx = context(&server.uri(), |c| {
            c.requests = requests;
            c.concurrency = concurrency;
        });
        let (_interrupt_tx, interrupt) = flume::bounded(1);

        let stats = run(&ctx, interrupt).await;

        assert_eq!(stats.total_requests, requests, "n={} c={}", requests, concurrency);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.latencies.len(), requests);
        assert_eq!(stats.total_received, 5 * requests as u64);
        assert_eq!(stats.stop_reason, Some(StopReason::Completed));
        assert!(ctx.stop().is_stopped());

        // the probe plus one request per job
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), requests + 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keep_alive_run_completes() {
    let server = hello_server().await;
    let ctx = context(&server.uri(), |c| {
        c.requests = 50;
        c.concurrency = 5;
        c.keep_alive = true;
    });
    let (_interrupt_tx, interrupt) = flume::bounded(1);

    let stats = run(&ctx, interrupt).await;

    assert_eq!(stats.total_requests, 50);
    assert_eq!(stats.total_failed, 0);
    assert!(stats.summary(5).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_error_halts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let ctx = context(&server.uri(), |c| {
        c.requests = 100;
        c.concurrency = 10;
    });
    // skip the probe so the single 500 lands on a benchmark request
    ctx.set_content_size(5);
    let template = RequestTemplate::new(ctx.config()).unwrap();
    let (_interrupt_tx, interrupt) = flume::bounded(1);

    let stats = tokio::time::timeout(
        Duration::from_secs(20),
        benchmark::start(
            ctx.clone(),
            Connector::plain(*server.address()),
            template,
            interrupt,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(stats.total_requests < 100, "got {}", stats.total_requests);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.failures.response, 1);
    assert_eq!(stats.stop_reason, Some(StopReason::Failure));
    assert!(!ctx.stop().stop(), "stop must already have fired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn continue_on_error_runs_to_completion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let ctx = context(&server.uri(), |c| {
        c.requests = 20;
        c.concurrency = 4;
        c.continue_on_error = true;
    });
    let (_interrupt_tx, interrupt) = flume::bounded(1);

    let stats = run(&ctx, interrupt).await;

    assert_eq!(stats.total_requests, 20);
    assert_eq!(stats.total_failed, 20);
    assert_eq!(stats.failures.response, 20);
    assert!(stats.latencies.is_empty());
    assert!(stats.summary(4).is_none());
    assert_eq!(stats.stop_reason, Some(StopReason::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_is_recorded_without_deadlock() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("hello")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let ctx = context(&server.uri(), |c| {
        c.execution_timeout = Duration::from_millis(100);
    });
    ctx.set_content_size(5);
    let template = RequestTemplate::new(ctx.config()).unwrap();
    let (_interrupt_tx, interrupt) = flume::bounded(1);

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        benchmark::start(
            ctx.clone(),
            Connector::plain(*server.address()),
            template,
            interrupt,
        ),
    )
    .await
    .expect("shutdown should not deadlock")
    .unwrap();

    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failures.timeout, 1);
    assert_eq!(stats.stop_reason, Some(StopReason::Failure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn time_limit_ends_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("hello")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let ctx = context(&server.uri(), |c| {
        c.requests = 50_000;
        c.concurrency = 4;
        c.time_limit = Some(Duration::from_millis(300));
    });
    let (_interrupt_tx, interrupt) = flume::bounded(1);

    let stats = run(&ctx, interrupt).await;

    assert!(stats.total_requests < 50_000);
    assert_eq!(stats.stop_reason, Some(StopReason::TimeLimit));
    assert!(stats.total_execution_time >= Duration::from_millis(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupt_ends_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("hello")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let ctx = context(&server.uri(), |c| {
        c.requests = 10_000;
        c.concurrency = 2;
    });
    let (interrupt_tx, interrupt) = flume::bounded(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = interrupt_tx.send_async(()).await;
    });

    let stats = run(&ctx, interrupt).await;

    assert!(stats.total_requests < 10_000);
    assert_eq!(stats.stop_reason, Some(StopReason::Interrupted));
}
