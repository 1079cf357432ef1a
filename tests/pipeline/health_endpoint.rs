use std::time::Duration;

use crate::support::{
    helpers::{config_builder, get_json, init_tracing, wait_for_attempts},
    mock_endpoint::{MockEndpoint, MockReply},
};
use anyhow::{Context, Result};
use resume_importer::Runner;
use reqwest::{Method, StatusCode};

async fn started_runner(server: &MockEndpoint, concurrency: usize) -> Result<(Runner, String)> {
    let config = config_builder(server.url())
        .concurrency_override(concurrency)
        .build()?;
    let mut runner = Runner::new(config)?;
    runner.start().await?;
    let addr = runner.health_addr().context("health endpoint bound")?;
    Ok((runner, format!("http://{addr}")))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_json_reflects_processed_jobs() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::processed("job-1"), MockReply::no_work()])
        .await?;
    let (mut runner, base) = started_runner(&server, 2).await?;
    wait_for_attempts(&runner.telemetry(), 4, Duration::from_secs(10)).await?;

    let json = get_json(&format!("{base}/health")).await?;
    let stats = &json["stats"];
    let total = stats["totalJobsProcessed"].as_u64().context("total")?;
    let successful = stats["successfulJobs"].as_u64().context("successful")?;
    let failed = stats["failedJobs"].as_u64().context("failed")?;
    let empty = stats["emptyPolls"].as_u64().context("empty polls")?;

    assert!(total >= 4);
    assert!(successful >= 1);
    assert_eq!(failed, 0);
    // Counters come from one snapshot even while the loop keeps polling.
    assert_eq!(total, successful + failed + empty);
    assert_eq!(json["status"], "ok");
    assert!(json["uptimeSeconds"].is_u64());
    assert!(stats["lastJobTime"].is_string());
    assert!(stats["averageLatencyMs"].is_number());
    assert!(stats["startTime"].is_string());

    runner.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_degraded_while_failing() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::server_error()]).await?;
    let (mut runner, base) = started_runner(&server, 1).await?;
    wait_for_attempts(&runner.telemetry(), 2, Duration::from_secs(10)).await?;

    let json = get_json(&format!("{base}/health")).await?;
    assert_eq!(json["status"], "degraded");
    assert!(json["stats"]["consecutiveErrors"].as_u64().unwrap_or(0) >= 2);

    runner.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_page_preflight_and_unknown_routes() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::no_work()]).await?;
    let (mut runner, base) = started_runner(&server, 1).await?;
    let client = reqwest::Client::new();

    let page = client.get(format!("{base}/")).send().await?;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/html"));
    assert!(page.text().await?.contains("Resume importer"));

    let preflight = client
        .request(Method::OPTIONS, format!("{base}/health"))
        .send()
        .await?;
    assert_eq!(preflight.status(), StatusCode::OK);
    assert_eq!(
        preflight.headers()["access-control-allow-origin"],
        "*"
    );
    assert_eq!(
        preflight.headers()["access-control-allow-methods"],
        "GET, OPTIONS"
    );

    let missing = client.get(format!("{base}/jobs")).send().await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.text().await?, "Not Found");

    runner.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_listener_stops_with_runner() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::no_work()]).await?;
    let (mut runner, base) = started_runner(&server, 1).await?;
    get_json(&format!("{base}/health")).await?;

    runner.stop().await?;
    assert!(runner.health_addr().is_none());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    assert!(client.get(format!("{base}/health")).send().await.is_err());

    server.shutdown().await;
    Ok(())
}
