use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{config_builder, init_tracing, wait_for_attempts, wait_until},
    mock_endpoint::{MockEndpoint, MockReply},
};
use anyhow::Result;
use resume_importer::{
    ConcurrencyGovernor, Dispatcher, ProcessingClient, ProcessorConfig, Runner, SettingsSource,
};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_queue_is_polled_without_errors() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::no_work()]).await?;
    let config = config_builder(server.url()).concurrency_override(3).build()?;

    let mut runner = Runner::new(config)?;
    runner.start().await?;
    let telemetry = runner.telemetry();
    wait_for_attempts(&telemetry, 15, Duration::from_secs(10)).await?;
    runner.stop().await?;

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.successful_jobs, 0);
    assert_eq!(snapshot.failed_jobs, 0);
    assert_eq!(snapshot.consecutive_errors, 0);
    assert_eq!(snapshot.empty_polls, snapshot.total_jobs_processed);
    assert!(snapshot.last_job_time.is_none());
    assert!(snapshot.last_poll_time.is_some());

    let keys = server.state().api_keys();
    assert!(!keys.is_empty());
    assert!(keys
        .iter()
        .all(|key| key.as_deref() == Some("integration-key")));
    // The override short-circuits the remote lookup.
    assert_eq!(server.state().settings_calls(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn error_replies_count_as_failures() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![
        MockReply::server_error(),
        MockReply::html_login_page(),
    ])
    .await?;
    let config = config_builder(server.url()).concurrency_override(2).build()?;

    let mut runner = Runner::new(config)?;
    runner.start().await?;
    let telemetry = runner.telemetry();
    wait_for_attempts(&telemetry, 6, Duration::from_secs(10)).await?;
    runner.stop().await?;

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.successful_jobs, 0);
    assert_eq!(snapshot.empty_polls, 0);
    assert_eq!(snapshot.failed_jobs, snapshot.total_jobs_processed);
    assert_eq!(snapshot.total_errors, snapshot.failed_jobs);
    assert!(snapshot.max_consecutive_errors >= 6);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn success_after_failures_resets_consecutive_errors() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::server_error()]).await?;
    let config = config_builder(server.url()).concurrency_override(1).build()?;

    let mut runner = Runner::new(config)?;
    runner.start().await?;
    let telemetry = runner.telemetry();
    wait_until("three failures", Duration::from_secs(10), || {
        telemetry.consecutive_errors() >= 3
    })
    .await?;

    server.state().set_script(vec![MockReply::processed("job-42")]);
    wait_until("a processed job", Duration::from_secs(10), || {
        telemetry.snapshot().successful_jobs >= 1
    })
    .await?;
    runner.stop().await?;

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.consecutive_errors, 0);
    assert!(snapshot.max_consecutive_errors >= 3);
    assert!(snapshot.last_job_time.is_some());

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_setting_bounds_in_flight_calls() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(vec![MockReply::no_work()]).await?;
    server.state().set_settings(json!([
        { "key": "theme", "value": "dark" },
        { "key": "max_concurrent_processors", "value": "4" }
    ]));
    server.state().set_reply_delay(Duration::from_millis(150));

    let config = config_builder(server.url()).build()?;
    let client = Arc::new(ProcessingClient::from_config(&config)?);
    let governor =
        ConcurrencyGovernor::from_config(&config, client.clone() as Arc<dyn SettingsSource>);
    let resolved = governor.resolve().await;
    assert_eq!(resolved.limit, 4);

    let telemetry = Arc::new(resume_importer::Telemetry::new());
    let dispatcher = Dispatcher::new(client, telemetry.clone());
    let report = dispatcher.dispatch_cycle(resolved.limit).await?;

    assert_eq!(report.no_work, 4);
    assert_eq!(server.state().process_calls(), 4);
    assert_eq!(server.state().peak_in_flight(), 4);
    assert_eq!(server.state().settings_calls(), 1);
    assert_eq!(telemetry.total_jobs_processed(), 4);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_endpoint_is_a_per_call_failure() -> Result<()> {
    init_tracing();
    let server = MockEndpoint::start(Vec::new()).await?;
    let url = server.url().to_owned();
    server.shutdown().await;

    let config: ProcessorConfig = config_builder(&url)
        .concurrency_override(2)
        .request_timeout(Duration::from_secs(1))
        .build()?;
    let client = Arc::new(ProcessingClient::from_config(&config)?);
    let telemetry = Arc::new(resume_importer::Telemetry::new());
    let report = Dispatcher::new(client, telemetry.clone())
        .dispatch_cycle(2)
        .await?;

    assert_eq!(report.failed, 2);
    assert_eq!(telemetry.snapshot().total_errors, 2);
    Ok(())
}
