use super::clock::{Clock, TokioClock};
use super::config::ProcessorConfig;
use super::fatal::FatalErrorHandler;
use super::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::health::HealthServer;
use crate::processor::dispatcher::Dispatcher;
use crate::processor::governor::{ConcurrencyGovernor, ConcurrencyPolicy};
use crate::processor::poll_loop::{PollLoop, PollLoopParams};
use crate::rpc::{JobClaimer, ProcessingClient, SettingsSource};
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the health listener and the poll loop task, and turns OS signals or
/// fatal background errors into an orderly stop.
pub struct Runner {
    config: ProcessorConfig,
    claimer: Arc<dyn JobClaimer>,
    policy: Arc<dyn ConcurrencyPolicy>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    fatal: FatalErrorHandler,
    health: Option<HealthServer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runner {
    /// Wires the HTTP client, concurrency governor, and telemetry from `config`.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        debug_assert!(
            config.validate().is_ok(),
            "ProcessorConfig should have been validated at construction time"
        );
        let client = Arc::new(
            ProcessingClient::from_config(&config).context("failed to build processing client")?,
        );
        let settings: Arc<dyn SettingsSource> = client.clone();
        let policy: Arc<dyn ConcurrencyPolicy> =
            Arc::new(ConcurrencyGovernor::from_config(&config, settings));
        Ok(Self::with_parts(config, client, policy, Arc::new(TokioClock)))
    }

    /// Builds a runner around caller-supplied seams.
    pub fn with_parts(
        config: ProcessorConfig,
        claimer: Arc<dyn JobClaimer>,
        policy: Arc<dyn ConcurrencyPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            config,
            claimer,
            policy,
            clock,
            telemetry: Arc::new(Telemetry::new()),
            fatal: FatalErrorHandler::new(shutdown.clone()),
            shutdown,
            health: None,
            tasks: Vec::new(),
        }
    }

    /// Returns a clone of the root shutdown token so callers can stop the
    /// runner from their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Address the health listener is bound to, once started.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health.as_ref().map(HealthServer::local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.health.is_some()
    }

    /// Binds the health listener, then spawns the metrics reporter and the
    /// poll loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut health = HealthServer::start(self.config.health_addr(), self.telemetry.clone())
            .await
            .context("failed to start health endpoint")?;
        if let Some(handle) = health.take_handle() {
            let watcher = self.watch_health(handle);
            self.tasks.push(watcher);
        }

        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            self.shutdown.clone(),
            self.config.liveness_interval(),
            self.config.report_interval(),
        );
        self.tasks.push(reporter);

        let dispatcher = Dispatcher::new(self.claimer.clone(), self.telemetry.clone());
        let poll_loop = PollLoop::new(PollLoopParams::from_config(
            &self.config,
            self.policy.clone(),
            dispatcher,
            self.clock.clone(),
        ));
        let poll_task = self.spawn_poll_loop(poll_loop);
        self.tasks.push(poll_task);

        tracing::info!(
            process_url = %self.config.process_url(),
            health = %health.url(),
            "resume importer started"
        );
        self.health = Some(health);
        Ok(())
    }

    fn spawn_poll_loop(&self, poll_loop: PollLoop) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let fatal = self.fatal.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(poll_loop.run(shutdown.clone()))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) if shutdown.is_cancelled() => {}
                Ok(Ok(())) => fatal.trigger("poll loop", anyhow!("poll loop exited unexpectedly")),
                Ok(Err(err)) => fatal.trigger("poll loop", err),
                Err(_) => fatal.trigger("poll loop", anyhow!("poll loop panicked")),
            }
        })
    }

    fn watch_health(&self, handle: JoinHandle<Result<()>>) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let fatal = self.fatal.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) if shutdown.is_cancelled() => {}
                Ok(Ok(())) => fatal.trigger(
                    "health endpoint",
                    anyhow!("health listener exited unexpectedly"),
                ),
                Ok(Err(err)) => fatal.trigger("health endpoint", err),
                Err(err) => fatal.trigger("health endpoint", err.into()),
            }
        })
    }

    /// Cancels the root token, stops the listener, and joins background tasks.
    /// Returns the first fatal error captured while running, if any.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(health) = self.health.take() {
            if let Err(err) = health.shutdown().await {
                tracing::warn!(error = %err, "health endpoint did not shut down cleanly");
            }
        }

        for handle in self.tasks.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "runner task terminated unexpectedly");
            }
        }

        let fatal_error = self.fatal.error();
        self.reinitialize_shutdown_token();

        match fatal_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.fatal = FatalErrorHandler::new(self.shutdown.clone());
    }

    /// Runs until Ctrl-C, SIGTERM, or a fatal background error. Signals stop
    /// the runner cleanly; a fatal error is returned to the caller.
    pub async fn run_until_signal(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C or SIGTERM to initiate shutdown");

        tokio::select! {
            signal = shutdown_signal() => {
                match signal {
                    Ok(()) => tracing::info!("shutdown signal received; stopping runner"),
                    Err(err) => {
                        tracing::warn!(
                            error = %format!("{err:#}"),
                            "failed to listen for shutdown signals; running until cancelled"
                        );
                        self.shutdown.cancelled().await;
                    }
                }
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        let result = self.stop().await;
        let snapshot = self.telemetry.snapshot();
        tracing::info!(
            processed = snapshot.total_jobs_processed,
            successful = snapshot.successful_jobs,
            failed = snapshot.failed_jobs,
            "resume importer stopped"
        );
        result
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}
