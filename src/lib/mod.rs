//! ## Jenkins Exporter
//!
//! Publishes the last completed build outcome of every job in a Jenkins
//! installation as Prometheus gauges.
//!
//! Two loops share a durable job catalogue: discovery periodically walks
//! the Jenkins folder tree and reconciles the observed job set into the
//! catalogue, while the collector fans out over the enabled jobs on
//! demand, whenever a scrape nudges it, and refreshes one gauge sample
//! per job. The HTTP surface serves the cached gauges and never waits on
//! Jenkins.
//!
//! The central component is the [`JenkinsExporter`] struct; its `start`
//! method boots the catalogue, launches both loops and the HTTP listener,
//! and supervises them until shutdown.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    collector::{BuildCollector, CollectorSettings},
    config::{resolve_secret, ExporterConfig},
    discovery::Discovery,
    error::ExporterErrorKind,
    jenkins::JenkinsClient,
    monitoring::{BuildMetrics, MonitoringServer},
    status::{State, Status, StatusSender},
    storage::Catalogue,
    task_manager::TaskManager,
};

pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jenkins;
pub mod logging;
pub mod monitoring;
pub mod status;
pub mod storage;
pub mod task_manager;
pub mod utils;

/// Seconds granted to background tasks between cancellation and abort.
const GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// The main struct that runs the exporter.
#[derive(Debug, Clone)]
pub struct JenkinsExporter {
    config: ExporterConfig,
    cancellation_token: CancellationToken,
}

impl JenkinsExporter {
    pub fn new(config: ExporterConfig) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Starts the exporter main loop.
    ///
    /// Returns an error for startup failures (catalogue, credentials,
    /// listener bind) and when a component dies mid-run; a clean
    /// interrupt-driven shutdown returns `Ok`.
    pub async fn start(&self) -> Result<(), ExporterErrorKind> {
        let cancellation_token = self.cancellation_token.clone();
        let task_manager = Arc::new(TaskManager::new());
        let (status_sender, status_receiver) = async_channel::unbounded();

        let catalogue = Catalogue::open(&self.config.collector.catalogue_path)?;

        let username = resolve_secret(&self.config.jenkins.username)?;
        let password = resolve_secret(&self.config.jenkins.password)?;

        info!(
            url = %self.config.jenkins.url,
            timeout_secs = self.config.jenkins.timeout.as_secs(),
            "Connecting to Jenkins"
        );
        let client = Arc::new(JenkinsClient::new(
            &self.config.jenkins.url,
            username,
            password,
            self.config.jenkins.timeout,
        )?);

        let metrics = Arc::new(BuildMetrics::new()?);

        let collector = Arc::new(BuildCollector::new(
            client.clone(),
            catalogue.clone(),
            metrics.clone(),
            CollectorSettings::new(
                self.config.collector.collector_min_gap,
                self.config.collector.worker_count,
                self.config.excluded_set(),
            ),
        ));

        let discovery = Discovery::new(
            client,
            catalogue,
            self.config.collector.discovery_interval,
            self.config.folder_filter(),
            self.config.excluded_set(),
        );

        // Claim the listen address before spawning anything: a bind
        // failure must fail startup, not surface as a late status message.
        let server = MonitoringServer::bind(
            self.config.listen_address(),
            self.config.web.path.clone(),
            metrics,
            collector.clone(),
        )
        .await?;

        {
            let token = cancellation_token.clone();
            task_manager.spawn(async move {
                discovery.run(token).await;
            });
        }

        {
            let token = cancellation_token.clone();
            let status = StatusSender::Collector(status_sender.clone());
            task_manager.spawn(async move {
                collector.run(token, status).await;
            });
        }

        {
            let token = cancellation_token.clone();
            let status = StatusSender::Web(status_sender);
            let shutdown_signal = async move {
                token.cancelled().await;
            };
            task_manager.spawn(async move {
                if let Err(e) = server.run(shutdown_signal).await {
                    let _ = status
                        .send(Status {
                            state: State::WebServerShutdown(e),
                        })
                        .await;
                }
            });
        }

        info!("Startup complete, waiting for shutdown signal...");
        let mut fatal: Option<ExporterErrorKind> = None;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received — initiating graceful shutdown...");
                    cancellation_token.cancel();
                    break;
                }
                message = status_receiver.recv() => {
                    match message {
                        Ok(status) => {
                            match status.state {
                                State::WebServerShutdown(e) => {
                                    error!("Metrics server failed: {e}");
                                    fatal = Some(e);
                                }
                                State::CollectorShutdown(e) => {
                                    error!("Build collector stopped unexpectedly: {e}");
                                    fatal = Some(e);
                                }
                            }
                            cancellation_token.cancel();
                            break;
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        warn!(
            "Graceful shutdown: waiting {} seconds for tasks to finish",
            GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS
        );
        match tokio::time::timeout(
            Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
            task_manager.join_all(),
        )
        .await
        {
            Ok(_) => info!("All tasks joined cleanly"),
            Err(_) => {
                warn!(
                    "Tasks did not finish within {} seconds, aborting",
                    GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS
                );
                task_manager.abort_all().await;
                task_manager.join_all().await;
                warn!("Forced shutdown complete");
            }
        }

        info!("Exporter shutdown complete");
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for JenkinsExporter {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
