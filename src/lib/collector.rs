//! On-demand build result collection.
//!
//! The collector never runs on a timer. Each metrics scrape nudges a
//! single-slot trigger channel; a long-lived worker loop consumes it and
//! runs one collection cycle, fanning the enabled jobs out over a bounded
//! pool of workers. Triggers arriving while a cycle is in flight coalesce
//! into at most one follow-up run, and a minimum gap between cycles keeps
//! a burst of scrapes from turning into a burst of Jenkins traffic.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ExporterErrorKind,
    jenkins::JenkinsClient,
    monitoring::metrics::BuildMetrics,
    status::{State, Status, StatusSender},
    storage::{Catalogue, JobRecord},
    utils::top_level_segment,
};

/// Tunables for the collection pipeline.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Minimum gap between two collection cycles.
    pub min_gap: Duration,
    /// Number of concurrent workers fetching build results.
    pub worker_count: usize,
    /// How long to wait at startup for discovery to populate the catalogue.
    pub bootstrap_timeout: Duration,
    /// Poll interval while waiting for the catalogue.
    pub bootstrap_poll: Duration,
    /// Top-level folders whose jobs are skipped and whose samples are
    /// evicted every cycle.
    pub excluded_folders: HashSet<String>,
}

impl CollectorSettings {
    pub fn new(min_gap: Duration, worker_count: usize, excluded_folders: HashSet<String>) -> Self {
        Self {
            min_gap,
            worker_count,
            bootstrap_timeout: Duration::from_secs(300),
            bootstrap_poll: Duration::from_secs(5),
            excluded_folders,
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    collecting: bool,
    last_collect: Option<Instant>,
}

/// Outcome of processing one job in a cycle.
#[derive(Debug)]
enum JobOutcome {
    /// The build number advanced past the stored cursor.
    Updated(i64),
    /// Same build as before; the sample was refreshed anyway.
    Unchanged(i64),
    /// The job has never completed a build.
    NoBuild,
    /// Folder/auth confusion or a vanished job; nothing recorded.
    Skipped,
}

#[derive(Debug, Default)]
struct CycleSummary {
    processed: usize,
    updated: usize,
    unchanged: usize,
    no_build: usize,
    skipped: usize,
    errors: usize,
}

/// Maintains one up-to-date gauge sample per enabled, non-excluded job.
pub struct BuildCollector {
    client: Arc<JenkinsClient>,
    catalogue: Catalogue,
    metrics: Arc<BuildMetrics>,
    settings: CollectorSettings,
    trigger_tx: async_channel::Sender<()>,
    trigger_rx: async_channel::Receiver<()>,
    gate: Mutex<Gate>,
}

impl BuildCollector {
    pub fn new(
        client: Arc<JenkinsClient>,
        catalogue: Catalogue,
        metrics: Arc<BuildMetrics>,
        settings: CollectorSettings,
    ) -> Self {
        // Single slot: concurrent scrapes coalesce into one pending run.
        let (trigger_tx, trigger_rx) = async_channel::bounded(1);

        Self {
            client,
            catalogue,
            metrics,
            settings,
            trigger_tx,
            trigger_rx,
            gate: Mutex::new(Gate::default()),
        }
    }

    /// Request a collection run without blocking.
    ///
    /// Called from the scrape handler. Dropped when a cycle finished less
    /// than the minimum gap ago, or when a trigger is already pending.
    pub fn trigger(&self) {
        {
            let gate = self.gate.lock().expect("collector gate lock poisoned");
            if let Some(last) = gate.last_collect {
                if last.elapsed() < self.settings.min_gap {
                    debug!(
                        elapsed_ms = last.elapsed().as_millis() as u64,
                        "Trigger dropped, previous cycle finished too recently"
                    );
                    return;
                }
            }
        }

        match self.trigger_tx.try_send(()) {
            Ok(()) => debug!("Collection triggered"),
            Err(async_channel::TrySendError::Full(())) => {
                debug!("Trigger slot already occupied, coalescing")
            }
            Err(async_channel::TrySendError::Closed(())) => {
                warn!("Collection trigger channel closed")
            }
        }
    }

    /// Consume triggers until cancellation.
    ///
    /// Waits for the catalogue to be populated first, so that the earliest
    /// scrapes after a fresh start do not race an empty job set.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken, status: StatusSender) {
        info!("Starting build collector (scrape-triggered, on demand)");

        if !self.wait_for_catalogue(&cancel).await && cancel.is_cancelled() {
            info!("Build collector stopped");
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Build collector stopped");
                    break;
                }
                received = self.trigger_rx.recv() => match received {
                    Ok(()) => {
                        debug!("Collection trigger received");
                        match self.collect_once(&cancel).await {
                            Ok(()) => {}
                            Err(e) if e.is_cancelled() => {
                                info!("Build collector stopped");
                                break;
                            }
                            Err(e) => warn!(error = %e, "Collection cycle failed"),
                        }
                    }
                    Err(_) => {
                        let kind = ExporterErrorKind::Custom(
                            "collection trigger channel closed".to_string(),
                        );
                        let _ = status
                            .send(Status {
                                state: State::CollectorShutdown(kind),
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }

    /// Run one collection cycle unless another is already in flight.
    pub async fn collect_once(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<(), ExporterErrorKind> {
        {
            let mut gate = self.gate.lock().expect("collector gate lock poisoned");
            if gate.collecting {
                debug!("Collection already in progress, skipping");
                return Ok(());
            }
            gate.collecting = true;
        }

        let result = self.collect_cycle(cancel).await;

        {
            let mut gate = self.gate.lock().expect("collector gate lock poisoned");
            gate.collecting = false;
            gate.last_collect = Some(Instant::now());
        }

        result
    }

    async fn wait_for_catalogue(&self, cancel: &CancellationToken) -> bool {
        info!(
            timeout_secs = self.settings.bootstrap_timeout.as_secs(),
            "Waiting for discovery to populate the catalogue"
        );

        let started = Instant::now();
        let deadline = started + self.settings.bootstrap_timeout;
        let mut polls: u32 = 0;

        loop {
            match self.catalogue.list_enabled_jobs() {
                Ok(jobs) if !jobs.is_empty() => {
                    info!(
                        jobs = jobs.len(),
                        waited_secs = started.elapsed().as_secs(),
                        "Catalogue populated"
                    );
                    return true;
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Catalogue not readable yet"),
            }

            if Instant::now() >= deadline {
                warn!(
                    waited_secs = started.elapsed().as_secs(),
                    "Proceeding although discovery has not completed a sync; \
                     check the discovery logs and the Jenkins connection"
                );
                return false;
            }

            polls += 1;
            if polls % 6 == 0 {
                info!(
                    waited_secs = started.elapsed().as_secs(),
                    "Still waiting for the first discovery sync"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.bootstrap_poll) => {}
            }
        }
    }

    async fn collect_cycle(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<(), ExporterErrorKind> {
        let jobs = self.catalogue.list_enabled_jobs()?;

        // Evict samples under excluded folders before anything else; the
        // catalogue is not trusted to be clean, and samples may predate
        // the exclusion.
        let excluded_set = &self.settings.excluded_folders;
        let mut evicted = 0;
        if !excluded_set.is_empty() {
            evicted = self
                .metrics
                .evict_where(|path| excluded_set.contains(top_level_segment(path)));
            if evicted > 0 {
                info!(evicted, "Evicted samples under excluded folders");
            }
        }

        let (jobs, excluded): (Vec<JobRecord>, Vec<JobRecord>) = jobs
            .into_iter()
            .partition(|job| !excluded_set.contains(top_level_segment(&job.job_path)));
        let excluded_count = excluded.len();
        let total = jobs.len();

        if total == 0 {
            info!(
                excluded = excluded_count,
                "No enabled jobs to collect; waiting for discovery"
            );
            return Ok(());
        }

        info!(total, "Starting collection cycle");

        let (job_tx, job_rx) = async_channel::bounded(total);
        let (result_tx, result_rx) = async_channel::bounded(total);
        for job in jobs {
            // Channel is sized for the full batch.
            let _ = job_tx.try_send(job);
        }
        drop(job_tx);

        let workers = self.settings.worker_count.min(total).max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let this = Arc::clone(self);
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                while let Ok(job) = job_rx.recv().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = this.process_job(&job, &cancel).await;
                    if result_tx.send((job, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);
        drop(job_rx);

        let mut summary = CycleSummary::default();
        let mut cancelled = false;

        while let Ok((job, outcome)) = result_rx.recv().await {
            match outcome {
                Ok(JobOutcome::Updated(build)) => {
                    summary.processed += 1;
                    summary.updated += 1;
                    debug!(
                        job_path = %job.job_path,
                        build,
                        previous = job.last_seen_build,
                        "Build advanced"
                    );
                }
                Ok(JobOutcome::Unchanged(build)) => {
                    summary.processed += 1;
                    summary.unchanged += 1;
                    debug!(job_path = %job.job_path, build, "Build unchanged");
                }
                Ok(JobOutcome::NoBuild) => {
                    summary.processed += 1;
                    summary.no_build += 1;
                    debug!(job_path = %job.job_path, "Job has no completed build");
                }
                Ok(JobOutcome::Skipped) => summary.skipped += 1,
                Err(e) if e.is_cancelled() => {
                    debug!("Collection cancelled, discarding remaining work");
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(job_path = %job.job_path, error = %e, "Failed to process job");
                }
            }

            if summary.processed > 0 && summary.processed % 10 == 0 {
                debug!(processed = summary.processed, total, "Collection progress");
            }
        }

        drop(result_rx);
        for handle in handles {
            let _ = handle.await;
        }

        if cancelled {
            return Err(ExporterErrorKind::Cancelled);
        }

        info!(
            total,
            processed = summary.processed,
            updated = summary.updated,
            unchanged = summary.unchanged,
            no_build = summary.no_build,
            skipped = summary.skipped,
            errors = summary.errors,
            excluded = excluded_count,
            evicted_samples = evicted,
            "Collection cycle finished"
        );

        Ok(())
    }

    /// Fetch one job's last completed build and refresh its gauge sample.
    async fn process_job(
        &self,
        job: &JobRecord,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, ExporterErrorKind> {
        let last = match self
            .client
            .get_last_completed_build(&job.job_path, cancel)
            .await
        {
            Ok(last) => last,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if e.is_folder_like() => {
                debug!(
                    job_path = %job.job_path,
                    error = %e,
                    "Skipping job that does not answer like a job; discovery owns its lifecycle"
                );
                return Ok(JobOutcome::Skipped);
            }
            Err(e) if e.is_not_found() => {
                debug!(job_path = %job.job_path, "Job vanished from Jenkins, dropping its sample");
                self.metrics.remove_sample(&job.job_path);
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let Some((build_ref, base)) = last else {
            self.metrics
                .replace_sample(&job.job_path, "", "", "not_built");
            return Ok(JobOutcome::NoBuild);
        };

        let snapshot = match self.client.get_build_details(&build_ref, cancel).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(
                    job_path = %job.job_path,
                    error = %e,
                    "Failed to fetch build details, continuing without parameters"
                );
                base
            }
        };

        let status = decode_status(&snapshot.result, snapshot.building);
        let commit = first_parameter(&snapshot.parameters, &["check_commitID", "GIT_COMMIT"]);
        let branch = first_parameter(&snapshot.parameters, &["gitBranch", "GIT_BRANCH"]);

        // Unconditional: the sample reflects the current state even when
        // the build number did not move.
        self.metrics
            .replace_sample(&job.job_path, commit, branch, status);

        if build_ref.number > job.last_seen_build {
            self.catalogue
                .update_last_seen(&job.job_path, build_ref.number)?;
            Ok(JobOutcome::Updated(build_ref.number))
        } else {
            Ok(JobOutcome::Unchanged(build_ref.number))
        }
    }
}

/// Map a build's `(result, building)` pair onto the exported status label.
///
/// Total: every input maps to exactly one of the seven labels. `queued` is
/// reserved and never produced here; a last *completed* build cannot be
/// queued.
pub fn decode_status(result: &str, building: bool) -> &'static str {
    if building {
        return "in_progress";
    }

    match result {
        "SUCCESS" => "success",
        "FAILURE" => "failure",
        "ABORTED" => "aborted",
        "UNSTABLE" => "unstable",
        "" => "not_built",
        _ => "unknown",
    }
}

/// First non-empty value among the named parameters.
fn first_parameter<'a>(parameters: &'a HashMap<String, String>, names: &[&str]) -> &'a str {
    names
        .iter()
        .filter_map(|name| parameters.get(*name))
        .map(String::as_str)
        .find(|value| !value.is_empty())
        .unwrap_or("")
}
