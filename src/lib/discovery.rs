//! Periodic job discovery.
//!
//! One long-lived task reconciles the set of buildable jobs visible in
//! Jenkins into the catalogue: an immediate sync at startup, then a fixed
//! ticker. A failed listing never stops the loop; the next tick retries.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ExporterErrorKind,
    jenkins::{DiscoveredJob, JenkinsClient},
    storage::{Catalogue, SyncCounts},
    utils::{canonicalize_job_path, top_level_segment},
};

/// The discovery loop and its settings.
pub struct Discovery {
    client: Arc<JenkinsClient>,
    catalogue: Catalogue,
    interval: Duration,
    folders: Vec<String>,
    excluded_folders: HashSet<String>,
}

impl Discovery {
    pub fn new(
        client: Arc<JenkinsClient>,
        catalogue: Catalogue,
        interval: Duration,
        folders: Vec<String>,
        excluded_folders: HashSet<String>,
    ) -> Self {
        Self {
            client,
            catalogue,
            interval,
            folders,
            excluded_folders,
        }
    }

    /// Run until cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            folders = ?self.folders,
            "Starting job discovery"
        );

        // Immediate first sync; the collector's bootstrap waits on it.
        match self.sync_once(&cancel).await {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => {
                info!("Job discovery stopped");
                return;
            }
            Err(e) => warn!(error = %e, "First discovery sync failed, retrying next cycle"),
        }

        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately and the initial sync
        // already ran; consume it so the next one lands a full interval out.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Job discovery stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sync_once(&cancel).await {
                        Ok(_) => {}
                        Err(e) if e.is_cancelled() => {
                            info!("Job discovery stopped");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Discovery sync failed, retrying next cycle"),
                    }
                }
            }
        }
    }

    /// One reconciliation pass: list, filter, canonicalize, sync.
    pub async fn sync_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncCounts, ExporterErrorKind> {
        debug!("Starting discovery sync");

        let (nodes, first_err) = self
            .client
            .list_all_jobs_recursive(&self.folders, cancel)
            .await;

        if let Some(e) = first_err {
            if e.is_cancelled() || nodes.is_empty() {
                return Err(e);
            }
            // Partial results are applied: a single broken folder must not
            // soft-delete every job it did not hide.
            warn!(error = %e, jobs = nodes.len(), "Partial listing failure, applying collected jobs");
        }

        let observed_count = nodes.len();
        let (observed, filtered) = prepare_observed(nodes, &self.excluded_folders);

        let counts = self.catalogue.sync_jobs(&observed)?;

        info!(
            observed = observed_count,
            added = counts.added,
            deleted = counts.deleted,
            touched = counts.touched,
            filtered_folders = filtered.folders,
            filtered_excluded = filtered.excluded,
            "Discovery sync finished"
        );

        Ok(counts)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FilterCounts {
    folders: usize,
    excluded: usize,
}

/// Post-filter the traversal output: drop folder-typed nodes that slipped
/// through, drop excluded top-level segments, canonicalize and dedupe.
fn prepare_observed(
    nodes: Vec<DiscoveredJob>,
    excluded: &HashSet<String>,
) -> (HashSet<String>, FilterCounts) {
    let mut observed = HashSet::new();
    let mut counts = FilterCounts::default();

    for node in nodes {
        if node.is_folder {
            counts.folders += 1;
            continue;
        }

        let Some(path) = canonicalize_job_path(&node.full_path) else {
            continue;
        };

        if excluded.contains(top_level_segment(&path)) {
            counts.excluded += 1;
            continue;
        }

        observed.insert(path);
    }

    (observed, counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(path: &str) -> DiscoveredJob {
        DiscoveredJob {
            full_path: path.to_string(),
            is_folder: false,
        }
    }

    #[test]
    fn folder_nodes_are_dropped_belt_and_braces() {
        let nodes = vec![
            job("release/api"),
            DiscoveredJob {
                full_path: "release".to_string(),
                is_folder: true,
            },
        ];

        let (observed, counts) = prepare_observed(nodes, &HashSet::new());
        assert_eq!(observed.len(), 1);
        assert!(observed.contains("release/api"));
        assert_eq!(counts.folders, 1);
        assert_eq!(counts.excluded, 0);
    }

    #[test]
    fn excluded_top_level_segments_never_enter_the_catalogue() {
        let excluded: HashSet<String> = ["prod-legacy".to_string()].into_iter().collect();
        let nodes = vec![
            job("prod-legacy/x"),
            job("prod-legacy-two/y"),
            job("release/api"),
        ];

        let (observed, counts) = prepare_observed(nodes, &excluded);
        assert_eq!(counts.excluded, 1);
        // Exclusion is exact on the first segment, not a prefix match.
        assert!(observed.contains("prod-legacy-two/y"));
        assert!(observed.contains("release/api"));
        assert!(!observed.contains("prod-legacy/x"));
    }

    #[test]
    fn paths_are_canonicalized_and_deduplicated() {
        let nodes = vec![job(" /release/api/ "), job("release/api"), job("  ")];

        let (observed, _) = prepare_observed(nodes, &HashSet::new());
        assert_eq!(observed.len(), 1);
        assert!(observed.contains("release/api"));
    }
}
