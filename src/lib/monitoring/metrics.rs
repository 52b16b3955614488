//! Prometheus metric registry for build results.
//!
//! One gauge vector, `jenkins_build_last_result`, keyed on
//! `(job_path, check_commitID, gitBranch, status)`. Every sample carries
//! the value `1.0`; the status lives entirely in the label, so operators
//! can `sum by (status)` without decoding magic numbers.
//!
//! The `prometheus` crate has no partial-match removal, so the registry
//! tracks the one live label set per job path itself. That bookkeeping is
//! what makes delete-then-insert atomic per path.

use std::{collections::HashMap, sync::RwLock};

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::error::ExporterErrorKind;

const BUILD_RESULT_HELP: &str = "Last build result: 1 indicates current status, status label \
     contains the actual status (success, failure, aborted, unstable, in_progress, not_built, \
     unknown)";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SampleLabels {
    commit: String,
    branch: String,
    status: String,
}

/// Registry holding the build result gauge vector.
///
/// Writes take the exclusive lock; the exposition takes the shared lock.
/// A reader never observes a job path with zero or two samples.
pub struct BuildMetrics {
    registry: Registry,
    build_result: GaugeVec,
    live: RwLock<HashMap<String, SampleLabels>>,
}

impl BuildMetrics {
    pub fn new() -> Result<Self, ExporterErrorKind> {
        let registry = Registry::new();

        let build_result = GaugeVec::new(
            Opts::new("jenkins_build_last_result", BUILD_RESULT_HELP),
            &["job_path", "check_commitID", "gitBranch", "status"],
        )?;
        registry.register(Box::new(build_result.clone()))?;

        Ok(Self {
            registry,
            build_result,
            live: RwLock::new(HashMap::new()),
        })
    }

    /// Atomically replace the sample for a job path: any previous sample
    /// for the path is removed regardless of its other labels, then the
    /// new one is set to `1.0`.
    pub fn replace_sample(&self, job_path: &str, commit: &str, branch: &str, status: &str) {
        let mut live = self.live.write().expect("gauge lock poisoned");

        let labels = SampleLabels {
            commit: commit.to_string(),
            branch: branch.to_string(),
            status: status.to_string(),
        };

        if let Some(old) = live.insert(job_path.to_string(), labels) {
            let _ = self.build_result.remove_label_values(&[
                job_path,
                &old.commit,
                &old.branch,
                &old.status,
            ]);
        }

        self.build_result
            .with_label_values(&[job_path, commit, branch, status])
            .set(1.0);
    }

    /// Drop the sample for a job path, if present.
    pub fn remove_sample(&self, job_path: &str) {
        let mut live = self.live.write().expect("gauge lock poisoned");

        if let Some(old) = live.remove(job_path) {
            let _ = self.build_result.remove_label_values(&[
                job_path,
                &old.commit,
                &old.branch,
                &old.status,
            ]);
        }
    }

    /// Drop every sample whose job path matches the predicate. Returns the
    /// number of evicted samples.
    pub fn evict_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut live = self.live.write().expect("gauge lock poisoned");

        let matching: Vec<String> = live
            .keys()
            .filter(|path| predicate(path))
            .cloned()
            .collect();

        for job_path in &matching {
            if let Some(old) = live.remove(job_path) {
                let _ = self.build_result.remove_label_values(&[
                    job_path,
                    &old.commit,
                    &old.branch,
                    &old.status,
                ]);
            }
        }

        matching.len()
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String, ExporterErrorKind> {
        let _shared = self.live.read().expect("gauge lock poisoned");

        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| {
            ExporterErrorKind::Custom(format!("metrics encoding produced invalid UTF-8: {e}"))
        })
    }

    #[cfg(test)]
    fn sample_count(&self) -> usize {
        self.live.read().unwrap().len()
    }
}
