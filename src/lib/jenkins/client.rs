//! HTTP client for the Jenkins JSON API.

use std::{collections::HashSet, time::Duration};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExporterErrorKind;

use super::{
    is_folder_class, Build, BuildRef, BuildSnapshot, DiscoveredJob, Hudson, Job, JobNode,
};
use crate::utils::synthesize_child_path;

/// Timeout for the short inner-jobs probe used during folder re-checks.
const INNER_JOBS_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one Jenkins instance.
///
/// All calls take the ambient cancellation token and unwind with
/// [`ExporterErrorKind::Cancelled`] when it fires mid-request.
#[derive(Debug)]
pub struct JenkinsClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl JenkinsClient {
    pub fn new(
        endpoint: &str,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Result<Self, ExporterErrorKind> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    /// Walk the folder tree and return every buildable job reachable from
    /// the root (or from the named top-level folders when `root_filter` is
    /// non-empty), paired with the first error encountered along the way.
    ///
    /// A failure inside one folder never aborts the walk; the partial
    /// result is returned and the caller decides whether to apply it.
    pub async fn list_all_jobs_recursive(
        &self,
        root_filter: &[String],
        cancel: &CancellationToken,
    ) -> (Vec<DiscoveredJob>, Option<ExporterErrorKind>) {
        let mut jobs = Vec::new();
        let mut first_err: Option<ExporterErrorKind> = None;

        let root_url = format!("{}/api/json?depth=1", self.endpoint);
        let root: Hudson = match self.get_json(&root_url, None, cancel).await {
            Ok(root) => root,
            Err(e) => return (jobs, Some(e)),
        };

        let mut top_level = root.jobs;
        if !root_filter.is_empty() {
            let available: Vec<String> = top_level.iter().map(|node| node.name.clone()).collect();
            let wanted: HashSet<&str> = root_filter.iter().map(String::as_str).collect();
            top_level.retain(|node| wanted.contains(node.name.as_str()));

            if top_level.is_empty() {
                return (
                    jobs,
                    Some(ExporterErrorKind::Custom(format!(
                        "none of the configured folders {root_filter:?} exist at the \
                         Jenkins root (available: {available:?})"
                    ))),
                );
            }
        }

        // Depth-first walk with an explicit stack. The parent path travels
        // with each node because a nested node may be reported under its
        // leaf name only.
        let mut stack: Vec<(JobNode, String)> = top_level
            .into_iter()
            .rev()
            .map(|node| (node, String::new()))
            .collect();

        while let Some((node, parent_path)) = stack.pop() {
            if cancel.is_cancelled() {
                first_err.get_or_insert(ExporterErrorKind::Cancelled);
                break;
            }

            let full_path = synthesize_child_path(&parent_path, &node.name);

            if is_folder_class(&node.class) {
                match self.list_node(&node.url, None, cancel).await {
                    Ok(listing) => push_children(&mut stack, listing.jobs, &full_path),
                    Err(e) if e.is_cancelled() => {
                        first_err.get_or_insert(e);
                        break;
                    }
                    Err(e) => {
                        warn!(folder = %full_path, error = %e, "Skipping folder that failed to list");
                        first_err.get_or_insert(e);
                    }
                }
                continue;
            }

            if !node.jobs.is_empty() {
                // The class token did not say folder, but the node carries
                // children: the listing evidence wins.
                debug!(path = %full_path, class = %node.class, "Reclassifying node with children as folder");
                push_children(&mut stack, node.jobs, &full_path);
                continue;
            }

            // Leaf candidate. One short probe settles it: a folder of an
            // unknown class still reveals itself by listing inner jobs.
            match self
                .list_node(&node.url, Some(INNER_JOBS_TIMEOUT), cancel)
                .await
            {
                Ok(listing) if is_folder_class(&listing.class) || !listing.jobs.is_empty() => {
                    debug!(path = %full_path, "Probe reclassified node as folder");
                    push_children(&mut stack, listing.jobs, &full_path);
                }
                Ok(_) => jobs.push(DiscoveredJob {
                    full_path,
                    is_folder: false,
                }),
                Err(e) if e.is_cancelled() => {
                    first_err.get_or_insert(e);
                    break;
                }
                Err(e) => {
                    warn!(path = %full_path, error = %e, "Skipping unreadable node");
                    first_err.get_or_insert(e);
                }
            }
        }

        (jobs, first_err)
    }

    /// Fetch a job by its full path.
    ///
    /// A folder answering on the path is reported as its own error kind;
    /// callers must not treat it as a transient failure.
    pub async fn get_job(
        &self,
        full_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Job, ExporterErrorKind> {
        let url = format!("{}/api/json", self.job_url(full_path));
        let job: Job = self.get_json(&url, None, cancel).await.map_err(|e| match e {
            ExporterErrorKind::JobNotFound(_) => {
                ExporterErrorKind::JobNotFound(full_path.to_string())
            }
            other => other,
        })?;

        if is_folder_class(&job.class) {
            return Err(ExporterErrorKind::FolderNotJob(full_path.to_string()));
        }

        Ok(job)
    }

    /// The last completed build of a job, or `None` when the job has never
    /// finished a build. The returned snapshot has no parameters; fetch
    /// them with [`get_build_details`].
    ///
    /// [`get_build_details`]: JenkinsClient::get_build_details
    pub async fn get_last_completed_build(
        &self,
        full_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(BuildRef, BuildSnapshot)>, ExporterErrorKind> {
        let job = self.get_job(full_path, cancel).await?;

        let Some(build_ref) = job.last_completed_build else {
            return Ok(None);
        };

        match self.fetch_build(&build_ref, cancel).await {
            Ok(build) => Ok(Some((build_ref, BuildSnapshot::base(&build)))),
            // The build reference can race away between the two requests.
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch a build with its parameters populated.
    pub async fn get_build_details(
        &self,
        build_ref: &BuildRef,
        cancel: &CancellationToken,
    ) -> Result<BuildSnapshot, ExporterErrorKind> {
        let build = self.fetch_build(build_ref, cancel).await?;
        Ok(BuildSnapshot::with_parameters(&build))
    }

    async fn fetch_build(
        &self,
        build_ref: &BuildRef,
        cancel: &CancellationToken,
    ) -> Result<Build, ExporterErrorKind> {
        let url = format!("{}/api/json", build_ref.url.trim_end_matches('/'));
        self.get_json(&url, None, cancel).await
    }

    async fn list_node(
        &self,
        url: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<JobNode, ExporterErrorKind> {
        let url = format!("{}/api/json?depth=1", url.trim_end_matches('/'));
        self.get_json(&url, timeout, cancel).await
    }

    /// Map a job path to its URL: `a/b/c` → `<endpoint>/job/a/job/b/job/c`.
    fn job_url(&self, full_path: &str) -> String {
        let mut url = self.endpoint.clone();
        for segment in full_path.split('/').filter(|segment| !segment.is_empty()) {
            url.push_str("/job/");
            url.push_str(segment);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<T, ExporterErrorKind> {
        let mut request = self.http.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ExporterErrorKind::Cancelled),
            res = request.send() => res?,
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExporterErrorKind::JobNotFound(url.to_string()));
        }
        let response = response.error_for_status()?;

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ExporterErrorKind::Cancelled),
            res = response.text() => res?,
        };

        // A login page or folder HTML view instead of JSON.
        if body.trim_start().starts_with('<') {
            return Err(ExporterErrorKind::NonJsonResponse(url.to_string()));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn push_children(stack: &mut Vec<(JobNode, String)>, children: Vec<JobNode>, parent_path: &str) {
    for child in children.into_iter().rev() {
        stack.push((child, parent_path.to_string()));
    }
}
