//! Jenkins gateway: wire types and the HTTP client.
//!
//! The client offers four operations to the rest of the crate: recursive
//! job listing, job lookup, last-completed-build lookup, and build detail
//! fetching. Everything else about the Jenkins API stays behind this
//! module boundary.

mod client;

pub use client::JenkinsClient;

use std::collections::HashMap;

use serde::Deserialize;

/// Root API response (`/api/json?depth=1`).
#[derive(Debug, Clone, Deserialize)]
pub struct Hudson {
    #[serde(default)]
    pub jobs: Vec<JobNode>,
}

/// A node in a folder listing. May itself be a folder or a job; the
/// `jobs` field is populated when the listing was fetched with depth.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobNode {
    #[serde(rename = "_class", default)]
    pub class: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub jobs: Vec<JobNode>,
}

/// Response from a specific job endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(rename = "_class", default)]
    pub class: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub buildable: bool,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub last_build: Option<BuildRef>,
    #[serde(default)]
    pub last_completed_build: Option<BuildRef>,
}

/// Reference to a build, as embedded in a job response.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildRef {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub url: String,
}

/// Response from a specific build endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub duration: i64,
    /// `SUCCESS`, `FAILURE`, `ABORTED`, `UNSTABLE`, or null while running.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub queue_id: i64,
    #[serde(default, deserialize_with = "actions_dropping_nulls")]
    pub actions: Vec<Action>,
}

/// Some Jenkins versions put literal nulls into the actions array.
fn actions_dropping_nulls<'de, D>(deserializer: D) -> Result<Vec<Action>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let actions = Vec::<Option<Action>>::deserialize(deserializer)?;
    Ok(actions.into_iter().flatten().collect())
}

/// An action entry on a build; parameters live under the
/// `hudson.model.ParametersAction` class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Action {
    #[serde(rename = "_class", default)]
    pub class: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// A single build parameter; the value may be any JSON scalar.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A buildable job found by the recursive traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredJob {
    /// Full slash-separated path, synthesized from the traversal ancestry.
    pub full_path: String,
    pub is_folder: bool,
}

/// Snapshot of one build, decoupled from the wire representation.
#[derive(Debug, Clone)]
pub struct BuildSnapshot {
    pub number: i64,
    /// Empty string when Jenkins reported null.
    pub result: String,
    pub building: bool,
    pub timestamp: i64,
    pub duration: i64,
    pub parameters: HashMap<String, String>,
}

impl BuildSnapshot {
    /// Snapshot without parameters, from a bare build response.
    pub fn base(build: &Build) -> Self {
        Self::from_build(build, HashMap::new())
    }

    /// Snapshot with the parameter actions flattened in.
    pub fn with_parameters(build: &Build) -> Self {
        let parameters = flatten_parameters(&build.actions);
        Self::from_build(build, parameters)
    }

    fn from_build(build: &Build, parameters: HashMap<String, String>) -> Self {
        Self {
            number: build.number,
            result: build.result.clone().unwrap_or_default(),
            building: build.building,
            timestamp: build.timestamp,
            duration: build.duration,
            parameters,
        }
    }
}

/// Whether a `_class` token identifies a folder-typed node.
pub fn is_folder_class(class: &str) -> bool {
    class.contains("Folder")
}

/// Flatten `actions[].parameters[]` into a name → string map.
fn flatten_parameters(actions: &[Action]) -> HashMap<String, String> {
    let mut parameters = HashMap::new();
    for action in actions {
        if action.class != "hudson.model.ParametersAction" {
            continue;
        }
        for param in &action.parameters {
            if param.name.is_empty() {
                continue;
            }
            parameters.insert(param.name.clone(), scalar_to_string(&param.value));
        }
    }
    parameters
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
