//! End-to-end tests against a mock Jenkins HTTP server.
//!
//! The mock serves a small folder tree: a `release` folder with one job
//! that has completed builds, an excluded `prod-legacy` folder, a
//! top-level job with no builds, and a container whose class token does
//! not say "Folder" but which lists inner jobs anyway.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use jenkins_exporter::{
    collector::{BuildCollector, CollectorSettings},
    discovery::Discovery,
    jenkins::JenkinsClient,
    monitoring::{BuildMetrics, MonitoringServer},
    status::StatusSender,
    storage::Catalogue,
};

#[derive(Clone)]
struct MockJenkins {
    base: String,
    /// When set, build #43 (FAILURE on `hotfix`) replaces #42 as the last
    /// completed build of `release/api`.
    failed: Arc<AtomicBool>,
}

async fn spawn_mock_jenkins(failed: Arc<AtomicBool>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let state = MockJenkins {
        base: base.clone(),
        failed,
    };

    let app = Router::new()
        .route("/api/json", get(root))
        .route("/job/release/api/json", get(release_folder))
        .route("/job/release/job/api/api/json", get(release_api_job))
        .route("/job/release/job/api/42/api/json", get(build_42))
        .route("/job/release/job/api/43/api/json", get(build_43))
        .route("/job/prod-legacy/api/json", get(legacy_folder))
        .route("/job/prod-legacy/job/x/api/json", get(legacy_job))
        .route("/job/standalone/api/json", get(standalone_job))
        .route("/job/weird/job/inner/api/json", get(inner_job))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    base
}

async fn root(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "mode": "NORMAL",
        "jobs": [
            {
                "_class": "com.cloudbees.hudson.plugins.folder.Folder",
                "name": "release",
                "url": format!("{}/job/release/", state.base)
            },
            {
                "_class": "com.cloudbees.hudson.plugins.folder.Folder",
                "name": "prod-legacy",
                "url": format!("{}/job/prod-legacy/", state.base)
            },
            {
                "_class": "hudson.model.FreeStyleProject",
                "name": "standalone",
                "url": format!("{}/job/standalone/", state.base)
            },
            {
                // Class token does not contain "Folder", but the node
                // lists children; discovery must recurse anyway.
                "_class": "jenkins.branch.OrganizationContainer",
                "name": "weird",
                "url": format!("{}/job/weird/", state.base),
                "jobs": [
                    {
                        "_class": "hudson.model.FreeStyleProject",
                        "name": "inner",
                        "url": format!("{}/job/weird/job/inner/", state.base)
                    }
                ]
            }
        ]
    }))
}

async fn release_folder(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "_class": "com.cloudbees.hudson.plugins.folder.Folder",
        "name": "release",
        "url": format!("{}/job/release/", state.base),
        "jobs": [
            {
                "_class": "hudson.model.FreeStyleProject",
                "name": "api",
                "url": format!("{}/job/release/job/api/", state.base)
            }
        ]
    }))
}

async fn release_api_job(State(state): State<MockJenkins>) -> Json<Value> {
    let (number, color) = if state.failed.load(Ordering::SeqCst) {
        (43, "red")
    } else {
        (42, "blue")
    };
    let build_url = format!("{}/job/release/job/api/{}/", state.base, number);

    Json(json!({
        "_class": "hudson.model.FreeStyleProject",
        "displayName": "api",
        "fullName": "release/api",
        "url": format!("{}/job/release/job/api/", state.base),
        "buildable": true,
        "color": color,
        "lastBuild": {"number": number, "url": build_url},
        "lastCompletedBuild": {"number": number, "url": build_url}
    }))
}

async fn build_42(State(_state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "number": 42,
        "timestamp": 1700000000000u64,
        "duration": 92000,
        "result": "SUCCESS",
        "building": false,
        "queueId": 7,
        "actions": [
            {},
            {
                "_class": "hudson.model.ParametersAction",
                "parameters": [
                    {"name": "gitBranch", "value": "main"},
                    {"name": "check_commitID", "value": "abc123"}
                ]
            }
        ]
    }))
}

async fn build_43(State(_state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "number": 43,
        "timestamp": 1700000500000u64,
        "duration": 61000,
        "result": "FAILURE",
        "building": false,
        "queueId": 8,
        "actions": [
            {
                "_class": "hudson.model.ParametersAction",
                "parameters": [
                    {"name": "gitBranch", "value": "hotfix"},
                    {"name": "check_commitID", "value": "def789"}
                ]
            }
        ]
    }))
}

async fn legacy_folder(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "_class": "com.cloudbees.hudson.plugins.folder.Folder",
        "name": "prod-legacy",
        "url": format!("{}/job/prod-legacy/", state.base),
        "jobs": [
            {
                "_class": "hudson.model.FreeStyleProject",
                "name": "x",
                "url": format!("{}/job/prod-legacy/job/x/", state.base)
            }
        ]
    }))
}

async fn legacy_job(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "_class": "hudson.model.FreeStyleProject",
        "displayName": "x",
        "fullName": "prod-legacy/x",
        "url": format!("{}/job/prod-legacy/job/x/", state.base),
        "buildable": true,
        "lastCompletedBuild": null
    }))
}

async fn standalone_job(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "_class": "hudson.model.FreeStyleProject",
        "displayName": "standalone",
        "fullName": "standalone",
        "url": format!("{}/job/standalone/", state.base),
        "buildable": true,
        "lastCompletedBuild": null
    }))
}

async fn inner_job(State(state): State<MockJenkins>) -> Json<Value> {
    Json(json!({
        "_class": "hudson.model.FreeStyleProject",
        "displayName": "inner",
        "fullName": "weird/inner",
        "url": format!("{}/job/weird/job/inner/", state.base),
        "buildable": true,
        "lastCompletedBuild": null
    }))
}

fn excluded() -> HashSet<String> {
    ["prod-legacy".to_string()].into_iter().collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_and_collection_end_to_end() {
    let failed = Arc::new(AtomicBool::new(false));
    let base = spawn_mock_jenkins(failed.clone()).await;
    let cancel = CancellationToken::new();

    let client = Arc::new(
        JenkinsClient::new(&base, String::new(), String::new(), Duration::from_secs(10)).unwrap(),
    );
    let catalogue = Catalogue::open_in_memory().unwrap();

    let discovery = Discovery::new(
        client.clone(),
        catalogue.clone(),
        Duration::from_secs(300),
        Vec::new(),
        excluded(),
    );

    let counts = discovery.sync_once(&cancel).await.unwrap();
    assert_eq!(counts.added, 3);
    assert_eq!(counts.deleted, 0);

    let jobs = catalogue.list_enabled_jobs().unwrap();
    let paths: Vec<&str> = jobs.iter().map(|job| job.job_path.as_str()).collect();
    assert_eq!(paths, vec!["release/api", "standalone", "weird/inner"]);

    // An unchanged Jenkins produces a pure-touch sync.
    let counts = discovery.sync_once(&cancel).await.unwrap();
    assert_eq!(counts.added, 0);
    assert_eq!(counts.deleted, 0);
    assert_eq!(counts.touched, 3);

    let metrics = Arc::new(BuildMetrics::new().unwrap());
    let collector = Arc::new(BuildCollector::new(
        client,
        catalogue.clone(),
        metrics.clone(),
        CollectorSettings::new(Duration::from_secs(5), 4, excluded()),
    ));

    collector.collect_once(&cancel).await.unwrap();

    let exposition = metrics.encode().unwrap();
    assert!(exposition.contains(
        "jenkins_build_last_result{check_commitID=\"abc123\",gitBranch=\"main\",\
         job_path=\"release/api\",status=\"success\"} 1"
    ));
    assert!(exposition.contains(
        "jenkins_build_last_result{check_commitID=\"\",gitBranch=\"\",\
         job_path=\"standalone\",status=\"not_built\"} 1"
    ));
    assert!(exposition.contains(
        "jenkins_build_last_result{check_commitID=\"\",gitBranch=\"\",\
         job_path=\"weird/inner\",status=\"not_built\"} 1"
    ));
    assert!(!exposition.contains("prod-legacy"));

    let api = catalogue
        .list_enabled_jobs()
        .unwrap()
        .into_iter()
        .find(|job| job.job_path == "release/api")
        .unwrap();
    assert_eq!(api.last_seen_build, 42);

    // A second collection against an unchanged Jenkins is a no-op on the
    // exposition.
    collector.collect_once(&cancel).await.unwrap();
    assert_eq!(metrics.encode().unwrap(), exposition);

    // Build #43 completes with FAILURE on another branch: the single
    // sample for the path flips, the old one disappears.
    failed.store(true, Ordering::SeqCst);
    collector.collect_once(&cancel).await.unwrap();

    let exposition = metrics.encode().unwrap();
    assert!(exposition.contains(
        "jenkins_build_last_result{check_commitID=\"def789\",gitBranch=\"hotfix\",\
         job_path=\"release/api\",status=\"failure\"} 1"
    ));
    assert!(!exposition.contains("status=\"success\""));
    assert_eq!(exposition.matches("job_path=\"release/api\"").count(), 1);

    let api = catalogue
        .list_enabled_jobs()
        .unwrap()
        .into_iter()
        .find(|job| job.job_path == "release/api")
        .unwrap();
    assert_eq!(api.last_seen_build, 43);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_surface_serves_metrics_probes_and_redirect() {
    let failed = Arc::new(AtomicBool::new(false));
    let base = spawn_mock_jenkins(failed).await;
    let cancel = CancellationToken::new();

    let client = Arc::new(
        JenkinsClient::new(&base, String::new(), String::new(), Duration::from_secs(10)).unwrap(),
    );
    let catalogue = Catalogue::open_in_memory().unwrap();

    let discovery = Discovery::new(
        client.clone(),
        catalogue.clone(),
        Duration::from_secs(300),
        Vec::new(),
        excluded(),
    );
    discovery.sync_once(&cancel).await.unwrap();

    let metrics = Arc::new(BuildMetrics::new().unwrap());
    let collector = Arc::new(BuildCollector::new(
        client,
        catalogue,
        metrics.clone(),
        // Zero gap so repeated scrapes in the test keep triggering.
        CollectorSettings::new(Duration::ZERO, 4, excluded()),
    ));

    let (status_tx, _status_rx) = async_channel::unbounded();
    {
        let collector = collector.clone();
        let token = cancel.clone();
        tokio::spawn(collector.run(token, StatusSender::Collector(status_tx)));
    }

    let server = MonitoringServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        "/metrics".to_string(),
        metrics,
        collector,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            server
                .run(async move { token.cancelled().await })
                .await
                .unwrap();
        });
    }

    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let res = http
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let res = http
        .get(format!("http://{addr}/readyz"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // Unknown paths redirect to the metrics path.
    let res = http
        .get(format!("http://{addr}/somewhere/else"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 301);
    assert_eq!(res.headers()["location"], "/metrics");

    // A scrape triggers collection asynchronously; the samples show up on
    // a later scrape without any scrape ever blocking on Jenkins.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let res = http
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(
            res.headers()["content-type"],
            "text/plain; version=0.0.4"
        );

        let body = res.text().await.unwrap();
        if body.contains("job_path=\"release/api\"") {
            assert!(body.contains("status=\"success\""));
            break;
        }

        assert!(
            tokio::time::Instant::now() < deadline,
            "collector never published samples"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
}
