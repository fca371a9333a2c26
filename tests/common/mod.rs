//! Shared fixtures: a gateway instance over temp config files plus mock
//! backend plumbing.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vllm_gateway::{router, AppState};

/// Secrets used by every test: `research` is also the admin group.
pub const SECRETS: &str = "\
groups:
  - research: [tok-research]
  - interns: [tok-intern]
admin_groups: [research]
vllm_token: fleet-secret
";

pub struct TestGateway {
    pub addr: String,
    pub state: Arc<AppState>,
    pub config_path: PathBuf,
    pub secrets_path: PathBuf,
    _dir: TempDir,
}

/// Write the YAML files, build the state, and serve the router on an
/// ephemeral port. The refresh loops are intentionally not started: probes
/// run lazily from the dispatcher, which keeps tests deterministic.
pub async fn spawn_gateway(config_yaml: &str, secrets_yaml: &str) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yml");
    let secrets_path = dir.path().join("secrets.yml");
    std::fs::write(&config_path, config_yaml).unwrap();
    std::fs::write(&secrets_path, secrets_yaml).unwrap();

    let state = Arc::new(AppState::from_files(&config_path, &secrets_path).unwrap());
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestGateway {
        addr: format!("http://{addr}"),
        state,
        config_path,
        secrets_path,
        _dir: dir,
    }
}

/// One `vllm_hosts` entry pointing at a mock server (single-port range).
pub fn host_entry(uri: &str, groups: &[&str]) -> String {
    let parsed = url::Url::parse(uri).unwrap();
    let port = parsed.port().unwrap();
    format!(
        "  - hostname: {scheme}://{host}\n    ports: {{ start: {port}, end: {port} }}\n    allowed_groups: [{groups}]\n",
        scheme = parsed.scheme(),
        host = parsed.host_str().unwrap(),
        groups = groups.join(", "),
    )
}

pub fn config_yaml(hosts: &[String]) -> String {
    let hosts_block = if hosts.is_empty() {
        "vllm_hosts: []\n".to_string()
    } else {
        format!("vllm_hosts:\n{}", hosts.concat())
    };
    format!(
        "{hosts_block}\
app_settings:
  model_owner: research
  max_failures: 3
  cooldown_period_minutes: 1
  request_timeout: 2.0
  log_level: debug
"
    )
}

pub fn metrics_body(running: f64, waiting: f64) -> String {
    format!(
        "vllm:num_requests_running{{model_name=\"m\"}} {running}\n\
         vllm:num_requests_waiting{{model_name=\"m\"}} {waiting}\n"
    )
}

/// Mount `/metrics` and `/v1/models` so the backend passes both probes.
pub async fn mount_backend(server: &MockServer, model: &str, created: i64, load: f64) {
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(metrics_body(load, 0.0)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": model, "object": "model", "created": created, "owned_by": "vllm"}]
        })))
        .mount(server)
        .await;
}
