//! Configuration and secrets loading.
//!
//! Two YAML files drive the gateway: a config file describing the fleet
//! (hostnames, port ranges, allowed groups, app settings) and a secrets file
//! holding group token lists, admin groups, and the shared vLLM token.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::health::BreakerPolicy;
use crate::registry::Backend;

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub vllm_hosts: Vec<HostEntry>,
    #[serde(default)]
    pub app_settings: AppSettings,
}

#[derive(Debug, Deserialize)]
pub struct HostEntry {
    /// Bare host or http(s)-prefixed URL.
    pub hostname: String,
    pub ports: PortRange,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

/// Inclusive port range; each port becomes one backend.
#[derive(Debug, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Owner label stamped on aggregated model listings.
    pub model_owner: String,
    /// Consecutive probe failures before the circuit opens.
    pub max_failures: u32,
    pub cooldown_period_minutes: u64,
    /// Timeout in seconds applied to each probe request.
    pub request_timeout: f64,
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_owner: "unknown".into(),
            max_failures: 3,
            cooldown_period_minutes: 5,
            request_timeout: 5.0,
            log_level: "info".into(),
        }
    }
}

impl AppSettings {
    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            max_failures: self.max_failures,
            cooldown: Duration::from_secs(self.cooldown_period_minutes * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Secrets {
    /// Ordered list of single-entry maps: group name -> tokens.
    /// Kept as a list so token lookup order matches the file.
    #[serde(default)]
    pub groups: Vec<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub admin_groups: Vec<String>,
    pub vllm_token: String,
}

/// Settings snapshot derived from config + secrets, swapped on reload.
#[derive(Debug)]
pub struct RuntimeSettings {
    pub model_owner: String,
    pub request_timeout: Duration,
    pub vllm_token: String,
    pub log_level: String,
}

impl RuntimeSettings {
    pub fn new(config: &GatewayConfig, secrets: &Secrets) -> Self {
        Self {
            model_owner: config.app_settings.model_owner.clone(),
            request_timeout: Duration::from_secs_f64(config.app_settings.request_timeout),
            vllm_token: secrets.vllm_token.clone(),
            log_level: config.app_settings.log_level.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: GatewayConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    anyhow::ensure!(
        config.app_settings.request_timeout > 0.0,
        "app_settings.request_timeout must be positive"
    );
    Ok(config)
}

pub fn load_secrets(path: &Path) -> anyhow::Result<Secrets> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading secrets file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing secrets file {}", path.display()))
}

/// Expand every (hostname, port) pair into one backend descriptor.
/// Hostnames without a scheme get `http://` prepended.
pub fn expand_backends(config: &GatewayConfig) -> anyhow::Result<Vec<Backend>> {
    let mut backends = Vec::new();
    for host in &config.vllm_hosts {
        let base = if host.hostname.starts_with("http://") || host.hostname.starts_with("https://")
        {
            host.hostname.clone()
        } else {
            format!("http://{}", host.hostname)
        };
        for port in host.ports.start..=host.ports.end {
            let url = format!("{base}:{port}");
            Url::parse(&url).with_context(|| format!("invalid backend url {url}"))?;
            backends.push(Backend {
                url,
                allowed_groups: host.allowed_groups.iter().cloned().collect(),
            });
        }
    }
    Ok(backends)
}
