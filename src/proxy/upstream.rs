//! Pooled HTTP clients for outbound traffic, one per class.
//!
//! Probe requests carry a per-request timeout (the configured
//! `request_timeout`, or the 2 s budget of the `/metrics` dump), so the probe
//! client itself sets none. reqwest exposes no separate write timeout; the
//! streaming client uses connect/read/pool-idle timeouts instead.

use std::time::Duration;

pub struct UpstreamClient {
    /// `/metrics` and `/v1/models` probes.
    pub probe: reqwest::Client,
    /// Buffered inference forwards.
    pub buffered: reqwest::Client,
    /// Streaming inference forwards.
    pub streaming: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let probe = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build probe HTTP client");

        let buffered = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build buffered HTTP client");

        let streaming = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build streaming HTTP client");

        Self {
            probe,
            buffered,
            streaming,
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
