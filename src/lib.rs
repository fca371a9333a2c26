//! vLLM Gateway library crate for the binary and for integration testing.
//!
//! Exposes the application state, the router, and the modules that the
//! integration tests in `tests/` exercise directly.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, on, post, MethodFilter};
use axum::Router;

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod directory;
pub mod errors;
pub mod health;
pub mod jobs;
pub mod probe;
pub mod proxy;
pub mod registry;

use cache::TtlCache;
use config::RuntimeSettings;
use directory::TokenDirectory;
use health::HealthTracker;
use probe::ModelDescriptor;
use proxy::upstream::UpstreamClient;
use registry::FleetRegistry;

/// Shared application state passed to handlers and background jobs.
pub struct AppState {
    pub registry: FleetRegistry,
    pub directory: ArcSwap<TokenDirectory>,
    pub settings: ArcSwap<RuntimeSettings>,
    pub health: HealthTracker,
    pub metrics_cache: TtlCache<f64>,
    pub model_cache: TtlCache<ModelDescriptor>,
    pub upstream: UpstreamClient,
    config_path: PathBuf,
    secrets_path: PathBuf,
}

impl AppState {
    /// Build the full application state from a config file and a secrets file.
    /// The paths are retained so `/reload` can re-read both.
    pub fn from_files(
        config_path: impl Into<PathBuf>,
        secrets_path: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let config_path = config_path.into();
        let secrets_path = secrets_path.into();

        let cfg = config::load_config(&config_path)?;
        let secrets = config::load_secrets(&secrets_path)?;
        let backends = config::expand_backends(&cfg)?;

        let health = HealthTracker::new(cfg.app_settings.breaker_policy());
        health.rebuild(&backends.iter().map(|b| b.url.clone()).collect::<Vec<_>>());

        Ok(Self {
            registry: FleetRegistry::new(backends),
            directory: ArcSwap::from_pointee(TokenDirectory::from_secrets(&secrets)),
            settings: ArcSwap::from_pointee(RuntimeSettings::new(&cfg, &secrets)),
            health,
            metrics_cache: TtlCache::new(cache::METRICS_TTL, cache::CACHE_CAPACITY),
            model_cache: TtlCache::new(cache::MODEL_TTL, cache::CACHE_CAPACITY),
            upstream: UpstreamClient::new(),
            config_path,
            secrets_path,
        })
    }

    /// Re-read config and secrets and swap in the new fleet atomically.
    /// Health records and utilization stamps survive for URLs that persist;
    /// in-flight requests keep the backend they already selected.
    pub fn reload(&self) -> anyhow::Result<()> {
        let cfg = config::load_config(&self.config_path)?;
        let secrets = config::load_secrets(&self.secrets_path)?;
        let backends = config::expand_backends(&cfg)?;

        self.health.set_policy(cfg.app_settings.breaker_policy());
        self.health
            .rebuild(&backends.iter().map(|b| b.url.clone()).collect::<Vec<_>>());
        self.registry.rebuild(backends);
        self.directory
            .store(Arc::new(TokenDirectory::from_secrets(&secrets)));
        self.settings
            .store(Arc::new(RuntimeSettings::new(&cfg, &secrets)));
        Ok(())
    }
}

/// Assemble the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::handlers::health))
        .route("/metrics", get(api::handlers::metrics))
        .route("/reload", post(api::handlers::reload))
        .route(
            "/v1/*path",
            on(
                MethodFilter::GET
                    .or(MethodFilter::POST)
                    .or(MethodFilter::PUT)
                    .or(MethodFilter::DELETE),
                proxy::handler::proxy_handler,
            ),
        )
        .with_state(state)
        // Enforce 25 MB body size limit on all routes
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // Bearer tokens arrive via the Authorization header, so browser
        // callers are fine with a permissive policy.
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with gateway logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
