use actix_web::HttpResponse;
use http::StatusCode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::model_map::ModelMap;
use crate::upstream::UpstreamClient;

/// Upstream chat endpoint used when none is configured.
pub const DEFAULT_UPSTREAM_URL: &str = "https://deepseek.rkui.cn/api/chat";
/// Bound on connect + response headers + first body byte.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8088";

/// Load an env file and install structured tracing based on RUST_LOG.
///
/// Env file lookup order: `ENV_FILE` / `DOTENV_PATH`, then `.envfile`, then
/// standard `.env` discovery. Existing variables are never overwritten.
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none"
        && std::path::Path::new(".envfile").is_file()
        && dotenvy::from_filename(".envfile").is_ok()
    {
        env_source = ".envfile".into();
    }

    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| v == "1" || v == "true" || v == "yes" || v == "on")
        .unwrap_or(false)
}

fn proxy_url(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Runtime settings of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub upstream_url: String,
    pub timeout: Duration,
    pub model_map_path: Option<PathBuf>,
    /// Overrides the model map's default when set.
    pub default_model: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            upstream_url: DEFAULT_UPSTREAM_URL.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            model_map_path: None,
            default_model: None,
        }
    }
}

/// Build the upstream HTTP client honoring proxy environment variables.
///
/// Environment:
/// - CHATRELAY_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - CHATRELAY_PROXY_URL = <url>         -> proxy for all schemes
/// - HTTP_PROXY / http_proxy             -> HTTP proxy
/// - HTTPS_PROXY / https_proxy           -> HTTPS proxy
///
/// Only the connect phase gets a client-level timeout; a whole-request timeout
/// would cut long-running streams.
pub fn build_http_client_from_env(connect_timeout: Duration) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);

    if env_flag("CHATRELAY_NO_PROXY") {
        builder = builder.no_proxy();
    } else {
        if let Some(url) = proxy_url(&["CHATRELAY_PROXY_URL"]) {
            match reqwest::Proxy::all(url.as_str()) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!(error = %e, "ignoring invalid CHATRELAY_PROXY_URL"),
            }
        }
        if let Some(url) = proxy_url(&["HTTP_PROXY", "http_proxy"]) {
            match reqwest::Proxy::http(url.as_str()) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!(error = %e, "ignoring invalid HTTP_PROXY"),
            }
        }
        if let Some(url) = proxy_url(&["HTTPS_PROXY", "https_proxy"]) {
            match reqwest::Proxy::https(url.as_str()) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!(error = %e, "ignoring invalid HTTPS_PROXY"),
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default HTTP client");
        reqwest::Client::new()
    })
}

/// Shared application state used by the HTTP server and handlers.
///
/// Immutable after startup; relay operations keep their own per-request state.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub models: Arc<ModelMap>,
}

impl AppState {
    pub fn new(upstream: UpstreamClient, models: ModelMap) -> Self {
        Self {
            upstream,
            models: Arc::new(models),
        }
    }

    /// Build state from config, loading the model map file if one is set.
    pub fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        let mut models = match &config.model_map_path {
            Some(path) => ModelMap::load_from_file(path)?,
            None => ModelMap::builtin(),
        };
        if let Some(model) = config
            .default_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            models.default_model = model.to_string();
        }

        let http = build_http_client_from_env(config.timeout);
        let upstream = UpstreamClient::new(http, config.upstream_url.clone(), config.timeout);
        Ok(Self::new(upstream, models))
    }
}

/// Build a JSON error response with the given HTTP status and message.
pub fn error_response(status: StatusCode, msg: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": { "message": msg } });
    let status = actix_web::http::StatusCode::from_u16(status.as_u16())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(body)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
    )
}

/// Build a CORS configuration from environment variables for Actix-web.
///
/// Environment variables:
/// - CORS_ALLOWED_ORIGINS: "*" or comma-separated origins
/// - CORS_ALLOWED_METHODS: "*" or comma-separated methods
/// - CORS_ALLOWED_HEADERS: "*" or comma-separated request header names
/// - CORS_MAX_AGE: max age in seconds
///
/// Unset variables are permissive.
pub fn cors_config_from_env() -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default();

    cors = match env_list("CORS_ALLOWED_ORIGINS") {
        Some(list) if !list.iter().any(|o| o == "*") => list
            .iter()
            .fold(cors, |c, origin| c.allowed_origin(origin)),
        _ => cors.allow_any_origin(),
    };

    cors = match env_list("CORS_ALLOWED_METHODS") {
        Some(list) if !list.is_empty() && !list.iter().any(|m| m == "*") => {
            let methods: Vec<actix_web::http::Method> =
                list.iter().filter_map(|m| m.parse().ok()).collect();
            cors.allowed_methods(methods)
        }
        _ => cors.allow_any_method(),
    };

    cors = match env_list("CORS_ALLOWED_HEADERS") {
        Some(list) if !list.is_empty() && !list.iter().any(|h| h == "*") => list
            .iter()
            .fold(cors, |c, header| c.allowed_header(header.as_str())),
        _ => cors.allow_any_header(),
    };

    if let Some(secs) = std::env::var("CORS_MAX_AGE")
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
    {
        cors = cors.max_age(secs);
    }

    cors
}
