use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use chatrelay::server::config_routes;
use chatrelay::util::{
    cors_config_from_env, init_tracing, AppState, RelayConfig, DEFAULT_BIND_ADDR,
    DEFAULT_TIMEOUT_SECS, DEFAULT_UPSTREAM_URL,
};

/// OpenAI-compatible relay in front of a single SSE chat upstream.
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version, about)]
struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    bind_addr: String,

    /// Upstream chat endpoint receiving the relayed POST
    #[arg(long, env = "CHATRELAY_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    upstream_url: String,

    /// Seconds allowed for connect, response headers and first body byte
    #[arg(long, env = "CHATRELAY_TIMEOUT_SECONDS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_seconds: u64,

    /// JSON or YAML file replacing the built-in model table
    #[arg(long, env = "CHATRELAY_MODEL_MAP")]
    model_map: Option<PathBuf>,

    /// Upstream model used when a request names none; overrides the model map file
    #[arg(long, env = "CHATRELAY_DEFAULT_MODEL")]
    default_model: Option<String>,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            upstream_url: args.upstream_url,
            timeout: Duration::from_secs(args.timeout_seconds),
            model_map_path: args.model_map,
            default_model: args.default_model,
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Env files must be loaded before clap reads env fallbacks.
    init_tracing();
    let config = RelayConfig::from(Args::parse());

    let state = AppState::from_config(&config).context("building relay state")?;
    tracing::info!(
        bind = %config.bind_addr,
        upstream = %config.upstream_url,
        timeout_secs = config.timeout.as_secs(),
        models = state.models.aliases.len(),
        "starting chatrelay"
    );

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .wrap(cors_config_from_env())
            .app_data(data.clone())
            .configure(config_routes)
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("binding {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}
