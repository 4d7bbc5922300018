use actix_web::{web, HttpResponse, Responder};
use tracing::{info, warn};

use crate::error::RelayError;
use crate::models::{ChatCompletionRequest, ChatCompletionResponse};
use crate::relay::{collect_buffered, SseRelayStream};
use crate::util::AppState;

const ROUTES: &[&str] = &["/status", "/v1/models", "/v1/chat/completions"];

/// Configure Actix-web routes with AppState.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/status", web::get().to(status))
            .route("/v1/models", web::get().to(list_models))
            .route("/v1/chat/completions", web::post().to(chat_completions)),
    );
}

/// Service status endpoint exposing upstream settings and available routes.
async fn status(state: web::Data<AppState>) -> impl Responder {
    web::Json(serde_json::json!({
        "name": "chatrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": ROUTES,
        "upstream": {
            "url": state.upstream.url(),
            "timeout_seconds": state.upstream.timeout().as_secs(),
        },
        "models": state.models.stats(),
        "default_model": state.models.default_model,
    }))
}

async fn list_models(state: web::Data<AppState>) -> impl Responder {
    web::Json(state.models.model_list())
}

/// Relay a chat completion upstream.
///
/// `stream: true` answers with a re-framed SSE stream; otherwise the deltas are
/// accumulated and returned as one `chat.completion` object.
async fn chat_completions(
    state: web::Data<AppState>,
    body: web::Json<ChatCompletionRequest>,
) -> Result<HttpResponse, RelayError> {
    let mut request = body.into_inner();
    let upstream_model = state.models.resolve(request.model.as_deref());
    let reply_model = request
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| upstream_model.clone());
    request.model = Some(upstream_model.clone());
    let streaming = request.stream;

    info!(
        model = %reply_model,
        upstream_model = %upstream_model,
        stream = streaming,
        "relaying chat completion"
    );

    let payload =
        serde_json::to_value(&request).map_err(|e| RelayError::Transport(e.to_string()))?;
    let upstream = state.upstream.send(&payload).await.inspect_err(|e| {
        warn!(error = %e, model = %upstream_model, "upstream call failed");
    })?;

    if streaming {
        return Ok(HttpResponse::Ok()
            .insert_header(("content-type", "text/event-stream"))
            .insert_header(("cache-control", "no-cache"))
            .insert_header(("connection", "keep-alive"))
            .streaming(SseRelayStream::new(upstream)));
    }

    let text = collect_buffered(upstream).await.inspect_err(|e| {
        warn!(error = %e, model = %upstream_model, "buffered relay failed");
    })?;
    Ok(HttpResponse::Ok().json(ChatCompletionResponse::from_text(&reply_model, text)))
}
