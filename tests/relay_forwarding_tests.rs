use actix_web::{test, web, App};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use chatrelay::model_map::ModelMap;
use chatrelay::server::config_routes;
use chatrelay::upstream::UpstreamClient;
use chatrelay::util::AppState;

#[derive(Clone)]
struct UpstreamState {
    requests: Arc<AsyncMutex<Vec<(HeaderMap, Value)>>>,
    status: StatusCode,
    chunks: Arc<Vec<&'static str>>,
}

async fn handle_chat(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    state.requests.lock().await.push((headers, payload));
    let chunks: Vec<Result<Bytes, std::io::Error>> = state
        .chunks
        .iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    Response::builder()
        .status(state.status)
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .expect("mock response")
}

/// Upstream answering every POST with `chunks`, each sent as its own body frame.
struct MockUpstream {
    url: String,
    requests: Arc<AsyncMutex<Vec<(HeaderMap, Value)>>>,
    join: JoinHandle<()>,
}

impl MockUpstream {
    async fn start(status: StatusCode, chunks: Vec<&'static str>) -> Self {
        let requests = Arc::new(AsyncMutex::new(Vec::new()));
        let state = UpstreamState {
            requests: requests.clone(),
            status,
            chunks: Arc::new(chunks),
        };

        let app = Router::new()
            .route("/api/chat", post(handle_chat))
            .with_state(state);
        Self::serve(app, requests).await
    }

    /// Upstream that sends `head` (if any), stalls for `stall`, then sends `tail`.
    async fn stalling(head: Option<&'static str>, stall: Duration, tail: &'static str) -> Self {
        let app = Router::new().route(
            "/api/chat",
            post(move || async move {
                let head = futures_util::stream::iter(
                    head.map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes()))),
                );
                let tail = futures_util::stream::once(async move {
                    tokio::time::sleep(stall).await;
                    Ok(Bytes::from_static(tail.as_bytes()))
                });
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/event-stream")
                    .body(Body::from_stream(head.chain(tail)))
                    .expect("mock response")
            }),
        );
        Self::serve(app, Arc::new(AsyncMutex::new(Vec::new()))).await
    }

    async fn serve(app: Router, requests: Arc<AsyncMutex<Vec<(HeaderMap, Value)>>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("local addr");
        let url = format!("http://{}/api/chat", addr);

        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("upstream server error");
        });

        Self {
            url,
            requests,
            join,
        }
    }

    async fn last_request(&self) -> (HeaderMap, Value) {
        let guard = self.requests.lock().await;
        guard
            .last()
            .cloned()
            .unwrap_or_else(|| (HeaderMap::new(), json!({})))
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.join.abort();
    }
}

fn state_for(upstream: &MockUpstream) -> AppState {
    state_with_timeout(upstream, Duration::from_secs(5))
}

fn state_with_timeout(upstream: &MockUpstream, timeout: Duration) -> AppState {
    let client = UpstreamClient::new(reqwest::Client::new(), upstream.url.clone(), timeout);
    AppState::new(client, ModelMap::builtin())
}

const HEL: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
const LO: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n";
const DONE: &str = "data: [DONE]\n\n";

#[actix_web::test]
async fn buffered_request_returns_accumulated_text() {
    // Lines split mid-JSON across body frames.
    let upstream = MockUpstream::start(
        StatusCode::OK,
        vec![
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":",
            "{\"content\":\"lo\"}}]}\n\n",
            DONE,
        ],
    )
    .await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({
            "model": "grok-3",
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 0.5
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "grok-3");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");

    let (headers, forwarded) = upstream.last_request().await;
    assert_eq!(forwarded["model"], "grok3");
    assert_eq!(forwarded["temperature"], 0.5);
    assert_eq!(forwarded["messages"][0]["content"], "Hi");
    assert_eq!(headers["accept"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert!(headers["connection"]
        .to_str()
        .unwrap()
        .eq_ignore_ascii_case("keep-alive"));
    assert!(headers["user-agent"]
        .to_str()
        .unwrap()
        .starts_with("Mozilla/5.0"));
}

#[actix_web::test]
async fn streaming_request_relays_one_frame_per_line() {
    let upstream = MockUpstream::start(
        StatusCode::OK,
        vec![HEL, "data: {\"choices\":[{\"delta\":{\"con", "tent\":\"!\"}}]}\n\n", LO, DONE, DONE],
    )
    .await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "qwq-32b", "messages": [], "stream": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let frames: Vec<&str> = body.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 4);
    assert_eq!(
        body,
        format!(
            "{HEL}data: {{\"choices\":[{{\"delta\":{{\"content\":\"!\"}}}}]}}\n\n{LO}{DONE}"
        )
    );
    assert_eq!(body.matches("[DONE]").count(), 1);

    let (_, forwarded) = upstream.last_request().await;
    assert_eq!(forwarded["model"], "qwq32b");
    assert_eq!(forwarded["stream"], true);
}

#[actix_web::test]
async fn streaming_repairs_doubled_prefix() {
    let upstream = MockUpstream::start(
        StatusCode::OK,
        vec!["data: data: {\"x\":1}\n", ": keep-alive\n", DONE],
    )
    .await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"messages": [], "stream": true}))
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, Bytes::from_static(b"data: {\"x\":1}\n\ndata: [DONE]\n\n"));

    let (_, forwarded) = upstream.last_request().await;
    assert_eq!(forwarded["model"], "deepseek70b");
}

#[actix_web::test]
async fn empty_upstream_body_is_bad_gateway() {
    let upstream = MockUpstream::start(StatusCode::OK, vec![]).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Empty response from API");
}

#[actix_web::test]
async fn upstream_rejection_keeps_status_and_body() {
    let upstream =
        MockUpstream::start(StatusCode::TOO_MANY_REQUESTS, vec!["rate limited"]).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": [], "stream": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 429);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "rate limited");
}

#[actix_web::test]
async fn buffered_falls_back_to_whole_body_content() {
    let upstream =
        MockUpstream::start(StatusCode::OK, vec!["{\"content\":", "\"plain reply\"}"]).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": []}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["choices"][0]["message"]["content"], "plain reply");
}

#[actix_web::test]
async fn buffered_unparsable_body_is_bad_gateway_with_snippet() {
    let upstream =
        MockUpstream::start(StatusCode::OK, vec!["<html>upstream maintenance</html>"]).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = test::read_body_json(resp).await;
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("<html>upstream maintenance</html>"));
}

#[actix_web::test]
async fn malformed_line_between_valid_lines_is_skipped() {
    let upstream = MockUpstream::start(
        StatusCode::OK,
        vec![HEL, "data: {\"choices\": [oops\n\n", LO, DONE],
    )
    .await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_for(&upstream)))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": []}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
}

#[actix_web::test]
async fn upstream_silent_past_timeout_is_server_error() {
    let upstream = MockUpstream::stalling(None, Duration::from_secs(3), DONE).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with_timeout(
                &upstream,
                Duration::from_millis(300),
            )))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": [], "stream": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 500);
}

#[actix_web::test]
async fn timeout_does_not_bound_stream_after_first_byte() {
    let upstream = MockUpstream::stalling(Some(HEL), Duration::from_millis(900), DONE).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with_timeout(
                &upstream,
                Duration::from_millis(300),
            )))
            .configure(config_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "grok-3", "messages": [], "stream": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    assert_eq!(body, Bytes::from(format!("{HEL}{DONE}")));
}
