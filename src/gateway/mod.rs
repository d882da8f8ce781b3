/// HTTP surface for the gateway: health, an OpenAI-compatible
/// chat-completions endpoint, generic webhook receivers, Prometheus metrics,
/// and a minimal config dashboard. Built around the Coordinator as the
/// single inbound-message entry point instead of an `mpsc`/`oneshot`
/// request-response bus — the Coordinator already returns the reply
/// synchronously, so no pending-request map is needed.
use crate::config::schema::{AgentConfig, ConfigSnapshot};
use crate::coordinator::RequestCoordinator;
use crate::message::{Message, Metadata, UserId};
use crate::metrics::Metrics;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct GatewayState {
    pub coordinator: Arc<RequestCoordinator>,
    pub config: Arc<RwLock<ConfigSnapshot>>,
    pub metrics: Option<Arc<Metrics>>,
    pub started_at: Instant,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/hooks/{*path}", post(hooks_handler))
        .route("/metrics", get(metrics_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/dashboard/config", get(dashboard_config_handler).post(config_update_handler))
        .route("/api/config", get(api_config_handler).post(config_update_handler))
        .with_state(state)
}

/// Binds and serves the HTTP API on its own task. The caller owns the
/// returned `JoinHandle` and is responsible for aborting it during shutdown:
/// the Coordinator's own `shutdown()` only drains already-accepted
/// requests, it does not stop the listener.
pub async fn start(host: &str, port: u16, state: GatewayState) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "gateway HTTP API listening");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "gateway HTTP server exited with an error");
        }
    }))
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let config = state.config.read().await;
    let has_router = has_configured_router(&state).await;

    let channels: Vec<&String> = config.channels.iter().filter(|(_, c)| c.enabled).map(|(name, _)| name).collect();
    let body = json!({
        "ok": has_router,
        "version": crate::VERSION,
        "uptime": humantime::format_duration(state.started_at.elapsed()).to_string(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "sessions_count": state.coordinator.active_sessions_count().await,
        "tools_registered": state.coordinator.tool_count().await,
        "browser_available": config.browser.enabled,
        "channels": channels,
        "last_message_at": state.coordinator.last_message_at_millis(),
        "agent": if has_router { Some(json!({"provider": config.agent.provider, "model": config.agent.model})) } else { None },
    });
    let status = if has_router { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

/// Whether a Router is currently installed. `RequestCoordinator` does not
/// expose its hot Router directly (only through `process_message`), so this
/// is inferred from whether the health-check config snapshot's `agent`
/// section names a provider.
async fn has_configured_router(state: &GatewayState) -> bool {
    !state.config.read().await.agent.provider.trim().is_empty()
}

#[derive(Debug, Deserialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiChatMessage>,
    #[serde(default)]
    #[allow(dead_code)]
    max_tokens: Option<u32>,
    #[serde(default)]
    #[allow(dead_code)]
    temperature: Option<f32>,
    #[serde(default)]
    #[allow(dead_code)]
    top_p: Option<f32>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    user: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiChatResponse {
    id: String,
    object: String,
    created: i64,
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Serialize)]
struct OpenAiChoice {
    index: u32,
    message: OpenAiChoiceMessage,
    finish_reason: String,
}

#[derive(Debug, Serialize)]
struct OpenAiChoiceMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Serialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

fn openai_error(status: StatusCode, message: impl Into<String>, kind: &str) -> Response {
    (status, Json(OpenAiError { error: OpenAiErrorDetail { message: message.into(), kind: kind.to_string(), code: None } }))
        .into_response()
}

/// `chatcmpl-<24 lowercase hex chars>` (see `DESIGN.md` for the length
/// choice).
fn chat_completion_id() -> String {
    let hex: String = (0..24).map(|_| std::char::from_digit(fastrand::u32(0..16), 16).unwrap()).collect();
    format!("chatcmpl-{hex}")
}

/// Documented, fixed mapping: `gpt-4*`/`gpt-3.5*` remap to
/// the configured agent model; a name already prefixed with the configured
/// provider passes through unchanged; anything else also falls back to the
/// configured default, since there is no other model this gateway can serve.
fn resolve_model(requested: &str, agent: &AgentConfig) -> String {
    if requested.starts_with("gpt-4") || requested.starts_with("gpt-3.5") {
        return agent.model.clone();
    }
    if !agent.provider.is_empty() && requested.starts_with(agent.provider.as_str()) {
        return requested.to_string();
    }
    agent.model.clone()
}

async fn chat_completions_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<OpenAiChatRequest>,
) -> Response {
    if !bearer_ok(&headers, None, &admin_token(&state).await) {
        return openai_error(StatusCode::UNAUTHORIZED, "missing or invalid bearer token", "authentication_error");
    }
    if body.stream.unwrap_or(false) {
        return openai_error(StatusCode::BAD_REQUEST, "streaming is not supported", "invalid_request_error");
    }
    let Some(last) = body.messages.last() else {
        return openai_error(StatusCode::BAD_REQUEST, "messages must not be empty", "invalid_request_error");
    };

    let agent = state.config.read().await.agent.clone();
    let model = resolve_model(&body.model, &agent);

    let user_id = match &body.user {
        Some(Value::String(s)) => s.clone(),
        Some(v) => UserId::from_value(v).map(|u| u.as_key()).unwrap_or_else(|| "anonymous".to_string()),
        None => "anonymous".to_string(),
    };
    let mut message = Message::user("api", user_id.clone(), last.content.clone());
    message.metadata = Metadata::new().with_user_id(UserId::Text(user_id));

    let reply = state.coordinator.process_message(message).await;
    let prompt_tokens = reply.metadata.input_tokens.unwrap_or(0);
    let completion_tokens = reply.metadata.output_tokens.unwrap_or(0);

    let response = OpenAiChatResponse {
        id: chat_completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model,
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiChoiceMessage { role: "assistant".to_string(), content: reply.text },
            finish_reason: "stop".to_string(),
        }],
        usage: OpenAiUsage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens },
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// POST /hooks/{*path} — arbitrary JSON receiver. Deliberately minimal (no
/// per-hook templates or delivery targets in this crate's config schema):
/// validate the bearer token, log the payload's arrival, acknowledge. A
/// future sub-agent or
/// channel integration can observe hook traffic by wrapping this handler.
async fn hooks_handler(
    State(state): State<GatewayState>,
    axum::extract::Path(path): axum::extract::Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let token = state.config.read().await.hooks.bearer_token.clone();
    if !bearer_ok(&headers, None, &token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    info!(path, bytes = body.len(), "received webhook payload");
    let _ = payload;
    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

async fn metrics_handler(State(state): State<GatewayState>, headers: HeaderMap, query: Query<HashMap<String, String>>) -> Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let token = state.config.read().await.metrics.bearer_token.clone();
    if token.is_some() && !bearer_ok(&headers, query.get("token"), &token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    metrics.render().into_response()
}

fn admin_auth_ok(state: &GatewayState, headers: &HeaderMap, query: &HashMap<String, String>, token: &Option<String>) -> bool {
    let _ = state;
    bearer_ok(headers, query.get("token"), token)
}

async fn admin_token(state: &GatewayState) -> Option<String> {
    state.config.read().await.admin.bearer_token.clone()
}

async fn dashboard_handler(State(state): State<GatewayState>, headers: HeaderMap, query: Query<HashMap<String, String>>) -> Response {
    let token = admin_token(&state).await;
    if !admin_auth_ok(&state, &headers, &query, &token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let sessions = state.coordinator.active_sessions_count().await;
    let agents = state.coordinator.subagents().list().await;
    let tools = state.coordinator.tool_count().await;
    let html = format!(
        "<html><head><title>waygate</title></head><body>\
         <h1>waygate dashboard</h1>\
         <p>version {version}</p>\
         <p>active sessions: {sessions}</p>\
         <p>tools registered: {tools}</p>\
         <p>tracked sub-agents: {agents}</p>\
         <p><a href=\"/dashboard/config\">config</a></p>\
         </body></html>",
        version = crate::VERSION,
        sessions = sessions,
        tools = tools,
        agents = agents.len(),
    );
    Html(html).into_response()
}

async fn dashboard_config_handler(State(state): State<GatewayState>, headers: HeaderMap, query: Query<HashMap<String, String>>) -> Response {
    let token = admin_token(&state).await;
    if !admin_auth_ok(&state, &headers, &query, &token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let config = state.config.read().await.clone();
    Json(redact_config(&config)).into_response()
}

async fn api_config_handler(State(state): State<GatewayState>, headers: HeaderMap, query: Query<HashMap<String, String>>) -> Response {
    dashboard_config_handler(State(state), headers, query).await
}

/// Config is edited on disk and picked up by the Watcher; this gateway does
/// not accept live config mutation over HTTP. POSTs are
/// acknowledged so existing admin tooling built against the route contract
/// does not hard-fail, but are explicitly advisory only.
async fn config_update_handler(State(state): State<GatewayState>, headers: HeaderMap, query: Query<HashMap<String, String>>) -> Response {
    let token = admin_token(&state).await;
    if !admin_auth_ok(&state, &headers, &query, &token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "ok": true,
        "note": "configuration is edited on disk; changes are picked up automatically by the config watcher",
    }))
    .into_response()
}

fn redact_config(config: &ConfigSnapshot) -> Value {
    let mut value = serde_json::to_value(config).unwrap_or(Value::Null);
    for pointer in ["/hooks/bearer_token", "/metrics/bearer_token", "/admin/bearer_token"] {
        if let Some(field) = value.pointer_mut(pointer) {
            if !field.is_null() {
                *field = Value::String("***".to_string());
            }
        }
    }
    if let Some(Value::Object(channels)) = value.get_mut("channels") {
        for (_, channel) in channels.iter_mut() {
            if let Some(token) = channel.get_mut("token") {
                if !token.is_null() {
                    *token = Value::String("***".to_string());
                }
            }
        }
    }
    value
}

/// Constant-time bearer check against either an `Authorization: Bearer
/// <token>` header or a `?token=` query parameter. Endpoints gated behind a
/// configured token fail closed when no token is configured at all (there
/// is no credential an operator could present that would be valid).
fn bearer_ok(headers: &HeaderMap, query_token: Option<&String>, configured: &Option<String>) -> bool {
    let Some(expected) = configured else {
        return false;
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query_token.cloned());
    match presented {
        Some(presented) => presented.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => {
            warn!("request missing bearer credential on a gated endpoint");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelFacade, DefaultCommandHandler};
    use crate::config::schema::AdminConfig;
    use crate::coordinator::CoordinatorDeps;
    use crate::heartbeat::Heartbeat;
    use crate::providers::MockProvider;
    use crate::ratelimit::RateLimiter;
    use crate::router::AgentRouter;
    use crate::session::SessionManager;
    use crate::subagent::{SubagentManager, SubagentManagerConfig, SubagentRunner};
    use crate::tools::ToolRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct NoopRunner;
    #[async_trait::async_trait]
    impl SubagentRunner for NoopRunner {
        async fn run(&self, task: &str, _sp: &str, _tools: Arc<ToolRegistry>, _max_iterations: u32) -> anyhow::Result<String> {
            Ok(format!("done: {task}"))
        }
    }

    fn test_state(configured_router: bool, admin_token: Option<&str>) -> GatewayState {
        let tools = Arc::new(ToolRegistry::new());
        let sessions: Arc<dyn crate::session::SessionStore> = Arc::new(SessionManager::new(None));
        let on_complete: crate::subagent::CompletionCallback = Arc::new(|_e| Box::pin(async move {}));
        let subagents = SubagentManager::new(Arc::new(NoopRunner), tools.clone(), on_complete, SubagentManagerConfig::default());
        let deps = CoordinatorDeps {
            sessions,
            tools: tools.clone(),
            subagents,
            heartbeat: Arc::new(Heartbeat::new(false, Duration::from_secs(60))),
            channels: Arc::new(ChannelFacade::new()),
            metrics: None,
        };
        let router = if configured_router {
            Some(Arc::new(AgentRouter::new(Arc::new(MockProvider::single_reply("hello from waygate")), tools.clone(), "sys")))
        } else {
            None
        };
        let command_handler = Arc::new(DefaultCommandHandler::new(deps.subagents.clone()));
        let coordinator = Arc::new(RequestCoordinator::new(deps, router, None, Arc::new(RateLimiter::new(0)), command_handler));

        let mut config = ConfigSnapshot::default();
        config.admin = AdminConfig { bearer_token: admin_token.map(str::to_string), overflow: Default::default() };
        if configured_router {
            config.agent.provider = "anthropic".to_string();
            config.agent.model = "claude-test".to_string();
        }

        GatewayState { coordinator, config: Arc::new(RwLock::new(config)), metrics: None, started_at: Instant::now() }
    }

    #[tokio::test]
    async fn health_reports_503_without_router() {
        let app = build_router(test_state(false, None));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_200_with_router() {
        let app = build_router(test_state(true, None));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn chat_completions_requires_bearer() {
        let app = build_router(test_state(true, Some("secret-token")));
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_completions_happy_path_matches_literal_scenario() {
        let app = build_router(test_state(true, Some("secret-token")));
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", "Bearer secret-token")
            .body(Body::from(r#"{"model":"gpt-4","messages":[{"role":"user","content":"Hello"}]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        let id = json["id"].as_str().unwrap();
        let re = regex::Regex::new(r"^chatcmpl-[0-9a-f]{24}$").unwrap();
        assert!(re.is_match(id), "id {id} did not match expected shape");
    }

    #[tokio::test]
    async fn chat_completions_rejects_streaming_and_empty_messages() {
        let app = build_router(test_state(true, Some("secret-token")));
        let stream_req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", "Bearer secret-token")
            .body(Body::from(r#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}],"stream":true}"#))
            .unwrap();
        let resp = app.clone().oneshot(stream_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let empty_req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", "Bearer secret-token")
            .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
            .unwrap();
        let resp = app.oneshot(empty_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn hooks_endpoint_requires_bearer_then_acks() {
        let mut state = test_state(true, Some("admin-token"));
        state.config.write().await.hooks.bearer_token = Some("hook-secret".to_string());
        let app = build_router(state);

        let unauthorized = Request::builder()
            .method("POST")
            .uri("/hooks/github")
            .body(Body::from(r#"{"event":"push"}"#))
            .unwrap();
        let resp = app.clone().oneshot(unauthorized).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let authorized = Request::builder()
            .method("POST")
            .uri("/hooks/github")
            .header("authorization", "Bearer hook-secret")
            .body(Body::from(r#"{"event":"push"}"#))
            .unwrap();
        let resp = app.oneshot(authorized).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn metrics_endpoint_open_when_unconfigured_token() {
        let mut state = test_state(true, None);
        state.metrics = Some(Arc::new(Metrics::install().unwrap_or_else(|_| {
            // process-wide recorder may already be installed by another test in this binary
            panic!("metrics install should only run once per test process")
        })));
        let app = build_router(state);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn dashboard_requires_admin_token_via_header_or_query() {
        let app = build_router(test_state(true, Some("admin-token")));

        let denied = Request::builder().uri("/dashboard").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(denied).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let via_query = Request::builder().uri("/dashboard?token=admin-token").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(via_query).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let via_header = Request::builder().uri("/dashboard").header("authorization", "Bearer admin-token").body(Body::empty()).unwrap();
        let resp = app.oneshot(via_header).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn model_remapping_matches_documented_rules() {
        let agent = AgentConfig { provider: "anthropic".to_string(), model: "claude-test".to_string(), ..Default::default() };
        assert_eq!(resolve_model("gpt-4", &agent), "claude-test");
        assert_eq!(resolve_model("gpt-3.5-turbo", &agent), "claude-test");
        assert_eq!(resolve_model("anthropic/claude-3", &agent), "anthropic/claude-3");
        assert_eq!(resolve_model("some-unknown-model", &agent), "claude-test");
    }
}
