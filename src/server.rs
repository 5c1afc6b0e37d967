//! Slack Events API receiver.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/slack/events` | Signed event callbacks from Slack |
//! | `GET`  | `/health` | Health check (version and model size) |
//!
//! Every `/slack/events` request must carry a valid `X-Slack-Signature`:
//! `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}` keyed with the app's
//! signing secret, and an `X-Slack-Request-Timestamp` within five minutes
//! of the server clock.
//!
//! Slack expects an acknowledgement within three seconds, so `message`
//! events are acknowledged at once and answered on a spawned task.
//! Slack redelivers an event when a delivery was not acknowledged in time,
//! so events are deduplicated by `event_id`: a redelivery whose id was
//! already accepted is acknowledged and skipped, and one whose first
//! delivery never arrived is handled like any other.
//!
//! Error responses use the shape
//! `{ "error": { "code": "unauthorized", "message": "..." } }`.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::bot::Responder;
use crate::cache::RecentIds;
use crate::config::Config;
use crate::embedding::create_encoder;
use crate::message::Message;
use crate::model::QaModel;
use crate::ocr::TesseractOcr;
use crate::slack::SlackWebClient;

type HmacSha256 = Hmac<Sha256>;

/// Oldest request timestamp accepted, in seconds.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

const SIGNATURE_HEADER: &str = "x-slack-signature";
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const RETRY_HEADER: &str = "x-slack-retry-num";

/// Event ids remembered for deduplication.
const SEEN_EVENT_CAPACITY: usize = 4096;

#[derive(Clone)]
struct AppState {
    responder: Arc<Responder>,
    signing_secret: Arc<str>,
    seen_events: Arc<RecentIds>,
}

/// Load the model, connect to Slack and serve events until terminated.
///
/// Reads `SLACK_BOT_TOKEN` and `SLACK_SIGNING_SECRET` from the environment.
pub async fn run_server(config: &Config) -> Result<()> {
    let token = require_env("SLACK_BOT_TOKEN")?;
    let signing_secret = require_env("SLACK_SIGNING_SECRET")?;

    let encoder = create_encoder(&config.embedding).await?;
    let model = QaModel::load(&config.model.path, encoder)
        .with_context(|| format!("Failed to load model from {}", config.model.path.display()))?
        .with_ocr(Arc::new(TesseractOcr::new(&config.ocr)));
    let answers = model.state().map(|s| s.len()).unwrap_or(0);

    let transport = SlackWebClient::new(
        token,
        Duration::from_secs(config.responder.image_fetch_timeout_secs),
    )?;
    let responder = Arc::new(Responder::new(
        Arc::new(model),
        Arc::new(transport),
        config.responder.clone(),
    ));

    let app = router(responder, &signing_secret);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, answers, "listening for slack events");
    axum::serve(listener, app).await?;

    Ok(())
}

/// The HTTP routes, for embedding in another server or in tests.
pub fn router(responder: Arc<Responder>, signing_secret: &str) -> Router {
    let state = AppState {
        responder,
        signing_secret: Arc::from(signing_secret),
        seen_events: Arc::new(RecentIds::new(SEEN_EVENT_CAPACITY)),
    };
    Router::new()
        .route("/slack/events", post(handle_events))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} is not set", name))
}

// ============ Request signing ============

/// The `X-Slack-Signature` value for a request.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let mac = base_mac(signing_secret, timestamp, body)?;
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a request signature and its timestamp against `now` (unix seconds).
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > MAX_REQUEST_AGE_SECS {
        return false;
    }
    let Some(expected) = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };
    match base_mac(signing_secret, timestamp, body) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn base_mac(signing_secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing secret: {}", e))?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ POST /slack/events ============

/// Outer Events API payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventEnvelope {
    UrlVerification { challenge: String },
    EventCallback {
        event: Value,
        #[serde(default)]
        event_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Serialize)]
struct ChallengeResponse {
    challenge: String,
}

/// The message carried by an inner event, if it is a `message` event.
fn message_event(event: &Value) -> Option<Message> {
    if event.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    match serde_json::from_value(event.clone()) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable message event");
            None
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn handle_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let timestamp = header(&headers, TIMESTAMP_HEADER).ok_or_else(|| unauthorized("missing request timestamp"))?;
    let signature = header(&headers, SIGNATURE_HEADER).ok_or_else(|| unauthorized("missing request signature"))?;
    let now = chrono::Utc::now().timestamp();
    if !verify_signature(&state.signing_secret, timestamp, &body, signature, now) {
        tracing::warn!("rejected event with invalid signature");
        return Err(unauthorized("invalid request signature"));
    }

    let envelope: EventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid event payload: {}", e)))?;

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            Ok(Json(ChallengeResponse { challenge }).into_response())
        }
        EventEnvelope::EventCallback { event, event_id } => {
            let retry = header(&headers, RETRY_HEADER);
            if let Some(id) = event_id.as_deref() {
                if !state.seen_events.first_sighting(id) {
                    tracing::debug!(event_id = id, retry, "skipping duplicate event");
                    return Ok(StatusCode::OK.into_response());
                }
            }
            if let Some(retry) = retry {
                tracing::debug!(retry, "handling redelivered event");
            }
            if let Some(message) = message_event(&event) {
                let responder = state.responder.clone();
                tokio::spawn(async move {
                    if let Err(e) = responder.handle_message(&message).await {
                        tracing::warn!(error = %format!("{:#}", e), "failed to handle message");
                    }
                });
            }
            Ok(StatusCode::OK.into_response())
        }
        EventEnvelope::Other => Ok(StatusCode::OK.into_response()),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    answers: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        answers: state
            .responder
            .model()
            .state()
            .map(|s| s.len())
            .unwrap_or(0),
    })
}
