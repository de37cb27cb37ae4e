use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use hearth_session::{decode_body, SessionManager, REPLICATION_PATH};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route(REPLICATION_PATH, post(replicate))
        .route("/", get(home))
        .with_state(state)
}

/// Heartbeat target. The two-byte body is part of the probe contract.
async fn ping() -> &'static str {
    "OK"
}

/// Applies replication traffic from a peer. Applied writes and deletes
/// are local only; re-broadcasting here would loop forever.
async fn replicate(State(state): State<AppState>, body: String) -> Response {
    match decode_body(&body) {
        Ok(action) => {
            state.sessions.store().apply(action);
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => {
            warn!("rejecting replication request: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Demo page: creates or resumes the request's session and counts visits.
async fn home(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_id_from_cookies);

    let existing = session_id
        .as_deref()
        .and_then(|id| state.sessions.get_session(id));
    let (mut session, fresh) = match existing {
        Some(session) => (session, false),
        None => {
            debug!("no resumable session, creating one");
            (state.sessions.create_session(), true)
        }
    };

    let visits = session
        .get_attribute("visits")
        .and_then(attribute_count)
        .unwrap_or(0)
        + 1;
    session.set_attribute("visits", Value::from(visits));
    state.sessions.store().save(&session);

    let body = format!("session={} visits={}\n", session.id(), visits);
    let mut response = (StatusCode::OK, body).into_response();
    if fresh {
        let cookie = format!("JSESSIONID={}; Path=/", session.id());
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// A replicated counter may come back as a stringified number.
fn attribute_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn session_id_from_cookies(value: &str) -> Option<String> {
    for cookie in value.split(';') {
        if let Some((key, val)) = cookie.split_once('=') {
            if key.trim() == "JSESSIONID" && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}
