use axum::{
    body::{to_bytes, Body},
    extract::{Path, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::kv::SharedStore;

/// Uniform reply wrapper. Every endpoint, success or error, answers
/// with `{"status": <code>, "data": <payload>}`, and the outer HTTP
/// status code mirrors the `status` field.
#[derive(Debug, Serialize)]
pub struct Envelope {
    status: u16,
    data: Value,
}

impl Envelope {
    fn new(status: StatusCode, data: impl Into<Value>) -> Self {
        Self {
            status: status.as_u16(),
            data: data.into(),
        }
    }

    fn ok(data: impl Into<Value>) -> Self {
        Self::new(StatusCode::OK, data)
    }

    fn invalid_method(method: &Method) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("invalid method {method}"),
        )
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match serde_json::to_vec_pretty(&self) {
            Ok(body) => (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            // Can't happen for plain JSON values, but a request must
            // never go unanswered.
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error forming response")
                .into_response(),
        }
    }
}

/// Body accepted by POST /{key}. The field is optional only so that
/// its absence can be reported with a dedicated message; a request
/// without it is still rejected.
#[derive(Debug, Deserialize)]
struct SetRequest {
    value: Option<String>,
}

/// Build the KV routes. Both the root and the key paths accept any
/// method; discrimination happens in the handlers so that 405 replies
/// carry the envelope like everything else.
pub fn routes(store: SharedStore) -> Router {
    Router::new()
        .route("/", any(index))
        .route("/*key", any(key_op))
        .with_state(store)
}

//
// ─────────────────────────────────────────────────────────────
// GET /
// Store metrics. Any other method is a 405.
// ─────────────────────────────────────────────────────────────
//
async fn index(State(store): State<SharedStore>, method: Method) -> Envelope {
    if method == Method::GET {
        Envelope::ok(json!(store.metrics()))
    } else {
        Envelope::invalid_method(&method)
    }
}

//
// ─────────────────────────────────────────────────────────────
// GET /{key}   → value or 404
// POST /{key}  → set value, persist on change
// other        → 405
// ─────────────────────────────────────────────────────────────
//
async fn key_op(
    Path(key): Path<String>,
    State(store): State<SharedStore>,
    req: Request,
) -> Envelope {
    let method = req.method().clone();
    if method == Method::GET {
        retrieve_key(&store, &key)
    } else if method == Method::POST {
        upload_key(&store, &key, req.into_body()).await
    } else {
        Envelope::invalid_method(&method)
    }
}

/// Look up `key` in the store, returning its value or a 404.
fn retrieve_key(store: &SharedStore, key: &str) -> Envelope {
    match store.get(key) {
        Some(record) => Envelope::ok(record.value),
        None => Envelope::new(
            StatusCode::NOT_FOUND,
            format!("key '{key}' doesn't exist in the store"),
        ),
    }
}

/// Read the new value for `key` from the request body, update the
/// store, and persist on change.
///
/// An unreadable body, invalid JSON, or a missing `value` field is a
/// 400. A persistence failure is a 500; the in-memory mutation is
/// deliberately not rolled back, and the failure stays visible in the
/// metrics until a later persist succeeds.
async fn upload_key(store: &SharedStore, key: &str, body: Body) -> Envelope {
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => return Envelope::new(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let request: SetRequest = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => return Envelope::new(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let value = match request.value {
        Some(v) => v,
        None => {
            return Envelope::new(
                StatusCode::BAD_REQUEST,
                format!("no value provided for key {key}"),
            )
        }
    };

    if store.set(key, &value) {
        if let Err(e) = store.persist() {
            tracing::error!("failed to persist store: {e}");
            return Envelope::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server encountered an error storing the key / value pairs",
            );
        }
    }

    Envelope::ok("")
}
