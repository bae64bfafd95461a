use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::events::WebhookRequest;
use crate::pipeline::{self, AppState};
use crate::signature::{self, SignatureCheck};

const SIGNATURE_HEADER: &str = "x-line-signature";

#[derive(Serialize)]
struct WebhookResponse {
    success: bool,
    #[serde(rename = "eventsProcessed")]
    events_processed: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    // Permissive CORS so the platform's OPTIONS preflight always passes
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Webhook server listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// The webhook entry point. The signature is checked against the raw
/// body bytes before anything is decoded; only then is the batch parsed
/// and each event processed behind its own error boundary.
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if signature::verify(&state.config.line.channel_secret, &body, header)
        == SignatureCheck::Rejected
    {
        warn!("webhook rejected: bad or missing signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let request: WebhookRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            error!("malformed webhook body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // A zero-event body is the platform's connectivity check; it falls
    // through to an empty loop and a 200.
    let mut events_processed = 0;
    for event in &request.events {
        if let Err(e) = pipeline::process_event(&state, event).await {
            error!("event processing failed: {e:#}");
        }
        events_processed += 1;
    }

    (
        StatusCode::OK,
        Json(WebhookResponse {
            success: true,
            events_processed,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_config, MockDispatcher, MockStore};

    fn make_state(store: MockStore) -> (Arc<AppState>, Arc<MockStore>, Arc<MockDispatcher>) {
        let store = Arc::new(store);
        let replies = Arc::new(MockDispatcher::default());
        let state = Arc::new(AppState {
            config: test_config(),
            store: store.clone(),
            replies: replies.clone(),
        });
        (state, store, replies)
    }

    fn signed_headers(body: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = signature::sign("test-secret", body.as_bytes());
        headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        headers
    }

    fn batch_with_text(text: &str) -> String {
        serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": "tok-1",
                "source": {"type": "user", "userId": "U1"},
                "message": {"type": "text", "id": "m1", "text": text}
            }]
        })
        .to_string()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_expense_recorded() {
        let (state, store, replies) = make_state(MockStore::default());
        let body = batch_with_text("ค่าเช่า 3000 บาท");

        let response =
            handle_webhook(State(state), signed_headers(&body), Bytes::from(body.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["eventsProcessed"], 1);

        assert_eq!(store.insert_count(), 1);
        let inserted = &store.inserted.lock().unwrap()[0];
        assert_eq!(inserted.amount, 3000.0);
        assert_eq!(inserted.category, "rental");

        assert_eq!(replies.reply_count(), 1);
        let text = replies.last_text().unwrap();
        assert!(text.contains("3000"));
        assert!(text.contains("บันทึก"));
        assert!(text.contains("เรียบร้อย"));
    }

    #[tokio::test]
    async fn test_bad_signature_is_401_and_nothing_runs() {
        let (state, store, replies) = make_state(MockStore::default());
        let body = batch_with_text("ค่าไฟ 500 บาท");

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, "bm90LXRoZS1zaWduYXR1cmU=".parse().unwrap());

        let response = handle_webhook(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.insert_count(), 0);
        assert_eq!(replies.reply_count(), 0);
        assert!(store.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_is_401() {
        let (state, _store, _replies) = make_state(MockStore::default());
        let body = batch_with_text("ค่าไฟ 500 บาท");

        let response = handle_webhook(State(state), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_json_is_500() {
        let (state, _store, _replies) = make_state(MockStore::default());
        let body = "{not json";

        let response =
            handle_webhook(State(state), signed_headers(body), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_zero_event_verification_body() {
        let (state, store, _replies) = make_state(MockStore::default());
        let body = r#"{"events":[]}"#;

        let response =
            handle_webhook(State(state), signed_headers(body), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["eventsProcessed"], 0);
        assert_eq!(store.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_body_hits_duplicate_branch() {
        let (state, store, replies) = make_state(MockStore::default());
        let body = batch_with_text("ค่าไฟ 500 บาท");

        let first = handle_webhook(
            State(state.clone()),
            signed_headers(&body),
            Bytes::from(body.clone()),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        let second =
            handle_webhook(State(state), signed_headers(&body), Bytes::from(body.clone())).await;
        assert_eq!(second.status(), StatusCode::OK);

        assert_eq!(store.insert_count(), 1, "redelivery must not insert again");
        assert_eq!(replies.reply_count(), 2);
        assert!(replies.last_text().unwrap().contains("แล้ว"));
    }

    #[tokio::test]
    async fn test_one_failing_event_does_not_abort_the_batch() {
        // First event triggers a failing stock command, second is a
        // normal expense; both count as processed and the insert lands.
        let store = MockStore {
            fail_inventory: true,
            ..MockStore::default()
        };
        let (state, store, replies) = make_state(store);
        let body = serde_json::json!({
            "events": [
                {
                    "type": "message",
                    "replyToken": "tok-1",
                    "source": {"type": "user", "userId": "U1"},
                    "message": {"type": "text", "id": "m1", "text": "พอส สต็อก"}
                },
                {
                    "type": "message",
                    "replyToken": "tok-2",
                    "source": {"type": "user", "userId": "U1"},
                    "message": {"type": "text", "id": "m2", "text": "ค่าไฟ 500 บาท"}
                }
            ]
        })
        .to_string();

        let response =
            handle_webhook(State(state), signed_headers(&body), Bytes::from(body.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["eventsProcessed"], 2);

        assert_eq!(store.insert_count(), 1);
        assert_eq!(replies.reply_count(), 1);
        assert!(replies.last_text().unwrap().contains("บันทึก"));
    }
}
