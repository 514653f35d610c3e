pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::evaluation::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Evaluation batches
        .route("/api/v1/evaluations", post(handlers::handle_start_evaluation))
        .route(
            "/api/v1/evaluations/:batch_id",
            get(handlers::handle_get_evaluation),
        )
        .route(
            "/api/v1/evaluations/:batch_id/cancel",
            post(handlers::handle_cancel_evaluation),
        )
        // Persisted sessions across batches
        .route("/api/v1/sessions", get(handlers::handle_list_sessions))
        // Operator view of the credential pool
        .route("/api/v1/credentials", get(handlers::handle_list_credentials))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::evaluation::error::Defect;
    use crate::evaluation::session::{EvaluationSession, SessionFailure};
    use crate::evaluation::testing::ScriptedInvoker;
    use crate::storage::{InMemorySessionStore, SessionStore};

    fn app() -> Router {
        app_with_store(Arc::new(InMemorySessionStore::new()))
    }

    fn app_with_store(store: Arc<InMemorySessionStore>) -> Router {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENROUTER_API_KEY_1", "sk-test-1"),
            ("OPENROUTER_API_KEY_2", "sk-test-2"),
            ("MAX_RESUMES_PER_BATCH", "3"),
            ("RETRY_BACKOFF_BASE_MS", "0"),
            ("RETRY_BACKOFF_MAX_MS", "0"),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        let state = AppState::build(
            config,
            Arc::new(ScriptedInvoker::happy()),
            store,
        );
        build_router(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn batch_body(candidates: usize) -> Value {
        json!({
            "job_description": "3+ years backend",
            "candidates": (0..candidates)
                .map(|i| json!({ "filename": format!("cand_{i}.txt"), "text": "5 years Python, BS CS" }))
                .collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["credentials"], 2);
        assert_eq!(body["credential_reports"], 0);
    }

    #[tokio::test]
    async fn test_start_then_poll_until_finished() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/v1/evaluations", Some(batch_body(2))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total"], 2);
        let batch_id = body["batch_id"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..100 {
            let (status, body) =
                send(&app, "GET", &format!("/api/v1/evaluations/{batch_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            last = body;
            if last["status"] == "finished" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "finished");
        assert_eq!(last["progress"]["succeeded"], 2);
        let sessions = last["result"]["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0]["state"], "COMPLETE");
        assert_eq!(
            sessions[0]["final_evaluation"]["qualification_tag"],
            "QUALIFIED"
        );
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let (status, body) = send(&app(), "POST", "/api/v1/evaluations", Some(batch_body(4))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "UNPROCESSABLE_ENTITY");
    }

    #[tokio::test]
    async fn test_empty_job_description_rejected() {
        let body = json!({ "job_description": " ", "candidates": [{ "filename": "a.txt", "text": "x" }] });
        let (status, body) = send(&app(), "POST", "/api/v1/evaluations", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let uri = format!("/api/v1/evaluations/{}/cancel", Uuid::new_v4());
        let (status, body) = send(&app(), "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_credentials_snapshot_is_redacted() {
        let (status, body) = send(&app(), "GET", "/api/v1/credentials", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], 2);
        assert_eq!(body["credentials"][0]["id"], "key-1");
        assert_eq!(body["credentials"][0]["status"], "ACTIVE");
        assert!(!body.to_string().contains("sk-test"));
    }

    #[tokio::test]
    async fn test_batch_missing_from_registry_is_served_from_store() {
        let store = Arc::new(InMemorySessionStore::new());
        let batch_id = Uuid::new_v4();
        let mut unreadable = EvaluationSession::new(batch_id, "scan.pdf");
        unreadable.position = 1;
        unreadable.fail(SessionFailure::before_stages(Defect::UnreadableDocument));
        let mut cancelled = EvaluationSession::new(batch_id, "ada.txt");
        cancelled.cancel();
        store.persist(&unreadable).await.unwrap();
        store.persist(&cancelled).await.unwrap();
        let app = app_with_store(store);

        let (status, body) =
            send(&app, "GET", &format!("/api/v1/evaluations/{batch_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "finished");
        assert_eq!(body["progress"]["total"], 2);
        assert_eq!(body["progress"]["failed"], 1);
        assert_eq!(body["progress"]["cancelled"], 1);
        let sessions = body["result"]["sessions"].as_array().unwrap();
        assert_eq!(sessions[0]["filename"], "ada.txt");
        assert_eq!(sessions[1]["filename"], "scan.pdf");

        let uri = format!("/api/v1/evaluations/{}", Uuid::new_v4());
        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recent_sessions_listing_respects_limit() {
        let store = Arc::new(InMemorySessionStore::new());
        for name in ["a.txt", "b.txt", "c.txt"] {
            let mut session = EvaluationSession::new(Uuid::new_v4(), name);
            session.cancel();
            store.persist(&session).await.unwrap();
        }
        let app = app_with_store(store);

        let (status, body) = send(&app, "GET", "/api/v1/sessions?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"].as_array().unwrap().len(), 2);
        assert!(body["statistics"].is_object());

        let (_, body) = send(&app, "GET", "/api/v1/sessions", None).await;
        assert_eq!(body["sessions"].as_array().unwrap().len(), 3);
    }
}
