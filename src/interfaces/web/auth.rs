use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::warn;

use super::AppState;
use crate::core::error::PipelineError;

/// Upper bound for stateless request bodies; query results travel inline.
pub(crate) const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Checks the `client_secret` field of a JSON body against the configured
/// secret before the handler runs. An unset or empty server secret rejects
/// every request.
pub async fn require_client_secret(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response(),
    };

    let presented = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|body| body.get("client_secret")?.as_str().map(str::to_string));

    let expected = state.client_secret.as_deref().unwrap_or_default();
    match presented {
        Some(secret) if !expected.is_empty() && secret == expected => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        _ => {
            warn!("Rejected {} with missing or invalid client secret", parts.uri.path());
            PipelineError::Auth.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::router::build_router;
    use crate::interfaces::web::test_support::test_state;
    use axum::{Router, middleware, routing::post};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route("/ping", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                super::require_client_secret,
            ))
            .with_state(state)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, String) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build");
        let res = app.oneshot(req).await.expect("oneshot should succeed");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn matching_secret_reaches_handler_with_body_intact() {
        let (state, _) = test_state(Some("s3cret"), None);
        let body = json!({ "client_secret": "s3cret", "queryResults": [1, 2] });
        let (status, echoed) = post_json(protected_app(state), "/ping", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&echoed).unwrap(), body);
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_forbidden() {
        let (state, _) = test_state(Some("s3cret"), None);
        for body in [
            json!({ "client_secret": "guess" }),
            json!({ "queryResults": [] }),
            json!({ "client_secret": 42 }),
        ] {
            let (status, text) = post_json(protected_app(state.clone()), "/ping", body).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert!(text.contains("Forbidden: Invalid client secret"));
        }
    }

    #[tokio::test]
    async fn unset_server_secret_rejects_everything() {
        let (state, _) = test_state(None, None);
        let (status, _) =
            post_json(protected_app(state), "/ping", json!({ "client_secret": "" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (state, _) = test_state(Some(""), None);
        let (status, _) =
            post_json(protected_app(state), "/ping", json!({ "client_secret": "" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rejected_requests_never_call_the_model() {
        let (state, llm) = test_state(Some("s3cret"), Some("[]"));
        for uri in [
            "/generateQuerySummary",
            "/generateSummary",
            "/generateQuerySuggestions",
        ] {
            let (status, _) = post_json(
                build_router(state.clone()),
                uri,
                json!({ "client_secret": "wrong", "queryResults": [], "querySummaries": [] }),
            )
            .await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        }
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn non_json_body_is_forbidden() {
        let (state, _) = test_state(Some("s3cret"), None);
        let req = Request::builder()
            .method("POST")
            .uri("/ping")
            .body(Body::from("client_secret=s3cret"))
            .unwrap();
        let res = protected_app(state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
