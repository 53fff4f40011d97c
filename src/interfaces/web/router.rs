use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::auth::{self, MAX_BODY_BYTES};
use super::handlers::{suggestions, summaries};
use super::socket;

/// An empty origin list allows any origin.
fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    cors.allow_origin(origins)
}

async fn health() -> &'static str {
    "Dashboard summarization service is running"
}

pub(crate) fn build_router(state: AppState) -> Router {
    let guarded_routes = Router::new()
        .route(
            "/generateQuerySummary",
            post(summaries::generate_query_summary),
        )
        .route("/generateSummary", post(summaries::generate_summary))
        .route(
            "/generateQuerySuggestions",
            post(suggestions::generate_query_suggestions),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_client_secret,
        ));

    Router::new()
        .route("/", get(health))
        .route("/logs", get(super::sse_logs_endpoint))
        .route("/ws", get(socket::ws_handler))
        .merge(guarded_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(build_cors(&state.allowed_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::test_support::test_state;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_is_public() {
        let (state, _) = test_state(None, None);
        let res = build_router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn synthesis_endpoint_returns_markdown_summary() {
        let (state, llm) = test_state(Some("s3cret"), Some("```markdown\n## Summary of Findings\n```"));
        let (status, body) = post_json(
            build_router(state),
            "/generateSummary",
            json!({
                "client_secret": "s3cret",
                "queryResults": [{ "title": "Revenue by Region", "data": [] }],
                "querySummaries": [],
                "nextStepsInstructions": "be brief"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "summary": "## Summary of Findings" }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn null_instructions_are_treated_as_empty() {
        let (state, llm) = test_state(Some("s3cret"), Some("## Summary of Findings"));
        let (status, body) = post_json(
            build_router(state),
            "/generateSummary",
            json!({
                "client_secret": "s3cret",
                "queryResults": [{ "title": null, "data": [] }],
                "querySummaries": [],
                "nextStepsInstructions": null
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "## Summary of Findings");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn query_summary_endpoint_returns_an_object() {
        let (state, _) = test_state(Some("s3cret"), Some("{\"queryName\": \"Revenue\", \"summary\": \"up\"}"));
        let (status, body) = post_json(
            build_router(state),
            "/generateQuerySummary",
            json!({
                "client_secret": "s3cret",
                "description": "Sales",
                "query": { "title": "Revenue", "queryBody": { "model": "m", "view": "v" }, "queryData": [{ "a": 1 }] }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["queryName"], "Revenue");
    }

    #[tokio::test]
    async fn suggestions_in_prose_are_a_bad_gateway() {
        let (state, _) = test_state(Some("s3cret"), Some("Try looking at churn."));
        let (status, body) = post_json(
            build_router(state),
            "/generateQuerySuggestions",
            json!({ "client_secret": "s3cret" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "extraction_failure");
    }

    #[tokio::test]
    async fn model_failures_stay_generic() {
        let (state, _) = test_state(Some("s3cret"), None);
        let (status, body) = post_json(
            build_router(state),
            "/generateQuerySuggestions",
            json!({ "client_secret": "s3cret" }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal Server Error");
        assert_eq!(body["code"], "model_call_failure");
    }

    #[tokio::test]
    async fn configured_origins_are_echoed_for_preflight() {
        let (mut state, _) = test_state(Some("s3cret"), None);
        state.allowed_origins = vec!["https://bi.example.com".to_string()];
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/generateSummary")
            .header(header::ORIGIN, "https://bi.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let res = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://bi.example.com"
        );
    }
}
