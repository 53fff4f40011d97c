use axum::{Json, extract::State};
use serde_json::{Value, json};

use super::ResultsRequest;
use crate::core::error::PipelineResult;
use crate::interfaces::web::AppState;

pub async fn generate_query_suggestions(
    State(state): State<AppState>,
    Json(payload): Json<ResultsRequest>,
) -> PipelineResult<Json<Value>> {
    let suggestions = state
        .orchestrator
        .suggest(
            &payload.query_results,
            &payload.query_summaries,
            &payload.next_steps_instructions,
        )
        .await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}
