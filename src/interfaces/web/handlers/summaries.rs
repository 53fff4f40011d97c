use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ResultsRequest;
use crate::core::bi::QueryDefinition;
use crate::core::error::PipelineResult;
use crate::interfaces::web::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySummaryRequest {
    pub query: QueryDefinition,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "instance")]
    pub instance_id: Option<String>,
}

pub async fn generate_query_summary(
    State(state): State<AppState>,
    Json(payload): Json<QuerySummaryRequest>,
) -> PipelineResult<Json<Value>> {
    let summary = state
        .orchestrator
        .summarize_query(
            &payload.query,
            payload.description.as_deref(),
            payload.instance_id.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "summary": summary })))
}

pub async fn generate_summary(
    State(state): State<AppState>,
    Json(payload): Json<ResultsRequest>,
) -> PipelineResult<Json<Value>> {
    let summary = state
        .orchestrator
        .synthesize(
            &payload.query_results,
            &payload.query_summaries,
            &payload.next_steps_instructions,
        )
        .await?;
    Ok(Json(json!({ "summary": summary })))
}
