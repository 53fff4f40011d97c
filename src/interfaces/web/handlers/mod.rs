pub mod suggestions;
pub mod summaries;

use serde::Deserialize;
use serde_json::Value;

use crate::core::bi::types::deserialize_null_as_empty;

/// Body shared by the synthesis and suggestion endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsRequest {
    #[serde(default)]
    pub query_results: Vec<Value>,
    #[serde(default)]
    pub query_summaries: Vec<Value>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub next_steps_instructions: String,
}
