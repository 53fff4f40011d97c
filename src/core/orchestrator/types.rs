use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::bi::types::{
    Filters, QueryDefinition, deserialize_filters, deserialize_null_as_empty,
};
use crate::core::error::PipelineError;

/// Where one orchestration request currently is. Indices refer to the
/// position of the query in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum OrchestrationState {
    Idle,
    FetchingDashboard,
    RunningQueries(usize),
    SummarizingQuery(usize),
    Synthesizing,
    SuggestingQueries,
    Refining,
    Done,
    Error,
}

impl OrchestrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrchestrationState::Done | OrchestrationState::Error)
    }
}

/// How the synthesis reply is turned into the `synthesis-complete` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Strip wrapping code fences and pass the markdown through.
    #[default]
    Markdown,
    /// Require a bracket-delimited JSON array; prose is an extraction failure.
    JsonArray,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SynthesisOutput {
    Markdown(String),
    Json(Vec<Value>),
}

impl SynthesisOutput {
    /// Text form fed back into the suggestion prompt as past advice.
    pub fn as_prompt_text(&self) -> String {
        match self {
            SynthesisOutput::Markdown(text) => text.clone(),
            SynthesisOutput::Json(items) => Value::Array(items.clone()).to_string(),
        }
    }
}

/// Payload of `run-batch` and `one-shot`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default, alias = "description")]
    pub dashboard_description: Option<String>,
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub next_steps_instructions: String,
    #[serde(default, alias = "instance")]
    pub instance_id: Option<String>,
    /// Used to load the queries when `queries` is empty.
    #[serde(default)]
    pub dashboard_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_filters")]
    pub dashboard_filters: Filters,
    #[serde(default)]
    pub extra_dashboards: Vec<String>,
    #[serde(default)]
    pub synthesis_mode: SynthesisMode,
}

/// Payload of `load-dashboard`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRequest {
    pub dashboard_id: String,
    #[serde(default, alias = "instance")]
    pub instance_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_filters")]
    pub dashboard_filters: Filters,
    #[serde(default)]
    pub extra_dashboards: Vec<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationEvent {
    PartialText {
        query_index: usize,
        text: String,
    },
    QuerySkipped {
        query_index: usize,
        title: String,
        reason: String,
    },
    SynthesisComplete(SynthesisOutput),
    SuggestionsReady(Vec<Value>),
    RefineComplete(Vec<Value>),
    OneShotComplete {
        summary: String,
        query_suggestions: Vec<Value>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OrchestrationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationEvent::PartialText { .. } => "partial-text",
            OrchestrationEvent::QuerySkipped { .. } => "query-skipped",
            OrchestrationEvent::SynthesisComplete(_) => "synthesis-complete",
            OrchestrationEvent::SuggestionsReady(_) => "suggestions-ready",
            OrchestrationEvent::RefineComplete(_) => "refine-complete",
            OrchestrationEvent::OneShotComplete { .. } => "one-shot-complete",
            OrchestrationEvent::Error { .. } => "error",
        }
    }

    /// Wire payload. `partial-text` carries the raw chunk string.
    pub fn payload(&self) -> Value {
        match self {
            OrchestrationEvent::PartialText { text, .. } => Value::String(text.clone()),
            OrchestrationEvent::QuerySkipped {
                query_index,
                title,
                reason,
            } => json!({ "queryIndex": query_index, "title": title, "reason": reason }),
            OrchestrationEvent::SynthesisComplete(output) => {
                serde_json::to_value(output).unwrap_or(Value::Null)
            }
            OrchestrationEvent::SuggestionsReady(items)
            | OrchestrationEvent::RefineComplete(items) => Value::Array(items.clone()),
            OrchestrationEvent::OneShotComplete {
                summary,
                query_suggestions,
            } => json!({ "summary": summary, "querySuggestions": query_suggestions }),
            OrchestrationEvent::Error { code, message } => {
                json!({ "code": code, "message": message })
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OrchestrationEvent::Error { .. })
    }
}

impl From<&PipelineError> for OrchestrationEvent {
    fn from(err: &PipelineError) -> Self {
        OrchestrationEvent::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}
