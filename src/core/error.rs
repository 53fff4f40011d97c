use thiserror::Error;

/// Why a model reply could not be turned into structured data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no JSON found in model output")]
    NoJsonFound,

    #[error("malformed JSON in model output ({message}): {fragment}")]
    MalformedJson { fragment: String, message: String },
}

/// Request-level failures. Each variant is isolated to the request that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Forbidden: Invalid client secret")]
    Auth,

    #[error("query '{title}' failed: {source}")]
    QueryExecution {
        title: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model call failed: {0}")]
    ModelCall(#[source] anyhow::Error),

    #[error("model answered but the reply was unusable: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("dashboard metadata unavailable: {0}")]
    Metadata(#[source] anyhow::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Auth => "auth_failure",
            PipelineError::QueryExecution { .. } => "query_execution_failure",
            PipelineError::ModelCall(_) => "model_call_failure",
            PipelineError::Extraction(_) => "extraction_failure",
            PipelineError::Metadata(_) => "metadata_failure",
            PipelineError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::Auth => 403,
            PipelineError::InvalidRequest(_) => 400,
            PipelineError::ModelCall(_) => 500,
            PipelineError::QueryExecution { .. }
            | PipelineError::Extraction(_)
            | PipelineError::Metadata(_) => 502,
        }
    }

    /// Text safe to hand back to a client. Model failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::ModelCall(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
