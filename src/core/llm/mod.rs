pub mod generic_provider;
pub mod registry;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::core::config::{ContextFile, LlmConfig};
use generic_provider::GenericProvider;
use registry::ProviderRegistry;

pub const USAGE_LOG_COMPONENT: &str = "dashboard-summarization-logs";
pub const DEBUG_LOG_COMPONENT: &str = "dashboard-summarization-debug-logs";

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    File { uri: String, mime_type: String },
}

/// Ordered content sent in one model call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRequest {
    pub parts: Vec<PromptPart>,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            parts: vec![PromptPart::Text(prompt.into())],
        }
    }

    /// Appends grounding documents after the prompt text.
    pub fn with_files(mut self, files: &[ContextFile]) -> Self {
        self.parts.extend(files.iter().map(|f| PromptPart::File {
            uri: f.uri.clone(),
            mime_type: f.mime_type.clone(),
        }));
        self
    }

    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Text(t) => Some(t.as_str()),
                PromptPart::File { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BillableUsage {
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub usage: BillableUsage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Sends text chunks as they arrive and returns the aggregate response.
    /// Providers without native streaming deliver the whole text as one chunk.
    async fn generate_stream(
        &self,
        request: &ModelRequest,
        chunks: mpsc::Sender<String>,
    ) -> Result<ModelResponse> {
        let response = self.generate(request).await?;
        if !response.text.is_empty() {
            let _ = chunks.send(response.text.clone()).await;
        }
        Ok(response)
    }
}

pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let registry = ProviderRegistry::load()?;
    let def = registry
        .get_provider(&config.provider)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown LLM provider '{}'", config.provider))?;

    info!(
        "Using LLM provider {} (model {}, max_output_tokens {}, temperature {})",
        def.name, config.model, config.max_output_tokens, config.temperature
    );
    Ok(Arc::new(GenericProvider::new(def, config)))
}

/// Structured accounting entry for one model call.
pub fn log_billable_usage(provider: &str, call: &str, usage: &BillableUsage) {
    info!(
        component = USAGE_LOG_COMPONENT,
        provider,
        call,
        input_units = usage.input_units,
        output_units = usage.output_units,
        "model call billable units"
    );
}
