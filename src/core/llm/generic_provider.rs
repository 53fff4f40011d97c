use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::registry::{ApiFormat, AuthType, ProviderDef};
use super::{
    BillableUsage, DEBUG_LOG_COMPONENT, LlmProvider, ModelRequest, ModelResponse, PromptPart,
};
use crate::core::config::LlmConfig;

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiContent>,
    #[serde(default)]
    delta: Option<OpenAiContent>,
}

#[derive(Deserialize)]
struct OpenAiContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ── Gemini request/response ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum GeminiPart {
    #[serde(rename = "text")]
    Text(String),
    FileData {
        #[serde(rename = "fileUri")]
        file_uri: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResContent>,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .iter()
            .take(1)
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    fn usage(&self) -> Option<BillableUsage> {
        self.usage_metadata.as_ref().map(|u| BillableUsage {
            input_units: u.prompt_token_count,
            output_units: u.candidates_token_count,
        })
    }
}

impl OpenAiResponse {
    fn text(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref().or(c.delta.as_ref()))
            .and_then(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn usage(&self) -> Option<BillableUsage> {
        self.usage.as_ref().map(|u| BillableUsage {
            input_units: u.prompt_tokens,
            output_units: u.completion_tokens,
        })
    }
}

/// One `data:` payload of a streamed reply.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct StreamDelta {
    pub text: String,
    pub usage: Option<BillableUsage>,
    pub done: bool,
}

pub(crate) fn parse_stream_data(format: ApiFormat, data: &str) -> Result<StreamDelta> {
    if data == "[DONE]" {
        return Ok(StreamDelta {
            done: true,
            ..StreamDelta::default()
        });
    }
    match format {
        ApiFormat::Gemini => {
            let chunk: GeminiResponse = serde_json::from_str(data)?;
            Ok(StreamDelta {
                text: chunk.text(),
                usage: chunk.usage(),
                done: false,
            })
        }
        ApiFormat::Openai => {
            let chunk: OpenAiResponse = serde_json::from_str(data)?;
            Ok(StreamDelta {
                text: chunk.text(),
                usage: chunk.usage(),
                done: false,
            })
        }
    }
}

// ── Generic Provider ──

pub struct GenericProvider {
    provider_def: ProviderDef,
    endpoint: String,
    model: String,
    api_key: String,
    max_output_tokens: u32,
    temperature: f32,
    client: Client,
}

impl GenericProvider {
    pub fn new(provider_def: ProviderDef, config: &LlmConfig) -> Self {
        let endpoint = provider_def.endpoint(
            config.base_url.as_deref(),
            &config.model,
            config.project.as_deref().unwrap_or_default(),
            &config.region,
        );
        Self {
            provider_def,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            client: Client::new(),
        }
    }

    fn gemini_body(&self, request: &ModelRequest) -> GeminiRequest {
        let parts = request
            .parts
            .iter()
            .map(|p| match p {
                PromptPart::Text(t) => GeminiPart::Text(t.clone()),
                PromptPart::File { uri, mime_type } => GeminiPart::FileData {
                    file_uri: uri.clone(),
                    mime_type: mime_type.clone(),
                },
            })
            .collect();
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_output_tokens,
                temperature: self.temperature,
            },
        }
    }

    fn openai_body(&self, request: &ModelRequest, stream: bool) -> OpenAiRequest<'_> {
        // Chat completions cannot dereference bucket URIs, so files travel as references.
        let mut content = request.prompt_text();
        for part in &request.parts {
            if let PromptPart::File { uri, mime_type } = part {
                content.push_str(&format!("\n[Attached document: {} ({})]", uri, mime_type));
            }
        }
        OpenAiRequest {
            model: &self.model,
            messages: vec![OpenAiMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_output_tokens,
            temperature: self.temperature,
            stream,
            stream_options: stream.then_some(OpenAiStreamOptions {
                include_usage: true,
            }),
        }
    }

    fn build_request(&self, request: &ModelRequest, stream: bool) -> RequestBuilder {
        let mut builder = match self.provider_def.api_format {
            ApiFormat::Gemini => {
                let method = if stream {
                    "streamGenerateContent"
                } else {
                    "generateContent"
                };
                let mut b = self
                    .client
                    .post(format!("{}:{}", self.endpoint, method))
                    .json(&self.gemini_body(request));
                if stream {
                    b = b.query(&[("alt", "sse")]);
                }
                b
            }
            ApiFormat::Openai => self
                .client
                .post(&self.endpoint)
                .json(&self.openai_body(request, stream)),
        };

        builder = match self.provider_def.auth.auth_type {
            AuthType::Bearer => builder.bearer_auth(&self.api_key),
            AuthType::QueryParam => {
                let param_name = self.provider_def.auth.param_name.as_deref().unwrap_or("key");
                builder.query(&[(param_name, self.api_key.as_str())])
            }
        };
        for (name, value) in &self.provider_def.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    async fn send(&self, request: &ModelRequest, stream: bool) -> Result<reqwest::Response> {
        let res = self.build_request(request, stream).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "{} API Error ({}): {}",
                self.provider_def.name,
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        Ok(res)
    }
}

#[async_trait]
impl LlmProvider for GenericProvider {
    fn provider_id(&self) -> &str {
        &self.provider_def.id
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let res = self.send(request, false).await?;
        let (text, usage, has_candidates) = match self.provider_def.api_format {
            ApiFormat::Gemini => {
                let parsed: GeminiResponse = res.json().await?;
                (parsed.text(), parsed.usage(), !parsed.candidates.is_empty())
            }
            ApiFormat::Openai => {
                let parsed: OpenAiResponse = res.json().await?;
                (parsed.text(), parsed.usage(), !parsed.choices.is_empty())
            }
        };
        if !has_candidates {
            return Err(anyhow!(
                "{} returned no candidates",
                self.provider_def.name
            ));
        }
        debug!(component = DEBUG_LOG_COMPONENT, output = %text, "model output");
        Ok(ModelResponse {
            text,
            usage: usage.unwrap_or_default(),
        })
    }

    async fn generate_stream(
        &self,
        request: &ModelRequest,
        chunks: mpsc::Sender<String>,
    ) -> Result<ModelResponse> {
        use tokio::io::AsyncBufReadExt;
        use tokio_stream::StreamExt;

        let res = self.send(request, true).await?;
        let stream = res.bytes_stream();
        let mut reader =
            tokio_util::io::StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
        let mut buf_reader = tokio::io::BufReader::new(&mut reader);
        let mut line_buf = String::new();

        let mut text = String::new();
        let mut usage = BillableUsage::default();
        let mut saw_data = false;

        loop {
            line_buf.clear();
            if buf_reader.read_line(&mut line_buf).await? == 0 {
                break;
            }
            let line = line_buf.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let delta = parse_stream_data(self.provider_def.api_format, data.trim())?;
            if delta.done {
                break;
            }
            saw_data = true;
            if let Some(u) = delta.usage {
                usage = u;
            }
            if !delta.text.is_empty() {
                text.push_str(&delta.text);
                // A dropped receiver only means nobody is watching; keep aggregating.
                let _ = chunks.send(delta.text).await;
            }
        }

        if !saw_data {
            return Err(anyhow!(
                "{} stream ended without any data",
                self.provider_def.name
            ));
        }
        debug!(component = DEBUG_LOG_COMPONENT, output = %text, "streamed model output");
        Ok(ModelResponse { text, usage })
    }
}
