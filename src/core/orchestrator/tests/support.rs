use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::bi::{
    DashboardMetadata, DashboardSource, ExecutorFactory, Filters, QueryBody, QueryDefinition,
    QueryExecutor, Row,
};
use crate::core::cache::{MetadataCache, MetadataService};
use crate::core::config::ContextFile;
use crate::core::context_docs::{ContextDocumentStore, StaticDocuments};
use crate::core::llm::{BillableUsage, LlmProvider, ModelRequest, ModelResponse, PromptPart};
use crate::core::orchestrator::{OrchestrationEvent, Orchestrator};

pub const SUGGESTIONS_REPLY: &str = r#"Here you go:
```json
[
  {"querySuggestion": "Revenue by region for the last 30 days"},
  {"querySuggestion": "Signups by channel for the last 30 days"},
  {"querySuggestion": "Refund rate by region for the last 30 days"}
]
```"#;

/// Replies in call order. An `Err` entry fails that call.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
    /// Stream each line of a reply as its own chunk.
    line_chunks: bool,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            line_chunks: false,
        }
    }

    pub fn streaming_lines(mut self) -> Self {
        self.line_chunks = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(ModelRequest::prompt_text)
            .collect()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted reply left".to_string()));
        match reply {
            Ok(text) => Ok(ModelResponse {
                usage: BillableUsage {
                    input_units: request.prompt_text().len() as u64,
                    output_units: text.len() as u64,
                },
                text,
            }),
            Err(e) => Err(anyhow!(e)),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.next_reply(request)
    }

    async fn generate_stream(
        &self,
        request: &ModelRequest,
        chunks: mpsc::Sender<String>,
    ) -> Result<ModelResponse> {
        let response = self.next_reply(request)?;
        if self.line_chunks {
            for line in response.text.split_inclusive('\n') {
                let _ = chunks.send(line.to_string()).await;
            }
        } else {
            let _ = chunks.send(response.text.clone()).await;
        }
        Ok(response)
    }
}

/// Serves fixed rows per view; the `broken` view always fails.
pub struct TableExecutor;

#[async_trait]
impl QueryExecutor for TableExecutor {
    async fn run_query(&self, body: &QueryBody) -> Result<Vec<Row>> {
        match body.view.as_str() {
            "broken" => Err(anyhow!("view 'broken' does not exist")),
            "orders" => Ok(vec![
                json!({"orders.region": "Seattle", "orders.revenue": 1200}),
                json!({"orders.region": "Austin", "orders.revenue": 800}),
            ]),
            "users" => Ok(vec![json!({"users.channel": "email", "users.count": 42})]),
            _ => Ok(vec![]),
        }
    }
}

pub struct FixedDashboard {
    pub fetches: AtomicUsize,
}

#[async_trait]
impl DashboardSource for FixedDashboard {
    async fn fetch_dashboard(
        &self,
        dashboard_id: &str,
        filters: &Filters,
    ) -> Result<DashboardMetadata> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(DashboardMetadata {
            dashboard_id: dashboard_id.to_string(),
            dashboard_filters: filters.clone(),
            description: "Weekly sales dashboard".to_string(),
            queries: vec![query("Revenue by Region", "orders"), query("Signups by Channel", "users")],
        })
    }
}

pub struct FailingDocuments;

#[async_trait]
impl ContextDocumentStore for FailingDocuments {
    async fn list_files(&self) -> Result<Vec<ContextFile>> {
        Err(anyhow!("bucket listing denied"))
    }
}

pub fn query(title: &str, view: &str) -> QueryDefinition {
    QueryDefinition {
        title: title.to_string(),
        query_body: QueryBody {
            model: "ecommerce".to_string(),
            view: view.to_string(),
            ..QueryBody::default()
        },
        ..QueryDefinition::default()
    }
}

pub fn context_file() -> ContextFile {
    ContextFile {
        uri: "gs://docs/glossary.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub llm: Arc<ScriptedProvider>,
    pub dashboard: Arc<FixedDashboard>,
}

pub fn harness(llm: ScriptedProvider) -> Harness {
    harness_with_documents(llm, Arc::new(StaticDocuments::new(vec![context_file()])))
}

pub fn harness_with_documents(
    llm: ScriptedProvider,
    documents: Arc<dyn ContextDocumentStore>,
) -> Harness {
    let llm = Arc::new(llm);
    let dashboard = Arc::new(FixedDashboard {
        fetches: AtomicUsize::new(0),
    });
    let mut executors = ExecutorFactory::default();
    executors.register("prod", Arc::new(TableExecutor), dashboard.clone());
    let metadata = MetadataService::new(Arc::new(MetadataCache::in_memory().unwrap()));
    Harness {
        orchestrator: Arc::new(Orchestrator::new(
            llm.clone(),
            executors,
            metadata,
            documents,
        )),
        llm,
        dashboard,
    }
}

pub async fn collect(stream: ReceiverStream<OrchestrationEvent>) -> Vec<OrchestrationEvent> {
    stream.collect().await
}

pub fn names(events: &[OrchestrationEvent]) -> Vec<&'static str> {
    events.iter().map(OrchestrationEvent::name).collect()
}

pub fn file_uris(request: &ModelRequest) -> Vec<String> {
    request
        .parts
        .iter()
        .filter_map(|p| match p {
            PromptPart::File { uri, .. } => Some(uri.clone()),
            PromptPart::Text(_) => None,
        })
        .collect()
}

pub fn value_titles(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v["querySuggestion"].as_str().map(str::to_string))
        .collect()
}
