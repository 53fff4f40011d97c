pub mod types;

use anyhow::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::bi::{BiInstance, ExecutorFactory, QueryDefinition, QueryResult};
use crate::core::cache::{LoadedMetadata, MetadataCache, MetadataService};
use crate::core::config::{AppConfig, ContextFile};
use crate::core::context_docs::{ContextDocumentStore, build_document_store};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::extract::{extract_json_array, extract_json_object, strip_code_fences};
use crate::core::llm::{
    LlmProvider, ModelRequest, ModelResponse, build_provider, log_billable_usage,
};
use crate::core::prompts::{
    self, SuggestionStyle, SummaryFormat, SynthesisSource, results_as_values,
};

pub use types::{
    BatchRequest, DashboardRequest, OrchestrationEvent, OrchestrationState, SynthesisMode,
    SynthesisOutput,
};

const EVENT_BUFFER: usize = 64;
const CHUNK_BUFFER: usize = 32;
pub const EXPECTED_SUGGESTIONS: usize = 3;

pub fn can_transition(from: OrchestrationState, to: OrchestrationState) -> bool {
    use OrchestrationState::*;

    if to == Error {
        return !from.is_terminal();
    }
    match from {
        Idle => matches!(
            to,
            FetchingDashboard | RunningQueries(0) | Synthesizing | Refining
        ),
        FetchingDashboard => matches!(to, RunningQueries(0) | Synthesizing),
        RunningQueries(i) => match to {
            SummarizingQuery(j) => j == i,
            RunningQueries(j) => j == i + 1,
            Synthesizing => true,
            _ => false,
        },
        SummarizingQuery(i) => match to {
            RunningQueries(j) => j == i + 1,
            Synthesizing => true,
            _ => false,
        },
        Synthesizing => matches!(to, SuggestingQueries),
        SuggestingQueries => matches!(to, Done),
        Refining => matches!(to, Done),
        Done | Error => false,
    }
}

/// Tracks one request's position in the state table.
struct Progress {
    run_id: Uuid,
    state: OrchestrationState,
}

impl Progress {
    fn new(kind: &str) -> Self {
        let run_id = Uuid::new_v4();
        info!("Starting {} run {}", kind, run_id);
        Self {
            run_id,
            state: OrchestrationState::Idle,
        }
    }

    fn advance(&mut self, to: OrchestrationState) {
        debug_assert!(
            can_transition(self.state, to),
            "illegal transition {:?} -> {:?}",
            self.state,
            to
        );
        debug!("Run {}: {:?} -> {:?}", self.run_id, self.state, to);
        self.state = to;
    }

    /// Next stop after query `index` of `total`.
    fn after_query(&mut self, index: usize, total: usize) {
        if index + 1 < total {
            self.advance(OrchestrationState::RunningQueries(index + 1));
        }
    }
}

/// Trims every line of a streamed chunk. Line breaks survive, including a
/// trailing one, so consecutive chunks concatenate into the same layout.
pub fn normalize_chunk(chunk: &str) -> String {
    chunk.split('\n').map(str::trim).collect::<Vec<_>>().join("\n")
}

fn check_suggestion_count(suggestions: &[Value]) {
    if suggestions.len() != EXPECTED_SUGGESTIONS {
        warn!(
            "Expected {} query suggestions, model returned {}",
            EXPECTED_SUGGESTIONS,
            suggestions.len()
        );
    }
}

async fn emit(events: &mpsc::Sender<OrchestrationEvent>, event: OrchestrationEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped; continuing run to completion");
    }
}

/// Turns dashboard queries into summaries, a synthesis and follow-up
/// suggestions. One instance is shared by every transport.
pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    executors: ExecutorFactory,
    metadata: MetadataService,
    documents: Arc<dyn ContextDocumentStore>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executors: ExecutorFactory,
        metadata: MetadataService,
        documents: Arc<dyn ContextDocumentStore>,
    ) -> Self {
        Self {
            llm,
            executors,
            metadata,
            documents,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let cache = MetadataCache::open(config.cache_path()).await?;
        Ok(Self::new(
            build_provider(&config.llm)?,
            ExecutorFactory::from_config(&config.bi),
            MetadataService::new(Arc::new(cache)),
            build_document_store(&config.context_docs),
        ))
    }

    // --- streaming operations ---

    /// Streams `partial-text` per query, then one synthesis and one
    /// suggestion event. A fatal failure ends the stream with `Error`.
    pub fn run_batch(self: &Arc<Self>, request: BatchRequest) -> ReceiverStream<OrchestrationEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut progress = Progress::new("batch");
            if let Err(e) = this.drive_batch(request, &mut progress, &tx).await {
                this.fail(&mut progress, &tx, e).await;
            }
        });
        ReceiverStream::new(rx)
    }

    /// Same inputs as `run_batch`, answered with a single
    /// `one-shot-complete` event.
    pub fn one_shot(self: &Arc<Self>, request: BatchRequest) -> ReceiverStream<OrchestrationEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut progress = Progress::new("one-shot");
            match this.drive_one_shot(request, &mut progress).await {
                Ok(event) => emit(&tx, event).await,
                Err(e) => this.fail(&mut progress, &tx, e).await,
            }
        });
        ReceiverStream::new(rx)
    }

    /// Condenses an earlier synthesis into grouped key points.
    pub fn refine(self: &Arc<Self>, summary: String) -> ReceiverStream<OrchestrationEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut progress = Progress::new("refine");
            progress.advance(OrchestrationState::Refining);
            let result = async {
                let response = this
                    .call_model("refine", ModelRequest::text(prompts::refine(&summary)))
                    .await?;
                Ok::<_, PipelineError>(extract_json_array(&response.text)?)
            }
            .await;
            match result {
                Ok(groups) => {
                    progress.advance(OrchestrationState::Done);
                    emit(&tx, OrchestrationEvent::RefineComplete(groups)).await;
                }
                Err(e) => this.fail(&mut progress, &tx, e).await,
            }
        });
        ReceiverStream::new(rx)
    }

    async fn fail(
        &self,
        progress: &mut Progress,
        events: &mpsc::Sender<OrchestrationEvent>,
        err: PipelineError,
    ) {
        warn!(code = err.code(), "Run {} failed: {}", progress.run_id, err);
        progress.advance(OrchestrationState::Error);
        emit(events, OrchestrationEvent::from(&err)).await;
    }

    async fn drive_batch(
        &self,
        request: BatchRequest,
        progress: &mut Progress,
        events: &mpsc::Sender<OrchestrationEvent>,
    ) -> PipelineResult<()> {
        let instance = self.resolve_instance(request.instance_id.as_deref())?;
        let (description, queries) = self.batch_inputs(&request, &instance, progress).await?;
        let instructions = request.next_steps_instructions.as_str();

        let mut results: Vec<QueryResult> = Vec::new();
        let mut summaries: Vec<Value> = Vec::new();
        let total = queries.len();
        if total > 0 {
            progress.advance(OrchestrationState::RunningQueries(0));
        }

        for (index, query) in queries.iter().enumerate() {
            let rows = match self.execute_query(&instance, query).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(code = e.code(), "Skipping query {}: {}", index, e);
                    emit(
                        events,
                        OrchestrationEvent::QuerySkipped {
                            query_index: index,
                            title: query.title.clone(),
                            reason: e.to_string(),
                        },
                    )
                    .await;
                    progress.after_query(index, total);
                    continue;
                }
            };

            progress.advance(OrchestrationState::SummarizingQuery(index));
            let prompt = prompts::per_query_summary(
                description.as_deref(),
                query,
                &rows,
                instructions,
                SummaryFormat::Markdown,
            );
            let response = self
                .stream_model("query-summary", index, ModelRequest::text(prompt), events)
                .await?;
            summaries.push(Value::String(response.text));
            results.push(QueryResult::new(query, rows));
            progress.after_query(index, total);
        }

        info!(
            "Summarized {} of {} queries in run {}",
            summaries.len(),
            total,
            progress.run_id
        );

        progress.advance(OrchestrationState::Synthesizing);
        let prompt =
            prompts::dashboard_synthesis(&[], &summaries, instructions, SynthesisSource::Summaries);
        let response = self
            .call_model("dashboard-synthesis", ModelRequest::text(prompt))
            .await?;
        let synthesis = match request.synthesis_mode {
            SynthesisMode::Markdown => SynthesisOutput::Markdown(strip_code_fences(&response.text)),
            SynthesisMode::JsonArray => SynthesisOutput::Json(extract_json_array(&response.text)?),
        };
        let synthesis_text = synthesis.as_prompt_text();
        emit(events, OrchestrationEvent::SynthesisComplete(synthesis)).await;

        progress.advance(OrchestrationState::SuggestingQueries);
        let prompt = prompts::query_suggestions(
            &results_as_values(&results),
            &summaries,
            Some(&synthesis_text),
            instructions,
            SuggestionStyle::Streaming,
        );
        let response = self
            .call_model("query-suggestions", ModelRequest::text(prompt))
            .await?;
        let suggestions = extract_json_array(&response.text)?;
        check_suggestion_count(&suggestions);
        emit(events, OrchestrationEvent::SuggestionsReady(suggestions)).await;

        progress.advance(OrchestrationState::Done);
        Ok(())
    }

    async fn drive_one_shot(
        &self,
        request: BatchRequest,
        progress: &mut Progress,
    ) -> PipelineResult<OrchestrationEvent> {
        let instance = self.resolve_instance(request.instance_id.as_deref())?;
        let (_, queries) = self.batch_inputs(&request, &instance, progress).await?;
        let instructions = request.next_steps_instructions.as_str();

        let mut results = Vec::new();
        let total = queries.len();
        if total > 0 {
            progress.advance(OrchestrationState::RunningQueries(0));
        }
        for (index, query) in queries.iter().enumerate() {
            match self.execute_query(&instance, query).await {
                Ok(rows) => results.push(QueryResult::new(query, rows)),
                Err(e) => warn!(code = e.code(), "Skipping query {}: {}", index, e),
            }
            progress.after_query(index, total);
        }
        let results = results_as_values(&results);

        progress.advance(OrchestrationState::Synthesizing);
        let prompt =
            prompts::dashboard_synthesis(&results, &[], instructions, SynthesisSource::Results);
        let summary = strip_code_fences(
            &self
                .call_model("dashboard-synthesis", ModelRequest::text(prompt))
                .await?
                .text,
        );

        progress.advance(OrchestrationState::SuggestingQueries);
        let prompt = prompts::query_suggestions(
            &results,
            &[Value::String(summary.clone())],
            None,
            instructions,
            SuggestionStyle::OneShot,
        );
        let response = self
            .call_model("query-suggestions", ModelRequest::text(prompt))
            .await?;
        let query_suggestions = extract_json_array(&response.text)?;
        check_suggestion_count(&query_suggestions);

        progress.advance(OrchestrationState::Done);
        Ok(OrchestrationEvent::OneShotComplete {
            summary,
            query_suggestions,
        })
    }

    /// Description and queries for a batch, loading them from the dashboard
    /// when the request names one but carries no queries.
    async fn batch_inputs(
        &self,
        request: &BatchRequest,
        instance: &BiInstance,
        progress: &mut Progress,
    ) -> PipelineResult<(Option<String>, Vec<QueryDefinition>)> {
        let description = request
            .dashboard_description
            .clone()
            .filter(|d| !d.trim().is_empty());

        let dashboard_id = request
            .dashboard_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let Some(dashboard_id) = dashboard_id.filter(|_| request.queries.is_empty()) else {
            return Ok((description, request.queries.clone()));
        };

        progress.advance(OrchestrationState::FetchingDashboard);
        let loaded = self
            .metadata
            .load(
                instance.dashboards.as_ref(),
                dashboard_id,
                &request.dashboard_filters,
                &request.extra_dashboards,
                false,
            )
            .await
            .map_err(PipelineError::Metadata)?;
        let metadata = loaded.metadata;
        let description = description.or_else(|| {
            Some(metadata.description.clone()).filter(|d| !d.trim().is_empty())
        });
        Ok((description, metadata.queries))
    }

    // --- stateless operations ---

    /// JSON summary object for one query. Rows come from `query.queryData`,
    /// or from running the query when the caller sent none.
    pub async fn summarize_query(
        &self,
        query: &QueryDefinition,
        description: Option<&str>,
        instance_id: Option<&str>,
    ) -> PipelineResult<Map<String, Value>> {
        let rows = match &query.query_data {
            Some(rows) => rows.clone(),
            None => {
                let instance = self.resolve_instance(instance_id)?;
                self.execute_query(&instance, query).await?
            }
        };
        let prompt = prompts::per_query_summary(
            description.filter(|d| !d.trim().is_empty()),
            query,
            &rows,
            "",
            SummaryFormat::Json,
        );
        let request = ModelRequest::text(prompt).with_files(&self.grounding_files().await);
        let response = self.call_model("query-summary", request).await?;
        Ok(extract_json_object(&response.text)?)
    }

    /// Markdown synthesis over caller-supplied results and summaries.
    pub async fn synthesize(
        &self,
        query_results: &[Value],
        query_summaries: &[Value],
        instructions: &str,
    ) -> PipelineResult<String> {
        let prompt = prompts::dashboard_synthesis(
            query_results,
            query_summaries,
            instructions,
            SynthesisSource::ResultsAndSummaries,
        );
        let request = ModelRequest::text(prompt).with_files(&self.grounding_files().await);
        let response = self.call_model("dashboard-synthesis", request).await?;
        Ok(strip_code_fences(&response.text))
    }

    /// Structured `{querySuggestion, visualizationType, filters}` suggestions.
    pub async fn suggest(
        &self,
        query_results: &[Value],
        query_summaries: &[Value],
        instructions: &str,
    ) -> PipelineResult<Vec<Value>> {
        let prompt = prompts::query_suggestions(
            query_results,
            query_summaries,
            None,
            instructions,
            SuggestionStyle::Structured,
        );
        let request = ModelRequest::text(prompt).with_files(&self.grounding_files().await);
        let response = self.call_model("query-suggestions", request).await?;
        let suggestions = extract_json_array(&response.text)?;
        check_suggestion_count(&suggestions);
        Ok(suggestions)
    }

    pub async fn load_dashboard(&self, request: &DashboardRequest) -> PipelineResult<LoadedMetadata> {
        if request.dashboard_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "dashboardId is required".to_string(),
            ));
        }
        let instance = self.resolve_instance(request.instance_id.as_deref())?;
        self.metadata
            .load(
                instance.dashboards.as_ref(),
                request.dashboard_id.trim(),
                &request.dashboard_filters,
                &request.extra_dashboards,
                request.refresh,
            )
            .await
            .map_err(PipelineError::Metadata)
    }

    // --- collaborators ---

    fn resolve_instance(&self, instance_id: Option<&str>) -> PipelineResult<BiInstance> {
        self.executors
            .resolve(instance_id)
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))
    }

    async fn execute_query(
        &self,
        instance: &BiInstance,
        query: &QueryDefinition,
    ) -> PipelineResult<Vec<Value>> {
        instance
            .executor
            .run_query(&query.query_body)
            .await
            .map_err(|source| PipelineError::QueryExecution {
                title: query.title.clone(),
                source,
            })
    }

    /// A listing failure leaves the call ungrounded rather than failing it.
    async fn grounding_files(&self) -> Vec<ContextFile> {
        match self.documents.list_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Context documents unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn call_model(&self, call: &str, request: ModelRequest) -> PipelineResult<ModelResponse> {
        let response = self
            .llm
            .generate(&request)
            .await
            .map_err(PipelineError::ModelCall)?;
        log_billable_usage(self.llm.provider_id(), call, &response.usage);
        Ok(response)
    }

    /// Forwards each chunk as `partial-text` while the call is in flight.
    async fn stream_model(
        &self,
        call: &str,
        query_index: usize,
        request: ModelRequest,
        events: &mpsc::Sender<OrchestrationEvent>,
    ) -> PipelineResult<ModelResponse> {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(CHUNK_BUFFER);
        let forward = async {
            while let Some(chunk) = chunk_rx.recv().await {
                emit(
                    events,
                    OrchestrationEvent::PartialText {
                        query_index,
                        text: normalize_chunk(&chunk),
                    },
                )
                .await;
            }
        };
        let (response, ()) = tokio::join!(self.llm.generate_stream(&request, chunk_tx), forward);
        let response = response.map_err(PipelineError::ModelCall)?;
        log_billable_usage(self.llm.provider_id(), call, &response.usage);
        Ok(response)
    }
}

#[cfg(test)]
mod tests;
