//! Streaming channel: one WebSocket per dashboard session.
//!
//! Frames are JSON text `{"event": <name>, "data": <payload>}` in both
//! directions. Every inbound event runs in its own task; outbound frames
//! from all tasks funnel through the socket loop, which is the only writer.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::AppState;
use crate::core::error::PipelineError;
use crate::core::orchestrator::{BatchRequest, DashboardRequest, OrchestrationEvent};

const OUTBOUND_BUFFER: usize = 128;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn error_frame(err: &PipelineError) -> String {
    let event = OrchestrationEvent::from(err);
    frame(event.name(), event.payload())
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("Streaming session opened");
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    tokio::spawn(dispatch(state.clone(), text.to_string(), out_tx.clone()));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Socket receive failed: {}", e);
                    break;
                }
            },
            Some(outbound) = out_rx.recv() => {
                if socket.send(Message::Text(outbound.into())).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("Streaming session closed");
}

/// Routes one inbound frame. Runs in its own task, so a slow run never
/// blocks the session from reading or writing.
pub(crate) async fn dispatch(state: AppState, text: String, out: mpsc::Sender<String>) {
    let inbound: InboundFrame = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            let err = PipelineError::InvalidRequest(format!("unreadable frame: {}", e));
            let _ = out.send(error_frame(&err)).await;
            return;
        }
    };
    debug!("Inbound event {}", inbound.event);

    let orchestrator = &state.orchestrator;
    match inbound.event.as_str() {
        "run-batch" | "one-shot" => {
            let request: BatchRequest = match parse_payload(&inbound.event, inbound.data) {
                Ok(request) => request,
                Err(err) => {
                    let _ = out.send(error_frame(&err)).await;
                    return;
                }
            };
            let events = if inbound.event == "run-batch" {
                orchestrator.run_batch(request)
            } else {
                orchestrator.one_shot(request)
            };
            forward(events, out).await;
        }
        "refine" => match refine_summary(inbound.data) {
            Some(summary) => forward(orchestrator.refine(summary), out).await,
            None => {
                let err = PipelineError::InvalidRequest("refine expects the prior summary text".into());
                let _ = out.send(error_frame(&err)).await;
            }
        },
        "load-dashboard" => {
            let request: DashboardRequest = match parse_payload(&inbound.event, inbound.data) {
                Ok(request) => request,
                Err(err) => {
                    let _ = out.send(error_frame(&err)).await;
                    return;
                }
            };
            let reply = match orchestrator.load_dashboard(&request).await {
                Ok(loaded) => frame(
                    "dashboard-loaded",
                    json!({ "metadata": loaded.metadata, "fromCache": loaded.from_cache }),
                ),
                Err(err) => {
                    warn!(code = err.code(), "Dashboard load failed: {}", err);
                    error_frame(&err)
                }
            };
            let _ = out.send(reply).await;
        }
        other => {
            let err = PipelineError::InvalidRequest(format!("unknown event '{}'", other));
            let _ = out.send(error_frame(&err)).await;
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, PipelineError> {
    serde_json::from_value(data)
        .map_err(|e| PipelineError::InvalidRequest(format!("bad {} payload: {}", event, e)))
}

/// Accepts the summary as a bare string or as `{"summary": ...}`.
fn refine_summary(data: Value) -> Option<String> {
    match data {
        Value::String(text) => Some(text),
        Value::Object(mut map) => match map.remove("summary") {
            Some(Value::String(text)) => Some(text),
            _ => None,
        },
        _ => None,
    }
}

/// Relays a run's events until it ends or the session goes away.
async fn forward(mut events: ReceiverStream<OrchestrationEvent>, out: mpsc::Sender<String>) {
    while let Some(event) = events.next().await {
        if out.send(frame(event.name(), event.payload())).await.is_err() {
            debug!("Session closed before {} could be delivered", event.name());
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::web::test_support::test_state;

    async fn run(state: &AppState, inbound: Value) -> Vec<Value> {
        let (tx, mut rx) = mpsc::channel(16);
        dispatch(state.clone(), inbound.to_string(), tx).await;
        let mut frames = Vec::new();
        while let Some(text) = rx.recv().await {
            frames.push(serde_json::from_str::<Value>(&text).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn refine_replies_with_refine_complete() {
        let (state, llm) = test_state(None, Some("[{\"key_points\": [\"Seattle leads\"]}]"));
        let frames = run(&state, json!({ "event": "refine", "data": "## Summary" })).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "refine-complete");
        assert_eq!(frames[0]["data"][0]["key_points"][0], "Seattle leads");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn run_batch_without_instances_reports_an_error_frame() {
        let (state, llm) = test_state(None, Some("[]"));
        let frames = run(
            &state,
            json!({ "event": "run-batch", "data": { "queries": [{ "title": "Revenue" }], "nextStepsInstructions": "" } }),
        )
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "error");
        assert_eq!(frames[0]["data"]["code"], "invalid_request");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_frames_and_unknown_events_are_rejected() {
        let (state, _) = test_state(None, None);

        let (tx, mut rx) = mpsc::channel(4);
        dispatch(state.clone(), "not json".to_string(), tx).await;
        let reply: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["event"], "error");

        let frames = run(&state, json!({ "event": "explode", "data": {} })).await;
        assert_eq!(frames[0]["data"]["code"], "invalid_request");

        let frames = run(&state, json!({ "event": "refine", "data": 7 })).await;
        assert_eq!(frames[0]["event"], "error");
    }

    #[tokio::test]
    async fn load_dashboard_requires_an_id() {
        let (state, _) = test_state(None, None);
        let frames = run(
            &state,
            json!({ "event": "load-dashboard", "data": { "dashboardId": " " } }),
        )
        .await;
        assert_eq!(frames[0]["event"], "error");
        assert_eq!(frames[0]["data"]["code"], "invalid_request");
    }

    #[test]
    fn refine_payload_accepts_text_or_object() {
        assert_eq!(refine_summary(json!("text")).as_deref(), Some("text"));
        assert_eq!(
            refine_summary(json!({ "summary": "text" })).as_deref(),
            Some("text")
        );
        assert_eq!(refine_summary(json!(["text"])), None);
    }
}
