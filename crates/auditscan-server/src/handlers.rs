use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::DropGuard;
use tracing::{error, info};

use auditscan_scan::{
    Batch, ChannelSink, CollectSink, CompiledFilter, DurationMap, FilterOptions, MatchedRecord,
    ScanError, ScanSummary,
};

use crate::AppState;
use crate::error::ApiError;

/// Batches buffered between the scan and the response body
const STREAM_BUFFER: usize = 16;

/// How matches are returned to the caller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Newline-delimited JSON, one line per batch
    #[default]
    Stream,
    /// One JSON document with every record
    Collect,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub object_path: String,
    pub pattern: String,
    #[serde(default)]
    pub literal: bool,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub mode: DeliveryMode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectResponse {
    records: Vec<MatchedRecord>,
    #[serde(flatten)]
    summary: ScanSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    durations: Option<BTreeMap<String, f64>>,
}

/// Final line of a streamed response
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Trailer {
    Done(ScanSummary),
    Error(String),
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    info!(
        object = %request.object_path,
        pattern = %request.pattern,
        mode = ?request.mode,
        "received scan request"
    );

    if request.object_path.trim().is_empty() {
        return Err(ApiError::EmptyPath);
    }
    let filter = CompiledFilter::with_options(
        &request.pattern,
        FilterOptions {
            literal: request.literal,
            case_insensitive: request.case_insensitive,
        },
    )?;

    let durations = state.track_durations.then(|| Arc::new(DurationMap::new()));
    let reader = state
        .store
        .open(&request.object_path, state.compression, durations.clone())
        .await?;

    let pipeline = match &durations {
        Some(durations) => state.pipeline.clone().with_durations(Arc::clone(durations)),
        None => state.pipeline.clone(),
    };
    let cancel = state.shutdown.child_token();

    match request.mode {
        DeliveryMode::Collect => {
            let mut sink = CollectSink::new();
            let summary = pipeline.run(reader, filter, &mut sink, &cancel).await?;
            info!(summary = %summary, elapsed = ?started.elapsed(), "scan complete");
            if let Some(durations) = &durations {
                durations.log_all();
            }

            Ok(Json(CollectResponse {
                records: sink.into_records(),
                summary,
                durations: durations.map(|d| d.to_millis()),
            })
            .into_response())
        }
        DeliveryMode::Stream => {
            let (batch_tx, batch_rx) = mpsc::channel::<Batch>(STREAM_BUFFER);
            let (done_tx, done_rx) = oneshot::channel::<Result<ScanSummary, ScanError>>();
            let object_path = request.object_path;
            let body_guard = cancel.clone().drop_guard();

            tokio::spawn(async move {
                let mut sink = ChannelSink::new(batch_tx);
                let result = pipeline.run(reader, filter, &mut sink, &cancel).await;
                drop(sink);

                match &result {
                    Ok(summary) => info!(
                        object = %object_path,
                        summary = %summary,
                        elapsed = ?started.elapsed(),
                        "scan complete"
                    ),
                    Err(e) => error!(object = %object_path, "scan failed: {}", e),
                }
                if let Some(durations) = &durations {
                    durations.log_all();
                }
                let _ = done_tx.send(result);
            });

            Ok(stream_response(batch_rx, done_rx, body_guard))
        }
    }
}

/// Build an NDJSON body: one line per batch, then a `done` or `error` line.
///
/// The scan is cancelled when the body is dropped, e.g. on client disconnect.
fn stream_response(
    batches: mpsc::Receiver<Batch>,
    done: oneshot::Receiver<Result<ScanSummary, ScanError>>,
    guard: DropGuard,
) -> Response {
    let lines = futures::stream::unfold(batches, |mut rx| async move {
        rx.recv().await.map(|batch| (json_line(&batch), rx))
    });

    let trailer = futures::stream::once(async move {
        let _guard = guard;
        let trailer = match done.await {
            Ok(Ok(summary)) => Trailer::Done(summary),
            Ok(Err(e)) => Trailer::Error(e.to_string()),
            Err(_) => Trailer::Error("scan ended without a result".to_string()),
        };
        json_line(&trailer)
    });

    let body = lines.chain(trailer).map(Ok::<_, Infallible>);
    ([(header::CONTENT_TYPE, "application/x-ndjson")], Body::from_stream(body)).into_response()
}

fn json_line<T: Serialize>(value: &T) -> String {
    let mut line = serde_json::to_string(value)
        .unwrap_or_else(|e| format!(r#"{{"error":"failed to encode line: {}"}}"#, e));
    line.push('\n');
    line
}
