use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use auditscan_types::{Batch, MatchedRecord, PipelineItem, ScanError, ScanSummary, SinkError};

use crate::sink::BatchSink;

/// Default number of records per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Drains pipeline items into fixed-size batches and hands them to a sink
#[derive(Clone, Copy, Debug)]
pub struct BatchDispatcher {
    batch_size: usize,
}

impl BatchDispatcher {
    /// Create a dispatcher; a zero batch size is treated as 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Consume items until the terminal item, cancellation, or sink disconnect.
    ///
    /// Batches already delivered stay delivered when the scan fails. On
    /// cancellation the partial batch is dropped.
    pub async fn drain<S: BatchSink>(
        &self,
        items: &mut mpsc::Receiver<PipelineItem>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let mut state = DrainState::new(self.batch_size);

        loop {
            let item = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(delivered = state.summary.delivered, "scan cancelled while draining");
                    return Err(ScanError::Cancelled);
                }

                _ = sink.closed() => {
                    debug!(delivered = state.summary.delivered, "sink closed, stopping scan");
                    cancel.cancel();
                    return Err(ScanError::Disconnected);
                }

                item = items.recv() => item,
            };

            match item {
                Some(PipelineItem::Record(record)) => {
                    state.pending.push(record);
                    if state.pending.len() >= self.batch_size {
                        state.flush(sink, cancel).await?;
                    }
                }
                Some(PipelineItem::LineError(err)) => {
                    state.summary.skipped += 1;
                    warn!(
                        line = err.line_number,
                        reason = %err.reason,
                        "skipping line: {}",
                        truncate(&err.raw, 200)
                    );
                }
                Some(PipelineItem::EndOfStream) => {
                    state.flush(sink, cancel).await?;
                    debug!(summary = %state.summary, "scan finished");
                    return Ok(state.summary);
                }
                Some(PipelineItem::Fatal(err)) => {
                    state.flush(sink, cancel).await?;
                    warn!(
                        delivered = state.summary.delivered,
                        "scan aborted: {}", err
                    );
                    return Err(err);
                }
                None => {
                    state.flush(sink, cancel).await?;
                    return Err(ScanError::ProducerLost);
                }
            }
        }
    }
}

impl Default for BatchDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

struct DrainState {
    pending: Vec<MatchedRecord>,
    batch_size: usize,
    summary: ScanSummary,
}

impl DrainState {
    fn new(batch_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
            summary: ScanSummary::default(),
        }
    }

    /// Hand the pending records to the sink, if any
    async fn flush<S: BatchSink>(
        &mut self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), ScanError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let count = records.len() as u64;
        let batch = Batch::new(self.summary.batches, records);
        self.summary.batches += 1;

        match sink.send_batch(batch).await {
            Ok(()) => {
                self.summary.delivered += count;
                Ok(())
            }
            Err(SinkError::Disconnected) => {
                debug!("sink disconnected, stopping scan");
                cancel.cancel();
                Err(ScanError::Disconnected)
            }
            Err(err) => {
                self.summary.failed_batches += 1;
                warn!(records = count, "failed to send batch: {}", err);
                Ok(())
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
