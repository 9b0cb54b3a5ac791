use std::io::{BufReader, Read};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use auditscan_types::{DurationMap, PipelineItem, ScanError, ScanSummary};

use crate::dispatcher::{BatchDispatcher, DEFAULT_BATCH_SIZE};
use crate::extractor::RecordExtractor;
use crate::filter::CompiledFilter;
use crate::sink::BatchSink;
use crate::splitter::{LineSplitter, RawLine};

/// Default number of items the queue holds before the producer blocks
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Tunables for one scan
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bounded queue capacity between producer and consumer
    pub queue_capacity: usize,

    /// Records per delivered batch
    pub batch_size: usize,

    /// How long to wait for the producer to exit once the scan is over
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Producer lifecycle: `Idle -> Running -> Draining -> Stopped`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Running,
    /// Sending the terminal item
    Draining,
    Stopped,
}

/// Why the producer stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerExit {
    /// Sent `EndOfStream`
    EndOfStream,
    /// Sent `Fatal`
    Fatal,
    /// Scan token was cancelled
    Cancelled,
    /// Consumer closed the queue
    Disconnected,
}

/// Counters reported by a finished producer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerReport {
    pub exit: ProducerExit,
    pub lines: u64,
    pub matched: u64,
    pub state: ProducerState,
}

/// Runs scans: one producer thread feeding one consumer through a bounded queue
#[derive(Clone, Debug, Default)]
pub struct ScanPipeline {
    config: PipelineConfig,
    durations: Option<Arc<DurationMap>>,
}

impl ScanPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            durations: None,
        }
    }

    /// Record time spent matching and extracting under the `parsing` phase
    pub fn with_durations(mut self, durations: Arc<DurationMap>) -> Self {
        self.durations = Some(durations);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start the producer on a blocking thread and return the consumer side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R>(&self, reader: R, filter: CompiledFilter, cancel: CancellationToken) -> ScanHandle
    where
        R: Read + Send + 'static,
    {
        debug!(
            pattern = filter.pattern(),
            options = ?filter.options(),
            queue_capacity = self.config.queue_capacity,
            "starting scan producer"
        );
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let producer = Producer {
            lines: LineSplitter::new(BufReader::with_capacity(READ_BUFFER_SIZE, reader)),
            filter,
            tx,
            cancel: cancel.clone(),
            durations: self.durations.clone(),
            state: ProducerState::Idle,
            matched: 0,
        };

        let task = tokio::task::spawn_blocking(move || producer.run());

        ScanHandle {
            items: rx,
            producer: Some(task),
            cancel,
        }
    }

    /// Scan `reader` to completion, delivering batches to `sink`.
    ///
    /// Cancelling `cancel` stops both sides and yields `ScanError::Cancelled`.
    pub async fn run<R, S>(
        &self,
        reader: R,
        filter: CompiledFilter,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ScanError>
    where
        R: Read + Send + 'static,
        S: BatchSink,
    {
        let mut handle = self.spawn(reader, filter, cancel.child_token());
        let dispatcher = BatchDispatcher::new(self.config.batch_size);

        let scan_cancel = handle.cancel_token().clone();
        let result = dispatcher
            .drain(handle.items_mut(), sink, &scan_cancel)
            .await;

        handle.stop();
        if let Some(report) = handle.join(self.config.shutdown_timeout).await {
            debug!(
                lines = report.lines,
                matched = report.matched,
                exit = ?report.exit,
                "producer finished"
            );
        }

        result
    }
}

/// Consumer side of a running scan.
///
/// Dropping the handle cancels the producer.
pub struct ScanHandle {
    items: mpsc::Receiver<PipelineItem>,
    producer: Option<JoinHandle<ProducerReport>>,
    cancel: CancellationToken,
}

impl ScanHandle {
    pub fn items_mut(&mut self) -> &mut mpsc::Receiver<PipelineItem> {
        &mut self.items
    }

    /// Receive the next item, `None` once the producer is gone
    pub async fn next_item(&mut self) -> Option<PipelineItem> {
        self.items.recv().await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the producer to stop and release anything blocked on the queue
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.items.close();
    }

    /// Check if the producer is still running
    pub fn is_running(&self) -> bool {
        self.producer.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wait up to `timeout` for the producer to exit
    pub async fn join(&mut self, timeout: Duration) -> Option<ProducerReport> {
        let task = self.producer.as_mut()?;
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(report)) => {
                self.producer = None;
                Some(report)
            }
            Ok(Err(e)) => {
                self.producer = None;
                warn!("scan producer failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "scan producer still running after {:?}, it will exit at the next line",
                    timeout
                );
                None
            }
        }
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Producer<R> {
    lines: LineSplitter<R>,
    filter: CompiledFilter,
    tx: mpsc::Sender<PipelineItem>,
    cancel: CancellationToken,
    durations: Option<Arc<DurationMap>>,
    state: ProducerState,
    matched: u64,
}

impl<R: std::io::BufRead> Producer<R> {
    fn run(mut self) -> ProducerReport {
        self.state = ProducerState::Running;
        let exit = self.scan();
        self.state = ProducerState::Stopped;

        ProducerReport {
            exit,
            lines: self.lines.lines_read(),
            matched: self.matched,
            state: self.state,
        }
    }

    fn scan(&mut self) -> ProducerExit {
        while let Some(line) = self.lines.next() {
            if self.cancel.is_cancelled() {
                return ProducerExit::Cancelled;
            }

            let item = match line {
                Ok(line) => match self.process(line) {
                    Some(item) => item,
                    None => continue,
                },
                Err(e) => {
                    return match self.enqueue(PipelineItem::Fatal(ScanError::Read(e))) {
                        Ok(()) => ProducerExit::Fatal,
                        Err(exit) => exit,
                    };
                }
            };

            if let Err(exit) = self.enqueue(item) {
                return exit;
            }
        }

        match self.enqueue(PipelineItem::EndOfStream) {
            Ok(()) => ProducerExit::EndOfStream,
            Err(exit) => exit,
        }
    }

    /// Match and extract one line; `None` if it does not match
    fn process(&mut self, line: RawLine) -> Option<PipelineItem> {
        let _timer = self.durations.as_deref().map(|d| d.track("parsing"));

        if !self.filter.matches(&line.bytes) {
            return None;
        }
        self.matched += 1;

        let raw = String::from_utf8(line.bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        Some(match RecordExtractor::extract(line.number, raw) {
            Ok(record) => PipelineItem::Record(record),
            Err(err) => PipelineItem::LineError(err),
        })
    }

    /// Blocking send; waits while the queue is full
    fn enqueue(&mut self, item: PipelineItem) -> Result<(), ProducerExit> {
        if self.cancel.is_cancelled() {
            return Err(ProducerExit::Cancelled);
        }
        if item.is_terminal() {
            self.state = ProducerState::Draining;
        }
        self.tx
            .blocking_send(item)
            .map_err(|_| ProducerExit::Disconnected)
    }
}
