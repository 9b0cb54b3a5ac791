//! Streaming scan pipeline for auditscan
//!
//! This crate provides line splitting, pattern filtering, timestamp extraction,
//! the bounded producer/consumer pipeline and batch delivery.

mod dispatcher;
mod extractor;
mod filter;
mod pipeline;
mod sink;
mod splitter;

pub use dispatcher::{BatchDispatcher, DEFAULT_BATCH_SIZE};
pub use extractor::RecordExtractor;
pub use filter::{CompiledFilter, FilterOptions};
pub use pipeline::{
    DEFAULT_QUEUE_CAPACITY, PipelineConfig, ProducerExit, ProducerReport, ProducerState,
    ScanHandle, ScanPipeline,
};
pub use sink::{BatchSink, ChannelSink, CollectSink, WriterSink};
pub use splitter::{LineSplitter, RawLine};

// Re-export types used in our public API
pub use auditscan_types::{
    Batch, DurationMap, LineError, LineErrorReason, MatchedRecord, PipelineItem, ScanError,
    ScanSummary, SinkError,
};
