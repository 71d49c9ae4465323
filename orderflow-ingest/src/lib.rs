//! orderflow ingestion
//!
//! Turns order payloads from the stream and from bootstrap files into
//! durable store rows plus best-effort cache entries, and serves reads
//! cache-first with store fallback.

pub mod bootstrap;
pub mod consumer;
pub mod index;
pub mod pipeline;
pub mod read_path;
pub mod republish;
pub mod state;
pub mod transport;

pub use bootstrap::{bootstrap_from_dir, list_order_files, BootstrapSummary};
pub use consumer::{run_consumer, ConsumerStats, StopReason};
pub use index::ProcessedIndex;
pub use pipeline::{
    FailedStage, IngestInput, IngestPipeline, PipelineConfig, PipelineMetrics, PipelineSnapshot,
    ProcessReport, StageResult,
};
pub use read_path::{OrderReadPath, ReadMetrics, ReadResult, ReadSource};
pub use republish::republish_order;
pub use state::ProcessState;
pub use transport::{InMemoryQueue, MessageSink, MessageSource, ReceivedMessage};
