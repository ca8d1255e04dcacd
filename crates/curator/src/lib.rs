//! curator: bounded-concurrency item classification pipeline.

pub mod aggregator;
pub mod classifier;
pub mod dispatcher;
pub mod logging;
pub mod permit;
pub mod pipeline;
pub mod progress;
pub mod result;
pub mod signal;
pub mod sink;
pub mod source;

pub use aggregator::{AggregateCounts, Aggregator, AggregatorOutcome};
pub use classifier::{Classifier, ClassifyError, OllamaClassifier, OllamaConfig, Verdict};
pub use dispatcher::{DispatchState, Dispatcher};
pub use logging::{LogFileConfig, LogReloadHandle, init_tracing, watch_log_config};
pub use permit::{Permit, PermitError, PermitPool};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunOutcome, RunSummary};
pub use progress::ProgressReporter;
pub use result::{Classification, ResultMessage};
pub use signal::{ShutdownReason, cancel_on_signal, shutdown_signal};
pub use sink::{FileSink, MemorySink, Sink, SinkError};
pub use source::{ItemSource, LineSource, SourceError, VecSource};

/// Crate version, reported in logs and the HTTP user agent.
pub const CURATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
