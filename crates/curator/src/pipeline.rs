//! Pipeline controller: wires the source, dispatcher and aggregator together
//! and turns their outcomes into a single run result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, AggregatorOutcome};
use crate::classifier::Classifier;
use crate::dispatcher::Dispatcher;
use crate::permit::PermitPool;
use crate::progress::{ProgressReporter, average_millis};
use crate::sink::{Sink, SinkError};
use crate::source::{FeedEnd, ItemSource, SourceError, feed_items};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("result aggregator stopped unexpectedly: {0}")]
    Aggregator(String),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum concurrent classifications.
    pub concurrency: usize,
    /// Item cap; negative means unbounded.
    pub max_items: i64,
    /// Capacity of the item and result channels.
    pub channel_capacity: usize,
    /// Log progress every N completions.
    pub report_interval: usize,
    /// How long to wait for in-flight tasks after the run ends.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_items: -1,
            channel_capacity: 100,
            report_interval: 200,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_max_items(mut self, n: i64) -> Self {
        self.max_items = n;
        self
    }

    pub fn with_channel_capacity(mut self, n: usize) -> Self {
        self.channel_capacity = n;
        self
    }

    pub fn with_report_interval(mut self, n: usize) -> Self {
        self.report_interval = n;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        if self.report_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "report interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counts reported for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub positive: usize,
    pub negative: usize,
    /// Items taken from the source and handed to the dispatcher.
    pub read: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.positive + self.negative
    }

    pub fn average_millis(&self) -> f64 {
        average_millis(self.elapsed, self.total())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every item read was classified and written.
    Completed(RunSummary),
    /// The caller cancelled the run; the summary covers what was written.
    Cancelled(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Cancelled(summary) => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    classifier: Arc<dyn Classifier>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classify every item from `source`, routing positives to `positive` and
    /// negatives to `negative`.
    ///
    /// Returns once the aggregator has finished. Cancelling `cancel` stops
    /// reading, abandons in-flight classifications and returns
    /// [`RunOutcome::Cancelled`]. A source read error lets already-read items
    /// finish before it is returned; a sink failure stops the run.
    pub async fn run<S>(
        &self,
        source: &mut S,
        positive: Box<dyn Sink>,
        negative: Box<dyn Sink>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError>
    where
        S: ItemSource + ?Sized,
    {
        let started = Instant::now();
        // Internal failures stop this run without touching the caller's token.
        let run_cancel = cancel.child_token();

        let (item_tx, item_rx) = mpsc::channel(self.config.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.config.channel_capacity);
        let (done_tx, mut done_rx) = oneshot::channel();

        let dispatcher = Dispatcher::new(
            item_rx,
            result_tx,
            Arc::clone(&self.classifier),
            Arc::new(PermitPool::new(self.config.concurrency)),
            Arc::new(ProgressReporter::new(self.config.report_interval)),
            run_cancel.clone(),
        );
        let tracker = dispatcher.tracker();
        let aggregator = Aggregator::new(result_rx, positive, negative, run_cancel.clone());

        tracing::info!(
            concurrency = self.config.concurrency,
            max_items = self.config.max_items,
            "Starting pipeline run"
        );

        let drain = tokio::spawn(dispatcher.run());
        tokio::spawn(aggregator.run(done_tx));

        let feeding = feed_items(source, item_tx, &run_cancel, self.config.max_items);
        tokio::pin!(feeding);

        // The aggregator can stop before the source is exhausted (sink failure
        // or cancellation); the feed loop must not outlive it.
        let (fed, early) = tokio::select! {
            biased;

            fed = &mut feeding => (fed, None),
            outcome = &mut done_rx => {
                run_cancel.cancel();
                ((&mut feeding).await, Some(outcome))
            }
        };

        let read = match &fed {
            Ok(stats) => {
                tracing::info!(read = stats.sent, end = ?stats.end, "Item source finished");
                if stats.end == FeedEnd::Disconnected {
                    tracing::warn!("Dispatcher stopped before the item source was drained");
                }
                stats.sent
            }
            Err(e) => {
                tracing::error!(error = %e, "Item source failed, finishing items already read");
                0
            }
        };

        let outcome = match early {
            Some(outcome) => outcome,
            None => (&mut done_rx).await,
        };

        // Anything still running belongs to a run that is over.
        run_cancel.cancel();
        if let Err(e) = drain.await {
            tracing::error!(error = %e, "Dispatch loop panicked");
        }
        tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = tracker.len(),
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "Classification tasks still running after shutdown grace"
            );
        }

        let outcome = outcome
            .map_err(|_| PipelineError::Aggregator("aggregator task panicked".to_string()))?;
        let counts = outcome.counts();
        let summary = RunSummary {
            positive: counts.positive,
            negative: counts.negative,
            read,
            elapsed: started.elapsed(),
        };

        fed?;
        let result = match outcome {
            AggregatorOutcome::Completed(_) => RunOutcome::Completed(summary),
            AggregatorOutcome::Cancelled(_) => RunOutcome::Cancelled(summary),
            AggregatorOutcome::SinkFailed { error, .. } => return Err(error.into()),
            AggregatorOutcome::Disconnected(_) if cancel.is_cancelled() => {
                RunOutcome::Cancelled(summary)
            }
            AggregatorOutcome::Disconnected(_) => {
                return Err(PipelineError::Aggregator(
                    "result channel closed without a terminal result".to_string(),
                ));
            }
        };

        tracing::info!(
            completed = result.is_completed(),
            read = summary.read,
            positive = summary.positive,
            negative = summary.negative,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            average_ms = summary.average_millis(),
            "Pipeline run finished"
        );
        Ok(result)
    }
}
