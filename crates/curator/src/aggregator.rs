//! Result aggregator: routes classifications to the positive/negative sinks.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::result::{Classification, ResultMessage};
use crate::sink::{Sink, SinkError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounts {
    pub positive: usize,
    pub negative: usize,
}

impl AggregateCounts {
    pub fn total(&self) -> usize {
        self.positive + self.negative
    }
}

#[derive(Debug)]
pub enum AggregatorOutcome {
    /// The terminal result arrived; every item was written.
    Completed(AggregateCounts),
    /// The run was cancelled before the terminal result arrived.
    Cancelled(AggregateCounts),
    /// Every sender went away without a terminal result.
    Disconnected(AggregateCounts),
    /// A sink write or flush failed. Earlier writes remain valid.
    SinkFailed {
        counts: AggregateCounts,
        error: SinkError,
    },
}

impl AggregatorOutcome {
    pub fn counts(&self) -> AggregateCounts {
        match self {
            AggregatorOutcome::Completed(counts)
            | AggregatorOutcome::Cancelled(counts)
            | AggregatorOutcome::Disconnected(counts) => *counts,
            AggregatorOutcome::SinkFailed { counts, .. } => *counts,
        }
    }
}

enum Stop {
    Terminal,
    Cancelled,
    Closed,
}

pub struct Aggregator {
    result_rx: mpsc::Receiver<ResultMessage>,
    positive: Box<dyn Sink>,
    negative: Box<dyn Sink>,
    cancel: CancellationToken,
    counts: AggregateCounts,
}

impl Aggregator {
    pub fn new(
        result_rx: mpsc::Receiver<ResultMessage>,
        positive: Box<dyn Sink>,
        negative: Box<dyn Sink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            result_rx,
            positive,
            negative,
            cancel,
            counts: AggregateCounts::default(),
        }
    }

    /// Drain results until a terminal result, cancellation, channel closure or
    /// sink failure. The outcome is sent on `done` on every exit path.
    pub async fn run(mut self, done: oneshot::Sender<AggregatorOutcome>) {
        tracing::info!(
            positive = self.positive.name(),
            negative = self.negative.name(),
            "Starting result aggregation"
        );

        let drained = self.drain().await;
        let flushed = self.flush().await;

        let outcome = match (drained, flushed) {
            (Err(error), _) | (Ok(_), Err(error)) => {
                tracing::error!(error = %error, "Sink failure, aggregation aborted");
                AggregatorOutcome::SinkFailed {
                    counts: self.counts,
                    error,
                }
            }
            (Ok(Stop::Terminal), Ok(())) => AggregatorOutcome::Completed(self.counts),
            (Ok(Stop::Cancelled), Ok(())) => AggregatorOutcome::Cancelled(self.counts),
            (Ok(Stop::Closed), Ok(())) => AggregatorOutcome::Disconnected(self.counts),
        };

        tracing::info!(
            positive = self.counts.positive,
            negative = self.counts.negative,
            "Result aggregation finished"
        );

        // Late senders must see the channel closed once done is signalled.
        self.result_rx.close();
        if done.send(outcome).is_err() {
            tracing::debug!("Aggregator outcome receiver dropped");
        }
    }

    async fn drain(&mut self) -> Result<Stop, SinkError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("Aggregation cancelled");
                    return Ok(Stop::Cancelled);
                }
                message = self.result_rx.recv() => match message {
                    Some(ResultMessage::Classified(classification)) => {
                        self.write(classification).await?;
                    }
                    Some(ResultMessage::Terminal) => {
                        tracing::info!("Received terminal result");
                        return Ok(Stop::Terminal);
                    }
                    None => {
                        tracing::warn!("Result channel closed without a terminal result");
                        return Ok(Stop::Closed);
                    }
                },
            }
        }
    }

    async fn write(&mut self, classification: Classification) -> Result<(), SinkError> {
        let Classification {
            item,
            verdict,
            diagnostic,
        } = classification;

        if verdict {
            self.positive.append(&item, &diagnostic).await?;
            self.counts.positive += 1;
        } else {
            self.negative.append(&item, &diagnostic).await?;
            self.counts.negative += 1;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let positive = self.positive.flush().await;
        let negative = self.negative.flush().await;
        positive.and(negative)
    }
}
