//! Dispatcher: drains the item channel and runs one classification task per item.
//!
//! Completion is detected cooperatively. The pipeline is drained once the item
//! channel has closed and no task is in flight. Several finishers may observe
//! that at the same moment, so emitting the terminal result is gated by a
//! single compare-and-swap on [`DispatchState`]; exactly one caller wins.
//!
//! Every task sends its result before decrementing the in-flight count, which
//! makes the terminal result the last message on the result channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::classifier::{Classifier, ClassifyError};
use crate::permit::{Permit, PermitPool};
use crate::progress::ProgressReporter;
use crate::result::{Classification, ResultMessage};

/// Shared counters coordinating the drain loop and its tasks.
#[derive(Debug, Default)]
pub struct DispatchState {
    source_exhausted: AtomicBool,
    in_flight: AtomicUsize,
    completion_signaled: AtomicBool,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_item(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_item(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn mark_exhausted(&self) {
        self.source_exhausted.store(true, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::SeqCst)
    }

    /// Source exhausted and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.is_exhausted() && self.in_flight() == 0
    }

    pub fn completion_signaled(&self) -> bool {
        self.completion_signaled.load(Ordering::SeqCst)
    }

    /// Claim the right to emit the terminal result.
    ///
    /// Returns `true` for exactly one caller per run, and only once the
    /// pipeline is drained. Once exhausted, `in_flight` can only decrease, so a
    /// drained observation is final.
    pub fn try_claim_completion(&self) -> bool {
        self.is_drained()
            && self
                .completion_signaled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

/// How the drain loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    SourceClosed,
    Cancelled,
}

pub struct Dispatcher {
    item_rx: mpsc::Receiver<String>,
    result_tx: mpsc::Sender<ResultMessage>,
    classifier: Arc<dyn Classifier>,
    pool: Arc<PermitPool>,
    state: Arc<DispatchState>,
    progress: Arc<ProgressReporter>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        item_rx: mpsc::Receiver<String>,
        result_tx: mpsc::Sender<ResultMessage>,
        classifier: Arc<dyn Classifier>,
        pool: Arc<PermitPool>,
        progress: Arc<ProgressReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            item_rx,
            result_tx,
            classifier,
            pool,
            state: Arc::new(DispatchState::new()),
            progress,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    pub fn state(&self) -> Arc<DispatchState> {
        Arc::clone(&self.state)
    }

    /// Tracker for spawned classification tasks. Closed when the drain loop exits.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Drain the item channel until it closes or the run is cancelled.
    ///
    /// Returns without waiting for in-flight tasks.
    pub async fn run(mut self) -> DrainEnd {
        tracing::info!(concurrency = self.pool.capacity(), "Starting item dispatch");

        let end = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break DrainEnd::Cancelled,
                item = self.item_rx.recv() => match item {
                    Some(item) => {
                        if !self.dispatch(item).await {
                            break DrainEnd::Cancelled;
                        }
                    }
                    None => {
                        tracing::info!("Item channel closed");
                        break DrainEnd::SourceClosed;
                    }
                },
            }
        };

        self.state.mark_exhausted();
        self.tracker.close();

        // Every task may have finished before exhaustion became visible to them.
        if end == DrainEnd::SourceClosed {
            signal_completion(&self.state, &self.result_tx, &self.cancel).await;
        }

        tracing::info!(
            ?end,
            in_flight = self.state.in_flight(),
            "Item dispatch complete"
        );
        end
    }

    /// Returns `false` if the run was cancelled while waiting for a permit.
    async fn dispatch(&self, item: String) -> bool {
        tracing::debug!(%item, "Dispatching item");
        self.state.begin_item();

        let permit = match self.pool.acquire(&self.cancel).await {
            Ok(permit) => permit,
            Err(_) => {
                self.state.finish_item();
                return false;
            }
        };

        let task = ClassifyTask {
            item,
            permit,
            classifier: Arc::clone(&self.classifier),
            result_tx: self.result_tx.clone(),
            state: Arc::clone(&self.state),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        };
        self.tracker.spawn(task.run());
        true
    }
}

struct ClassifyTask {
    item: String,
    permit: Permit,
    classifier: Arc<dyn Classifier>,
    result_tx: mpsc::Sender<ResultMessage>,
    state: Arc<DispatchState>,
    progress: Arc<ProgressReporter>,
    cancel: CancellationToken,
}

impl ClassifyTask {
    async fn run(self) {
        let ClassifyTask {
            item,
            permit,
            classifier,
            result_tx,
            state,
            progress,
            cancel,
        } = self;

        let started = Instant::now();
        let call = AssertUnwindSafe(classifier.classify(&item)).catch_unwind();
        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            res = call => Some(res.unwrap_or_else(|_| {
                Err(ClassifyError::Transport("classifier panicked".to_string()))
            })),
        };

        match outcome {
            None => {
                tracing::debug!(%item, "Classification abandoned on cancellation");
            }
            Some(res) => {
                let classification = match res {
                    Ok(verdict) => Classification::new(item, verdict.positive, verdict.diagnostic),
                    Err(e) => {
                        tracing::warn!(%item, error = %e, "Classification failed, treating as negative");
                        Classification::new(item, false, e.to_string())
                    }
                };
                tracing::debug!(
                    item = %classification.item,
                    verdict = classification.verdict,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Item classified"
                );
                if send_result(&result_tx, classification.into(), &cancel).await {
                    progress.record();
                }
            }
        }

        state.finish_item();
        permit.release();
        signal_completion(&state, &result_tx, &cancel).await;
    }
}

async fn send_result(
    result_tx: &mpsc::Sender<ResultMessage>,
    message: ResultMessage,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;

        res = result_tx.send(message) => res.is_ok(),
        _ = cancel.cancelled() => false,
    }
}

async fn signal_completion(
    state: &DispatchState,
    result_tx: &mpsc::Sender<ResultMessage>,
    cancel: &CancellationToken,
) {
    // A cancelled run is never "completed"; the aggregator stops on the token.
    if cancel.is_cancelled() {
        return;
    }
    if state.try_claim_completion() {
        if send_result(result_tx, ResultMessage::Terminal, cancel).await {
            tracing::info!("Terminal result sent");
        } else {
            tracing::warn!("Terminal result not delivered");
        }
    }
}
