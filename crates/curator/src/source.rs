//! Item source: a lazy, finite stream of items pushed into the item channel.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open item source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read item source at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ItemSource: Send {
    /// Next item, or `None` once the stream is exhausted.
    async fn next_item(&mut self) -> Result<Option<String>, SourceError>;
}

/// Reads one item per line from a text file. Lines are trimmed and blank
/// lines are skipped.
pub struct LineSource {
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl LineSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }
}

#[async_trait]
impl ItemSource for LineSource {
    async fn next_item(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            self.line += 1;
            let next = self
                .lines
                .next_line()
                .await
                .map_err(|source| SourceError::Read {
                    line: self.line,
                    source,
                })?;
            match next {
                Some(raw) => {
                    let item = raw.trim();
                    if !item.is_empty() {
                        return Ok(Some(item.to_string()));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

/// In-memory source over a fixed list of items.
#[derive(Debug, Default)]
pub struct VecSource {
    items: VecDeque<String>,
}

impl VecSource {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ItemSource for VecSource {
    async fn next_item(&mut self) -> Result<Option<String>, SourceError> {
        Ok(self.items.pop_front())
    }
}

/// How a feed loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    /// The source reported end of stream.
    Exhausted,
    /// The item cap was reached before the source ran out.
    Capped,
    /// The run was cancelled.
    Cancelled,
    /// The receiving side of the item channel went away.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub sent: usize,
    pub end: FeedEnd,
}

/// Push items from `source` into `item_tx` until the source is exhausted, the
/// cap is reached, or `cancel` fires.
///
/// `max_items < 0` means unbounded. `item_tx` is consumed and dropped on every
/// exit path, so the receiver always observes the channel closing. On a read
/// error, items already sent remain in the channel.
pub async fn feed_items<S>(
    source: &mut S,
    item_tx: mpsc::Sender<String>,
    cancel: &CancellationToken,
    max_items: i64,
) -> Result<FeedStats, SourceError>
where
    S: ItemSource + ?Sized,
{
    let cap = usize::try_from(max_items).ok();
    let mut sent = 0usize;

    let end = loop {
        if cap.is_some_and(|cap| sent >= cap) {
            break FeedEnd::Capped;
        }

        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => break FeedEnd::Cancelled,
            next = source.next_item() => next?,
        };

        let Some(item) = next else {
            break FeedEnd::Exhausted;
        };

        tracing::trace!(%item, "Queueing item");
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break FeedEnd::Cancelled,
            res = item_tx.send(item) => {
                if res.is_err() {
                    break FeedEnd::Disconnected;
                }
            }
        }
        sent += 1;
    };

    drop(item_tx);
    Ok(FeedStats { sent, end })
}
