//! Classifier capability: the slow external call made once per item.

mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use ollama::{OllamaClassifier, OllamaConfig, parse_verdict};

/// Verdict and diagnostic payload returned by a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub positive: bool,
    pub diagnostic: String,
}

impl Verdict {
    pub fn new(positive: bool, diagnostic: impl Into<String>) -> Self {
        Self {
            positive,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Per-item classification failure. Never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unparsable classifier response: {0}")]
    Parse(String),
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &str) -> Result<Verdict, ClassifyError>;
}

#[async_trait]
impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    async fn classify(&self, item: &str) -> Result<Verdict, ClassifyError> {
        (**self).classify(item).await
    }
}
