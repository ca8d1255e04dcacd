//! Messages flowing from classification tasks to the aggregator.

/// Outcome of classifying a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub item: String,
    /// `true` routes the item to the positive sink.
    pub verdict: bool,
    /// Raw classifier response, or the failure reason when classification failed.
    pub diagnostic: String,
}

impl Classification {
    pub fn new(item: impl Into<String>, verdict: bool, diagnostic: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            verdict,
            diagnostic: diagnostic.into(),
        }
    }
}

/// A value on the result channel.
///
/// `Terminal` is a control signal emitted exactly once per completed run, after
/// every `Classified` message of that run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultMessage {
    Classified(Classification),
    Terminal,
}

impl ResultMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResultMessage::Terminal)
    }
}

impl From<Classification> for ResultMessage {
    fn from(classification: Classification) -> Self {
        ResultMessage::Classified(classification)
    }
}
