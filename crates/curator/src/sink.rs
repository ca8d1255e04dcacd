//! Append-only output sinks for classified items.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create sink file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to sink {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to flush sink {name}: {source}")]
    Flush {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Sink: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn append(&mut self, item: &str, diagnostic: &str) -> Result<(), SinkError>;

    /// Persist buffered writes. Called once when the aggregator exits.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes items to a list file (one per line) and `item: diagnostic` lines to
/// a companion response file. Both files are truncated on open.
pub struct FileSink {
    name: String,
    list: BufWriter<File>,
    responses: BufWriter<File>,
}

impl FileSink {
    /// Open `<dir>/<name>.txt` and `<dir>/<name>.response.txt`.
    pub async fn create(dir: impl AsRef<Path>, name: &str) -> Result<Self, SinkError> {
        let dir = dir.as_ref();
        let list = create_file(&dir.join(format!("{name}.txt"))).await?;
        let responses = create_file(&dir.join(format!("{name}.response.txt"))).await?;
        Ok(Self {
            name: name.to_string(),
            list: BufWriter::new(list),
            responses: BufWriter::new(responses),
        })
    }

    fn write_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            name: self.name.clone(),
            source,
        }
    }
}

async fn create_file(path: &Path) -> Result<File, SinkError> {
    File::create(path).await.map_err(|source| SinkError::Create {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&mut self, item: &str, diagnostic: &str) -> Result<(), SinkError> {
        if let Err(e) = self.list.write_all(format!("{item}\n").as_bytes()).await {
            return Err(self.write_error(e));
        }
        let line = format!("{item}: {}\n", diagnostic.replace('\n', " "));
        if let Err(e) = self.responses.write_all(line.as_bytes()).await {
            return Err(self.write_error(e));
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let flushed = match self.list.flush().await {
            Ok(()) => self.responses.flush().await,
            Err(e) => Err(e),
        };
        flushed.map_err(|source| SinkError::Flush {
            name: self.name.clone(),
            source,
        })
    }
}

/// In-memory sink. Clones share the same storage, so a caller can keep one
/// clone to inspect what the aggregator wrote through another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    name: String,
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Arc::default(),
        }
    }

    /// `(item, diagnostic)` pairs in write order.
    pub fn entries(&self) -> Vec<(String, String)> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn items(&self) -> Vec<String> {
        self.entries().into_iter().map(|(item, _)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append(&mut self, item: &str, diagnostic: &str) -> Result<(), SinkError> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push((item.to_string(), diagnostic.to_string()));
        Ok(())
    }
}
