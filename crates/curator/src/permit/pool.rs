//! Permit pool implementation backed by a bounded mpsc channel of tokens.
//!
//! The channel capacity equals the number of permits, so returning a permit
//! never blocks. If the pool itself has been dropped, returning a permit is a
//! no-op and the token is discarded.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Identifier of a permit within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermitId(usize);

impl PermitId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PermitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permit-{}", self.0)
    }
}

struct PermitInner {
    id: PermitId,
}

struct PoolConnection {
    pool_tx: mpsc::Sender<PermitInner>,
    available: Arc<AtomicUsize>,
}

/// A permit held by an in-flight task. Returns to the pool on drop.
pub struct Permit {
    id: PermitId,
    pool: Option<PoolConnection>,
}

impl Permit {
    pub fn id(&self) -> PermitId {
        self.id
    }

    /// Return the permit to the pool. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("id", &self.id).finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };

        // Count first so `available` never underflows when a waiter picks the
        // token up before we get to increment.
        pool.available.fetch_add(1, Ordering::AcqRel);
        if pool.pool_tx.try_send(PermitInner { id: self.id }).is_err() {
            pool.available.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(permit = %self.id, "Pool gone - discarding permit");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermitError {
    #[error("permit acquisition cancelled")]
    Cancelled,
}

/// Fixed-capacity pool of reusable permits.
///
/// No fairness is guaranteed between concurrent acquirers beyond the order in
/// which they obtain the internal receiver lock.
pub struct PermitPool {
    available_rx: Mutex<mpsc::Receiver<PermitInner>>,
    available_tx: mpsc::Sender<PermitInner>,
    capacity: usize,
    available: Arc<AtomicUsize>,
}

impl PermitPool {
    /// Create a pool holding `capacity` permits. `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        for index in 0..capacity {
            // Cannot fail: the channel has room for exactly `capacity` tokens.
            let _ = tx.try_send(PermitInner {
                id: PermitId(index),
            });
        }

        Self {
            available_rx: Mutex::new(rx),
            available_tx: tx,
            capacity,
            available: Arc::new(AtomicUsize::new(capacity)),
        }
    }

    fn wrap(&self, inner: PermitInner) -> Permit {
        self.available.fetch_sub(1, Ordering::AcqRel);
        Permit {
            id: inner.id,
            pool: Some(PoolConnection {
                pool_tx: self.available_tx.clone(),
                available: Arc::clone(&self.available),
            }),
        }
    }

    /// Take a permit if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut rx = self.available_rx.try_lock().ok()?;
        let inner = rx.try_recv().ok()?;
        Some(self.wrap(inner))
    }

    /// Wait for a free permit, or fail once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, PermitError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(PermitError::Cancelled),
            permit = self.acquire_uncancellable() => Ok(permit),
        }
    }

    async fn acquire_uncancellable(&self) -> Permit {
        let mut rx = self.available_rx.lock().await;
        match rx.recv().await {
            Some(inner) => self.wrap(inner),
            // The pool owns a sender, so the channel never reports closed.
            None => std::future::pending().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}
