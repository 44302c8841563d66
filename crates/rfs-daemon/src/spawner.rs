//! Connection task scheduling
//!
//! The accept loop hands each connection to a [`ConnectionSpawner`]. The
//! default spawner starts one detached task per connection with no upper
//! bound; [`BoundedSpawner`] caps the number of live handlers and makes the
//! accept loop wait for a free slot instead.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs connection handlers.
#[async_trait::async_trait]
pub trait ConnectionSpawner: Send + Sync {
    /// Start `task` in the background. May wait before starting it, which
    /// stalls the caller (the accept loop).
    async fn spawn(&self, task: BoxFuture<'static, ()>);

    /// Get the name of this spawner for logging.
    fn name(&self) -> &'static str;
}

/// One detached task per connection, never refuses work
#[derive(Clone, Copy, Debug, Default)]
pub struct UnboundedSpawner;

#[async_trait::async_trait]
impl ConnectionSpawner for UnboundedSpawner {
    async fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }

    fn name(&self) -> &'static str {
        "unbounded"
    }
}

/// At most `limit` handlers alive at once
pub struct BoundedSpawner {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BoundedSpawner {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Handlers that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait::async_trait]
impl ConnectionSpawner for BoundedSpawner {
    async fn spawn(&self, task: BoxFuture<'static, ()>) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!("connection semaphore closed, dropping task");
                return;
            }
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
    }

    fn name(&self) -> &'static str {
        "bounded"
    }
}

/// Pick a spawner for an optional connection cap
pub fn spawner_for(max_connections: Option<usize>) -> Arc<dyn ConnectionSpawner> {
    match max_connections {
        Some(limit) => Arc::new(BoundedSpawner::new(limit)),
        None => Arc::new(UnboundedSpawner),
    }
}
