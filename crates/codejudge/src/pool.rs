//! Worker pool
//!
//! Bounds how many submissions run at once. Each [`Slot`] carries the isolate
//! box id it may use; ids come from a free list, so no two live slots ever
//! share a box. Waiters are served in arrival order by tokio's fair
//! semaphore, and the queue in front of it is bounded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("all {capacity} workers are busy and the queue of {queue_length} is full")]
    QueueFull {
        capacity: usize,
        queue_length: usize,
    },

    #[error("no worker became free within {0:?}")]
    QueueTimeout(Duration),

    #[error("worker pool is shutting down")]
    Closed,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub queued: usize,
}

#[derive(Debug)]
struct PoolState {
    queued: usize,
    free_ids: VecDeque<u32>,
}

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    capacity: usize,
    queue_length: usize,
    queue_timeout: Duration,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of execution slots, cheap to clone
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(
        capacity: usize,
        first_box_id: u32,
        queue_length: usize,
        queue_timeout: Duration,
    ) -> Self {
        let capacity = capacity.max(1);
        let free_ids = (0..capacity as u32).map(|i| first_box_id + i).collect();

        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                state: Mutex::new(PoolState {
                    queued: 0,
                    free_ids,
                }),
                capacity,
                queue_length,
                queue_timeout,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pool_capacity(),
            config.pool.first_box_id,
            config.pool.queue_length,
            Duration::from_secs(config.pool.queue_timeout_secs),
        )
    }

    /// Wait for a free slot.
    ///
    /// Fails immediately when every slot is taken and the queue is full, and
    /// after the queue timeout when no slot frees up in time.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Slot, PoolError> {
        {
            let mut state = self.inner.state();
            if self.inner.semaphore.available_permits() == 0
                && state.queued >= self.inner.queue_length
            {
                return Err(PoolError::QueueFull {
                    capacity: self.inner.capacity,
                    queue_length: self.inner.queue_length,
                });
            }
            state.queued += 1;
        }

        let permit = {
            let _queued = QueueGuard(&self.inner);
            let acquire = self.inner.semaphore.clone().acquire_owned();
            match tokio::time::timeout(self.inner.queue_timeout, acquire).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => return Err(PoolError::QueueTimeout(self.inner.queue_timeout)),
            }
        };

        let box_id = self
            .inner
            .state()
            .free_ids
            .pop_front()
            .expect("every permit has a free box id");
        debug!(box_id, "slot acquired");

        Ok(Slot {
            box_id,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Stop handing out slots; current and future waiters fail with
    /// [`PoolError::Closed`]
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let queued = self.inner.state().queued;
        PoolStats {
            capacity: self.inner.capacity,
            available: self.inner.semaphore.available_permits(),
            queued,
        }
    }
}

/// Takes a waiter out of the queue count however the wait ends
struct QueueGuard<'a>(&'a Inner);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.state().queued -= 1;
    }
}

/// The right to run one submission in one isolate box.
///
/// Dropping the slot returns its box id and then its permit.
#[derive(Debug)]
pub struct Slot {
    box_id: u32,
    pool: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn box_id(&self) -> u32 {
        self.box_id
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.pool.state().free_ids.push_back(self.box_id);
        debug!(box_id = self.box_id, "slot released");
    }
}
