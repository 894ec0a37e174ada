//! Ordered per-key work queues
//!
//! Each key (session id) gets its own bounded channel drained by a single
//! task, so items for one key are handled in push order while different
//! keys proceed in parallel. `push` never waits: a full queue drops the
//! item with a warning.
//!
//! `remove` retires a key's worker: items still queued are dropped, and a
//! worker started later for the same key waits for the retired one to
//! finish, so one key never has two items in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work performed for each queued item
#[async_trait]
pub trait QueueHandler<T>: Send + Sync + 'static {
    async fn handle(&self, key: &str, item: T);
}

struct Lane<T> {
    tx: mpsc::Sender<T>,
    retired: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

pub struct KeyedQueues<T> {
    name: &'static str,
    capacity: usize,
    lanes: DashMap<String, Lane<T>>,
    retiring: DashMap<String, JoinHandle<()>>,
    handler: Arc<dyn QueueHandler<T>>,
}

impl<T: Send + 'static> KeyedQueues<T> {
    pub fn new(name: &'static str, capacity: usize, handler: Arc<dyn QueueHandler<T>>) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            lanes: DashMap::new(),
            retiring: DashMap::new(),
            handler,
        }
    }

    /// Enqueue an item for `key`, spawning its worker on first use
    pub fn push(&self, key: &str, item: T) {
        let sender = self
            .lanes
            .entry(key.to_string())
            .or_insert_with(|| self.spawn_worker(key))
            .tx
            .clone();

        match sender.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(queue = self.name, key, "Queue full, dropping item");
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                // Worker gone; start a fresh one and retry once.
                let lane = self.spawn_worker(key);
                let sender = lane.tx.clone();
                self.lanes.insert(key.to_string(), lane);
                if sender.try_send(item).is_err() {
                    warn!(queue = self.name, key, "Queue unavailable, dropping item");
                }
            }
        }
    }

    /// Retire the queue for `key`. Items not yet started are dropped; an
    /// item already being handled runs to completion.
    pub fn remove(&self, key: &str) {
        if let Some((_, lane)) = self.lanes.remove(key) {
            lane.retired.store(true, Ordering::Release);
            self.retiring.insert(key.to_string(), lane.worker);
            debug!(queue = self.name, key, "Queue removed");
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    fn spawn_worker(&self, key: &str) -> Lane<T> {
        let (tx, mut rx) = mpsc::channel::<T>(self.capacity);
        let retired = Arc::new(AtomicBool::new(false));
        let previous = self.retiring.remove(key).map(|(_, worker)| worker);
        let handler = Arc::clone(&self.handler);
        let key = key.to_string();
        let name = self.name;
        let flag = Arc::clone(&retired);

        let worker = tokio::spawn(async move {
            if let Some(previous) = previous {
                // Join errors only mean the old worker panicked or was aborted.
                let _ = previous.await;
            }
            debug!(queue = name, key = %key, "Queue worker started");
            while let Some(item) = rx.recv().await {
                if flag.load(Ordering::Acquire) {
                    continue;
                }
                handler.handle(&key, item).await;
            }
            debug!(queue = name, key = %key, "Queue worker stopped");
        });

        Lane {
            tx,
            retired,
            worker,
        }
    }
}
