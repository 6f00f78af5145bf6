//! Message queues for inter-component communication.
//!
//! Provides both point-to-point (Queue) and broadcast (BroadcastQueue) messaging.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{MigrateError, Result};

/// Bounded MPMC (multi-producer, multi-consumer) queue.
///
/// Used as the job queue of a stage's worker pool: every batch is enqueued
/// before the workers start, and each batch is consumed by exactly one worker.
/// Backed by flume for high-performance message passing.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: Arc<flume::Receiver<T>>,
    sender: Arc<flume::Sender<T>>,
}

impl<T> Queue<T> {
    /// create a new queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, rx) = flume::bounded(cap);

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// send a message to the queue
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send(msg).map_err(|e| MigrateError::Queue(e.to_string()))
    }

    /// take a message without waiting, `None` once the queue is drained
    pub fn try_next(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// number of queued messages
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Broadcast queue for one-to-many message distribution.
///
/// Used for progress event broadcasting where all subscribers receive every message.
/// Backed by tokio's broadcast channel.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: Arc<broadcast::Sender<T>>,
}

impl<T: Clone> BroadcastQueue<T> {
    /// create a new broadcast queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(cap);

        Arc::new(Self {
            sender: Arc::new(tx),
        })
    }

    /// send a message to the queue, a queue without subscribers drops it
    pub fn send(
        &self,
        msg: T,
    ) {
        let _ = self.sender.send(msg);
    }

    /// subscribe to the queue
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}
