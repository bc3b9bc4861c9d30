//! # In-Memory Broker
//!
//! Broadcast channels back pub/sub; unbounded mpsc queues back the task
//! queues. Suitable for tests and single-process deployments where the
//! worker pool shares the process with the server.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};

use docflow_sdk::broker::{Broker, BrokerSubscription, TaskEnvelope};
use docflow_sdk::error::BrokerError;

const CHANNEL_CAPACITY: usize = 1024;

struct TaskQueue {
    tx: mpsc::UnboundedSender<TaskEnvelope>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskEnvelope>>,
}

impl TaskQueue {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
        })
    }
}

#[derive(Default)]
pub struct MemoryBroker {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    queues: DashMap<String, Arc<TaskQueue>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn queue(&self, name: &str) -> Arc<TaskQueue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(TaskQueue::new)
            .clone()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        // A send with no subscribers is not an error; the frame is simply
        // not observed, matching pub/sub semantics.
        let _ = self.channel(channel).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        Ok(Box::new(MemorySubscription {
            rx: self.channel(channel).subscribe(),
        }))
    }

    async fn push_task(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        self.queue(queue)
            .tx
            .send(envelope.clone())
            .map_err(|_| BrokerError::Closed)
    }

    async fn pop_task(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TaskEnvelope>, BrokerError> {
        let queue = self.queue(queue);
        let mut rx = queue.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(BrokerError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn check(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(Some(frame)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory broker subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
