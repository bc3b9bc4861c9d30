//! # Redis Broker
//!
//! Pub/sub carries event envelopes; lists (LPUSH producer, BRPOP consumer)
//! carry per-plugin task queues. Queue keys are namespaced under
//! `docflow:queue:`.

use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use docflow_sdk::broker::{Broker, BrokerSubscription, TaskEnvelope};
use docflow_sdk::error::BrokerError;

const QUEUE_KEY_PREFIX: &str = "docflow:queue:";

fn connection_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Connection {
        message: e.to_string(),
    }
}

pub struct RedisBroker {
    client: redis::Client,
    /// Cached multiplexed connection for commands; reset on error
    connection: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisBroker {
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        tracing::info!("redis broker initialized");
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BrokerError> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    async fn reset_connection(&self) {
        *self.connection.lock().await = None;
    }

    fn queue_key(queue: &str) -> String {
        format!("{QUEUE_KEY_PREFIX}{queue}")
    }
}

#[async_trait::async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut connection = self.connection().await?;
        let result: Result<(), redis::RedisError> = connection.publish(channel, payload).await;
        if let Err(e) = result {
            self.reset_connection().await;
            return Err(connection_error(e));
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let connection = self
            .client
            .get_async_connection()
            .await
            .map_err(connection_error)?;
        let mut pubsub = connection.into_pubsub();
        pubsub.subscribe(channel).await.map_err(connection_error)?;
        Ok(Box::new(RedisSubscription { pubsub }))
    }

    async fn push_task(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let frame = serde_json::to_vec(envelope)?;
        let mut connection = self.connection().await?;
        let result: Result<(), redis::RedisError> =
            connection.lpush(Self::queue_key(queue), frame).await;
        if let Err(e) = result {
            self.reset_connection().await;
            return Err(connection_error(e));
        }
        Ok(())
    }

    async fn pop_task(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TaskEnvelope>, BrokerError> {
        let mut connection = self.connection().await?;
        let result: Result<Option<(String, Vec<u8>)>, redis::RedisError> = connection
            .brpop(Self::queue_key(queue), timeout.as_secs_f64())
            .await;
        match result {
            Ok(Some((_, frame))) => Ok(Some(serde_json::from_slice(&frame)?)),
            Ok(None) => Ok(None),
            Err(e) => {
                self.reset_connection().await;
                Err(connection_error(e))
            }
        }
    }

    async fn check(&self) -> Result<(), BrokerError> {
        let mut connection = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await
            .map(|_| ())
            .map_err(connection_error)
    }
}

struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait::async_trait]
impl BrokerSubscription for RedisSubscription {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut stream = self.pubsub.on_message();
        match stream.next().await {
            Some(message) => {
                let payload: Vec<u8> = message.get_payload().map_err(connection_error)?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }
}
