//! Component I: republishes verified `InstanceExists` rows to a durable AMQP
//! topic exchange. One long-lived pooled connection is shared across
//! workers; each publish acquires a channel from it, the way §5 describes
//! ("one long-lived broker connection... channels acquired from a bounded
//! pool").

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_lapin::{Config as PoolConfig, Pool, Runtime};
use iaudit_domain::InstanceExists;
use iaudit_store::Store;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ExchangeKind};
use tracing::debug;

use crate::envelope::build_outbound;
use crate::error::PublishError;

pub struct AmqpPublisher {
    store: Arc<dyn Store>,
    pool: Pool,
    exchange: String,
    routing_keys: Vec<String>,
}

impl AmqpPublisher {
    /// Connects to the broker, declares the durable topic exchange once, and
    /// returns a publisher ready to share across the worker pool.
    pub async fn connect(store: Arc<dyn Store>, amqp_url: &str, exchange: &str, routing_keys: Vec<String>) -> Result<Self, PublishError> {
        let pool_config = PoolConfig { url: Some(amqp_url.to_string()), ..Default::default() };
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| PublishError::Connect(e.to_string()))?;

        let connection = pool.get().await?;
        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        Ok(AmqpPublisher { store, pool, exchange: exchange.to_string(), routing_keys })
    }

    async fn publish_inner(&self, exists: &InstanceExists) -> Result<(), PublishError> {
        let raw = self
            .store
            .get_raw(exists.raw_id)
            .await?
            .ok_or(PublishError::MissingRaw(exists.raw_id))?;

        let outbound = build_outbound(&raw.json, exists, &self.routing_keys)?;

        let connection = self.pool.get().await?;
        let channel = connection.create_channel().await?;
        for routing_key in &outbound.routing_keys {
            channel
                .basic_publish(
                    &self.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &outbound.body,
                    BasicProperties::default().with_delivery_mode(2), // persistent
                )
                .await?
                .await?; // wait for broker confirmation of the publish itself
            debug!(instance_id = %exists.instance_id, routing_key, "published verified exists");
        }
        Ok(())
    }
}

#[async_trait]
impl iaudit_verifier::Publisher for AmqpPublisher {
    async fn publish(&self, exists: &InstanceExists) -> anyhow::Result<()> {
        self.publish_inner(exists).await.map_err(Into::into)
    }
}
