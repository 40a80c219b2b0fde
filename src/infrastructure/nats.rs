//! Order events on NATS.

use async_trait::async_trait;

use crate::domain::events::OrderEvent;
use crate::domain::repository::EventPublisher;
use crate::{FulfillmentError, Result};

/// Publishes each event as JSON on `<prefix>.<kind>`.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub const DEFAULT_PREFIX: &'static str = "storefront.orders";

    pub fn new(client: async_nats::Client) -> Self {
        Self { client, prefix: Self::DEFAULT_PREFIX.to_string() }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await.map_err(|e| FulfillmentError::Storage(format!("nats connect: {}", e)))?;
        Ok(Self::new(client))
    }

    fn subject(&self, event: &OrderEvent) -> String {
        format!("{}.{}", self.prefix, event.kind())
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).map_err(|e| FulfillmentError::Storage(e.to_string()))?;
        self.client
            .publish(self.subject(event), payload.into())
            .await
            .map_err(|e| FulfillmentError::Storage(format!("nats publish: {}", e)))
    }
}
