//! Publishes broker messages to NATS JetStream.
//!
//! The exchange and routing key map to the subject
//! `{exchange}.{routing_key}`. The message ID is sent as `Nats-Msg-Id` so
//! that JetStream drops redelivered duplicates within its window.

use async_nats::{HeaderMap, jetstream};
use async_trait::async_trait;
use tracing::{info, instrument};

use super::{BrokerChannel, BrokerConnection, BrokerMessage};
use crate::{Error, Result, settings::NatsSettings};

/// A JetStream connection.
#[derive(Clone)]
pub struct NatsConnection {
    jetstream: jetstream::Context,
}

impl NatsConnection {
    /// Connects to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Broker(format!("failed to connect to {url}: {e}")))?;
        Ok(Self::new(client))
    }

    /// Connects to the server named in `settings`.
    pub async fn from_settings(settings: &NatsSettings) -> Result<Self> {
        Self::connect(&settings.url).await
    }

    /// Wraps an existing client.
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Creates the stream capturing every subject of `exchange`, unless it
    /// already exists.
    #[instrument(skip(self))]
    pub async fn ensure_stream(&self, exchange: &str) -> Result<()> {
        let name = exchange.replace('.', "_").to_uppercase();
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: name.clone(),
                subjects: vec![format!("{exchange}.>")],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        info!(stream = %name, "stream ready");
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    type Channel = NatsChannel;

    async fn open_channel(&self) -> Result<NatsChannel> {
        Ok(NatsChannel {
            jetstream: self.jetstream.clone(),
            open: true,
        })
    }
}

/// A JetStream publishing handle.
pub struct NatsChannel {
    jetstream: jetstream::Context,
    open: bool,
}

#[async_trait]
impl BrokerChannel for NatsChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn publish(&mut self, message: &BrokerMessage) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.message_id.as_str());
        headers.insert("Content-Type", message.content_type.as_str());
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), value.as_str());
        }

        let acked = async {
            self.jetstream
                .publish_with_headers(message.subject(), headers, message.body.clone().into())
                .await
                .map_err(|e| Error::Broker(e.to_string()))?
                .await
                .map_err(|e| Error::Broker(e.to_string()))
        }
        .await;

        if acked.is_err() {
            self.open = false;
        }
        acked.map(|_| ())
    }
}
