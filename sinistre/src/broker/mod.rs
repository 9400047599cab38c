//! External message broker plumbing.
//!
//! A [`Broker`] delivers one [`BrokerMessage`]. [`PooledBroker`] implements
//! it on top of any [`BrokerConnection`] by reusing channels: a channel is
//! taken from the pool for one publish, handed back if still open, and
//! discarded otherwise. A channel is never used by two publishes at once.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::{Result, resilience::ResiliencePolicy, settings::PublisherSettings};

#[cfg(feature = "in-memory")]
/// An in-memory broker that records what it receives.
pub mod in_memory;

#[cfg(feature = "nats")]
/// A NATS JetStream broker connection.
pub mod nats;

/// Default number of idle channels a [`PooledBroker`] keeps.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// A message ready for the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerMessage {
    /// Topic exchange the message is published to.
    pub exchange: String,
    /// Routing key within the exchange.
    pub routing_key: String,
    /// Unique message ID, used by the broker to drop duplicates.
    pub message_id: String,
    /// MIME type of `body`.
    pub content_type: String,
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// Serialised message body.
    pub body: Vec<u8>,
}

impl BrokerMessage {
    /// Returns a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The exchange and routing key joined into a single subject.
    pub fn subject(&self) -> String {
        format!("{}.{}", self.exchange, self.routing_key)
    }
}

/// Delivers messages to an external broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes one message, returning once the broker accepted it.
    async fn publish(&self, message: BrokerMessage) -> Result<()>;
}

/// One channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Whether the channel can still be used.
    fn is_open(&self) -> bool;

    /// Publishes one message on this channel.
    async fn publish(&mut self, message: &BrokerMessage) -> Result<()>;
}

/// A connection that can open channels.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// The channel type this connection opens.
    type Channel: BrokerChannel + 'static;

    /// Opens a fresh channel.
    async fn open_channel(&self) -> Result<Self::Channel>;
}

/// A [`Broker`] that reuses channels of one connection.
pub struct PooledBroker<C: BrokerConnection> {
    connection: C,
    idle: Mutex<Vec<C::Channel>>,
    max_idle: usize,
    resilience: ResiliencePolicy,
}

impl<C: BrokerConnection> PooledBroker<C> {
    /// Creates a pool keeping up to [`DEFAULT_POOL_SIZE`] idle channels.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            idle: Mutex::new(Vec::new()),
            max_idle: DEFAULT_POOL_SIZE,
            resilience: ResiliencePolicy::none(),
        }
    }

    /// Creates a pool sized by `settings`, wrapping each publish in
    /// `resilience`.
    pub fn from_settings(
        connection: C,
        settings: &PublisherSettings,
        resilience: ResiliencePolicy,
    ) -> Self {
        Self::new(connection)
            .with_pool_size(settings.pool_size)
            .with_resilience(resilience)
    }

    /// Sets the maximum number of idle channels kept.
    pub fn with_pool_size(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Wraps each publish in the given policy.
    pub fn with_resilience(mut self, resilience: ResiliencePolicy) -> Self {
        self.resilience = resilience;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Number of channels currently waiting in the pool.
    pub fn idle_channels(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> Result<C::Channel> {
        loop {
            let pooled = self.idle.lock().pop();
            match pooled {
                Some(channel) if channel.is_open() => return Ok(channel),
                Some(_) => warn!("discarding closed broker channel"),
                None => return self.connection.open_channel().await,
            }
        }
    }

    fn give_back(&self, channel: C::Channel) {
        if !channel.is_open() {
            warn!("dropping channel closed during publish");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(channel);
        }
    }

    async fn publish_once(&self, message: &BrokerMessage) -> Result<()> {
        let mut channel = self.checkout().await?;
        let outcome = channel.publish(message).await;
        self.give_back(channel);
        outcome
    }
}

#[async_trait]
impl<C: BrokerConnection> Broker for PooledBroker<C> {
    #[instrument(skip(self, message), fields(routing_key = %message.routing_key, message_id = %message.message_id))]
    async fn publish(&self, message: BrokerMessage) -> Result<()> {
        self.resilience.run(|| self.publish_once(&message)).await
    }
}
