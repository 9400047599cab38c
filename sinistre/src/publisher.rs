//! Dual publication of committed facts: first to the external broker, then
//! to in-process subscribers.
//!
//! Delivery is at-least-once. A fact reaches the in-process bus only after
//! the broker accepted it, so subscribers never see a fact the outside world
//! has not.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, instrument};
use url::Url;

use crate::{
    CloudEvent, Error, Event, Fact, Result,
    broker::{Broker, BrokerMessage},
    settings::PublisherSettings,
};

/// Maps fact kinds to broker routing keys.
///
/// Unmapped kinds route to `{entity}.{kind in lowercase}`.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entity: String,
    routes: HashMap<String, String>,
}

impl RoutingTable {
    /// Creates an empty table for the given entity prefix.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            routes: HashMap::new(),
        }
    }

    /// Adds an explicit route.
    pub fn route(mut self, kind: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.routes.insert(kind.into(), routing_key.into());
        self
    }

    /// The routing key for `kind`.
    pub fn routing_key(&self, kind: &str) -> String {
        self.routes
            .get(kind)
            .cloned()
            .unwrap_or_else(|| format!("{}.{}", self.entity, kind.to_lowercase()))
    }
}

/// Reacts to facts published in-process.
#[async_trait]
pub trait FactSubscriber<E: Event>: Send + Sync {
    /// Handles one fact. Must tolerate seeing the same fact twice.
    async fn on_fact(&self, fact: &Fact<E>) -> Result<()>;
}

/// Fans facts out to in-process subscribers, in subscription order.
pub struct NotificationBus<E: Event> {
    subscribers: RwLock<Vec<Arc<dyn FactSubscriber<E>>>>,
}

impl<E: Event> Default for NotificationBus<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

impl<E: Event> NotificationBus<E> {
    /// Adds a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn FactSubscriber<E>>) {
        self.subscribers.write().push(subscriber);
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands the fact to every subscriber, stopping at the first failure.
    pub async fn notify(&self, fact: &Fact<E>) -> Result<()> {
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.on_fact(fact).await?;
        }
        Ok(())
    }
}

/// Publishes committed facts to the broker and the in-process bus.
pub struct FactPublisher<E: Event> {
    broker: Arc<dyn Broker>,
    bus: Arc<NotificationBus<E>>,
    routes: RoutingTable,
    exchange: String,
    source: Option<Url>,
}

impl<E: Event> FactPublisher<E> {
    /// Creates a publisher targeting the default `bsp.events` exchange.
    pub fn new(broker: Arc<dyn Broker>, bus: Arc<NotificationBus<E>>, routes: RoutingTable) -> Self {
        Self {
            broker,
            bus,
            routes,
            exchange: PublisherSettings::default().exchange_name(),
            source: None,
        }
    }

    /// Creates a publisher configured from settings.
    pub fn from_settings(
        broker: Arc<dyn Broker>,
        bus: Arc<NotificationBus<E>>,
        routes: RoutingTable,
        settings: &PublisherSettings,
    ) -> Result<Self> {
        let mut publisher = Self::new(broker, bus, routes).with_exchange(settings.exchange_name());
        if let Some(source) = &settings.source {
            let source = Url::parse(source)
                .map_err(|e| Error::Config(format!("invalid publisher source {source}: {e}")))?;
            publisher = publisher.with_source(source);
        }
        Ok(publisher)
    }

    /// Publishes to the given exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Overrides the CloudEvents source of every fact.
    pub fn with_source(mut self, source: Url) -> Self {
        self.source = Some(source);
        self
    }

    /// The exchange facts are published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The in-process bus.
    pub fn bus(&self) -> &Arc<NotificationBus<E>> {
        &self.bus
    }

    fn message_for(&self, fact: &Fact<E>) -> Result<BrokerMessage> {
        let event = match &self.source {
            Some(source) => CloudEvent::from_fact_with_source(fact, source.clone())?,
            None => CloudEvent::from_fact(fact)?,
        };
        event.to_message(&self.exchange, &self.routes.routing_key(fact.kind()))
    }

    /// Publishes one fact: broker first, then the in-process bus.
    #[instrument(skip(self, fact), fields(event_id = %fact.event_id(), kind = fact.kind()))]
    pub async fn publish(&self, fact: &Fact<E>) -> Result<()> {
        let message = self.message_for(fact)?;
        let routing_key = message.routing_key.clone();

        if let Err(e) = self.broker.publish(message).await {
            error!(error = %e, %routing_key, "broker rejected fact");
            return Err(e);
        }
        if let Err(e) = self.bus.notify(fact).await {
            error!(error = %e, "in-process subscriber failed");
            return Err(e);
        }

        info!(%routing_key, exchange = %self.exchange, "published fact");
        Ok(())
    }

    /// Publishes facts one after another, in order.
    ///
    /// Stops at the first failure and reports how many facts were fully
    /// delivered before it.
    pub async fn publish_batch(&self, facts: &[Fact<E>]) -> Result<()> {
        for (delivered, fact) in facts.iter().enumerate() {
            if let Err(e) = self.publish(fact).await {
                return Err(Error::BatchPublish {
                    delivered,
                    total: facts.len(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }
}
