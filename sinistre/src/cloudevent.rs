//! CloudEvent conversion utilities.
//!
//! Every fact leaves the process as a CloudEvents 1.0 envelope: the fact ID
//! becomes the CloudEvent `id`, the fact kind its `type`, and correlation
//! metadata travels as the `correlationid`, `causationid` and `actorid`
//! extensions. The whole fact is carried as JSON `data`.
//!
//! # Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use sinistre::{CloudEvent, Event, Fact, Metadata};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Event)]
//! #[event(source = "urn:example:orders")]
//! enum OrderEvent {
//!     Placed { total: u32 },
//! }
//!
//! let fact = Fact::new("order-1", OrderEvent::Placed { total: 3 }, Metadata::new("corr-1", "alice"));
//! let ce = CloudEvent::from_fact(&fact)?;
//! assert_eq!(ce.correlation_id().as_deref(), Some("corr-1"));
//! # Ok::<(), sinistre::Error>(())
//! ```

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use cloudevents::{
    AttributesReader,
    event::{Data, Event as CeEvent, EventBuilder, EventBuilderV10},
};
use tracing::instrument;
use url::Url;

use crate::{Error, Event, Fact, Result, broker::BrokerMessage};

const CONTENT_TYPE: &str = "application/json";

/// Newtype wrapper around `cloudevents_sdk::Event`.
#[derive(Debug, Clone)]
pub struct CloudEvent(pub CeEvent);

impl CloudEvent {
    /// Returns the inner [`cloudevents_sdk::Event`].
    #[must_use]
    pub fn into_inner(self) -> CeEvent {
        self.0
    }

    /// Builds a CloudEvent from a fact, using the payload's own source.
    pub fn from_fact<E: Event>(fact: &Fact<E>) -> Result<Self> {
        let source_str = fact.payload().event_source();
        let source = Url::parse(source_str)
            .map_err(|e| Error::Serialization(format!("invalid event source {source_str}: {e}")))?;
        Self::from_fact_with_source(fact, source)
    }

    /// Builds a CloudEvent from a fact and an explicit [`Url`] source.
    #[instrument(skip(fact), fields(event_id = %fact.event_id()))]
    pub fn from_fact_with_source<E: Event>(fact: &Fact<E>, source: Url) -> Result<Self> {
        let data = serde_json::to_value(fact)
            .map_err(|e| Error::Serialization(format!("failed to serialise fact: {e}")))?;
        let metadata = fact.metadata();

        let mut builder = EventBuilderV10::new()
            .id(fact.event_id().to_string())
            .ty(fact.kind())
            .source(source)
            .time(fact.occurred_at())
            .extension("correlationid", metadata.correlation_id())
            .extension("actorid", metadata.actor_id())
            .data(CONTENT_TYPE, Data::Json(data));
        if let Some(causation_id) = metadata.causation_id() {
            builder = builder.extension("causationid", causation_id);
        }

        let ce = builder
            .build()
            .map_err(|e| Error::Serialization(format!("failed to build CloudEvent: {e}")))?;
        Ok(Self(ce))
    }

    /// The `correlationid` extension.
    pub fn correlation_id(&self) -> Option<String> {
        self.extension("correlationid")
    }

    /// The `causationid` extension.
    pub fn causation_id(&self) -> Option<String> {
        self.extension("causationid")
    }

    fn extension(&self, name: &str) -> Option<String> {
        self.0.extension(name).map(ToString::to_string)
    }

    /// Wraps the event in a broker message.
    ///
    /// The event ID becomes the message ID. The correlation ID, causation
    /// ID, kind and occurrence time are also copied into headers so that
    /// consumers can route without parsing the body.
    pub fn to_message(&self, exchange: &str, routing_key: &str) -> Result<BrokerMessage> {
        let body = match self.0.data() {
            Some(Data::Json(value)) => serde_json::to_vec(value)
                .map_err(|e| Error::Serialization(format!("failed to encode body: {e}")))?,
            Some(Data::String(text)) => text.clone().into_bytes(),
            Some(Data::Binary(bytes)) => bytes.clone(),
            None => Vec::new(),
        };

        let mut headers = BTreeMap::new();
        headers.insert(
            "correlationId".to_owned(),
            self.correlation_id().unwrap_or_default(),
        );
        headers.insert(
            "causationId".to_owned(),
            self.causation_id().unwrap_or_default(),
        );
        headers.insert("eventType".to_owned(), self.0.ty().to_owned());
        headers.insert(
            "occurredAt".to_owned(),
            self.0
                .time()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
        );

        Ok(BrokerMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            message_id: self.0.id().to_owned(),
            content_type: self.0.datacontenttype().unwrap_or(CONTENT_TYPE).to_owned(),
            headers,
            body,
        })
    }
}
