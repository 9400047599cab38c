//! Facts: immutable records of something that happened to an aggregate.
//!
//! A [`Fact`] pairs a typed payload with the envelope every fact carries
//! (identity, timestamp, correlation metadata). Stores never see the typed
//! payload: they persist [`PendingFact`] rows and return [`RecordedFact`]
//! rows, whose `data` column holds the whole fact as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Event, Result};

/// Correlation metadata carried by every fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    correlation_id: String,
    causation_id: Option<String>,
    actor_id: String,
}

impl Metadata {
    /// Creates metadata for a fact caused directly by a command.
    pub fn new(correlation_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: None,
            actor_id: actor_id.into(),
        }
    }

    /// Records the message that caused this fact.
    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Correlation ID shared by every message of one business flow.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// ID of the message that caused this fact, if any.
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    /// The user or system that issued the command.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// An immutable fact about one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "E: Event"))]
pub struct Fact<E: Event> {
    event_id: Uuid,
    aggregate_id: String,
    occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    metadata: Metadata,
    payload: E,
}

impl<E: Event> Fact<E> {
    /// Creates a fact stamped with a fresh ID and the current time.
    pub fn new(aggregate_id: impl ToString, payload: E, metadata: Metadata) -> Self {
        Self::at(aggregate_id, payload, metadata, Utc::now())
    }

    /// Creates a fact stamped with a fresh ID and the given time.
    pub fn at(
        aggregate_id: impl ToString,
        payload: E,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.to_string(),
            occurred_at,
            metadata,
            payload,
        }
    }

    /// Unique fact ID. Also used as the broker message ID.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// The aggregate this fact belongs to.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// When the fact occurred.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Correlation metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The typed payload.
    pub fn payload(&self) -> &E {
        &self.payload
    }

    /// The fact kind, taken from the payload.
    pub fn kind(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Encodes the fact into the row a store persists.
    pub fn to_pending(&self) -> Result<PendingFact> {
        let data = serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(PendingFact {
            event_id: self.event_id,
            event_type: self.kind().to_owned(),
            occurred_at: self.occurred_at,
            data,
        })
    }

    /// Decodes a stored row, rejecting kinds `E` does not declare.
    pub fn from_recorded(recorded: RecordedFact) -> Result<Self> {
        if !E::KINDS.contains(&recorded.event_type.as_str()) {
            return Err(Error::UnknownFact {
                stream: recorded.stream,
                version: recorded.version,
                kind: recorded.event_type,
            });
        }
        serde_json::from_value(recorded.data).map_err(|e| {
            Error::Serialization(format!(
                "fact at version {} of stream {}: {e}",
                recorded.version, recorded.stream
            ))
        })
    }
}

/// A fact encoded for storage but not yet assigned a stream version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFact {
    /// Unique fact ID.
    pub event_id: Uuid,
    /// The fact kind.
    pub event_type: String,
    /// When the fact occurred.
    pub occurred_at: DateTime<Utc>,
    /// The whole fact as JSON.
    pub data: serde_json::Value,
}

impl PendingFact {
    /// Assigns the fact its position in a stream.
    pub fn record(self, stream: &str, version: i64) -> RecordedFact {
        RecordedFact {
            stream: stream.to_owned(),
            version,
            event_id: self.event_id,
            event_type: self.event_type,
            occurred_at: self.occurred_at,
            data: self.data,
        }
    }
}

/// A fact as read back from a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFact {
    /// The stream holding the fact.
    pub stream: String,
    /// Position in the stream, starting at 1.
    pub version: i64,
    /// Unique fact ID.
    pub event_id: Uuid,
    /// The fact kind.
    pub event_type: String,
    /// When the fact occurred.
    pub occurred_at: DateTime<Utc>,
    /// The whole fact as JSON.
    pub data: serde_json::Value,
}
