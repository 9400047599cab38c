use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{ClaimDocument, DeclarationEvent, InsertOutcome, ReadModelStore, SinistreDeclare};
use crate::{Error, Fact, Result, publisher::FactSubscriber};

/// Keeps the claim read model up to date.
///
/// Projection is idempotent: a fact already projected is acknowledged
/// without touching the stored document.
pub struct DeclarationProjector {
    store: Arc<dyn ReadModelStore>,
}

impl DeclarationProjector {
    /// Creates a projector writing to `store`.
    pub fn new(store: Arc<dyn ReadModelStore>) -> Self {
        Self { store }
    }

    async fn on_declared(
        &self,
        fact: &Fact<DeclarationEvent>,
        declared: &SinistreDeclare,
    ) -> Result<()> {
        let document = ClaimDocument::from_declared(fact, declared, Utc::now());
        match self.store.insert(document).await? {
            InsertOutcome::Inserted => {
                info!(claim_id = %declared.claim_id, "projected declared claim");
                Ok(())
            }
            InsertOutcome::AlreadyExists(existing) if existing.records(fact.event_id()) => {
                debug!(claim_id = %declared.claim_id, "fact already projected");
                Ok(())
            }
            InsertOutcome::AlreadyExists(existing) => Err(Error::Subscriber(format!(
                "claim {} is already projected from declaration {}",
                existing.claim_id, existing.declaration_id
            ))),
        }
    }
}

#[async_trait]
impl FactSubscriber<DeclarationEvent> for DeclarationProjector {
    #[instrument(skip(self, fact), fields(event_id = %fact.event_id(), kind = fact.kind()))]
    async fn on_fact(&self, fact: &Fact<DeclarationEvent>) -> Result<()> {
        match fact.payload() {
            DeclarationEvent::SinistreDeclare(declared) => self.on_declared(fact, declared).await,
        }
    }
}
