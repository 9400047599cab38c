//! The insurance claim declaration: aggregate, facts, read model and the
//! command and query services built on them.

mod aggregate;
mod error;
mod event;
mod projector;
mod query;
mod read_model;
mod service;
mod values;

pub use aggregate::DeclarationSinistre;
pub use error::DeclarationError;
pub use event::{DeclarationEvent, SinistreDeclare};
pub use projector::DeclarationProjector;
pub use query::{
    ClaimQueries, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, SearchRequest, SearchResult, StatusResult,
};
pub use read_model::{
    ClaimDocument, ClaimFilter, ClaimPage, HistoryEntry, InsertOutcome, ReadModelStore,
};
pub use service::{CommandResult, DeclarationService, DeclareCommand, Declared};
pub use values::{
    ClaimId, ContractRef, DeclarationId, DeclarationStatus, MAX_CLAIM_SEQUENCE, OccurrenceDate,
    claim_sequence_scope,
};

use crate::publisher::RoutingTable;

/// Broker routes of claim facts. Other kinds route to
/// `sinistre.{kind in lowercase}`.
pub fn routing_table() -> RoutingTable {
    RoutingTable::new("sinistre")
        .route("SinistreDeclare", "sinistre.declare")
        .route("SinistreValide", "sinistre.valide")
        .route("SinistreAnnule", "sinistre.annule")
}
