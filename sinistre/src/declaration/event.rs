use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClaimId, ContractRef, DeclarationId, DeclarationStatus, OccurrenceDate};
use crate::Event;

/// Facts of the claim declaration aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Event)]
#[serde(tag = "type")]
#[event(source = "urn:sinistre:declaration")]
pub enum DeclarationEvent {
    /// A claim was declared.
    SinistreDeclare(SinistreDeclare),
}

/// Payload of [`DeclarationEvent::SinistreDeclare`].
///
/// Outside this crate a payload comes either from
/// [`DeclarationSinistre::declare`](super::DeclarationSinistre::declare) or
/// from decoding a stored fact; it cannot be assembled field by field.
///
/// ```compile_fail
/// use chrono::{Duration, Utc};
/// use sinistre::{
///     Metadata,
///     declaration::{ClaimId, DeclarationEvent, DeclarationSinistre, SinistreDeclare},
/// };
///
/// let root = DeclarationSinistre::declare(
///     ClaimId::new(2026, 1).unwrap(),
///     Some("POL-20260128-00001".parse().unwrap()),
///     Some(Utc::now()),
///     Metadata::new("corr-1", "agent-7"),
/// )
/// .unwrap();
/// let DeclarationEvent::SinistreDeclare(declared) = root.staged()[0].payload();
/// let _forged = SinistreDeclare {
///     declared_at: Utc::now() + Duration::days(30),
///     ..declared.clone()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct SinistreDeclare {
    /// Technical identity of the declaration.
    pub declaration_id: DeclarationId,
    /// Business-facing claim identifier.
    pub claim_id: ClaimId,
    /// The contract the claim is made against.
    pub contract_ref: ContractRef,
    /// Day the loss occurred.
    pub occurrence_date: OccurrenceDate,
    /// When the declaration was made.
    pub declared_at: DateTime<Utc>,
    /// Status after the declaration.
    pub status: DeclarationStatus,
}
