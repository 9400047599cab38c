use chrono::{DateTime, NaiveDate, Utc};

use super::{
    ClaimId, ContractRef, DeclarationError, DeclarationEvent, DeclarationId, DeclarationStatus,
    OccurrenceDate, SinistreDeclare,
};
use crate::{Aggregate, AggregateId, Fact, Metadata, Root};

/// An insurance claim declaration.
///
/// The default value is the uninitialised state, before any fact. The only
/// way to create a declared claim is [`DeclarationSinistre::declare`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclarationSinistre {
    declaration_id: Option<DeclarationId>,
    claim_id: Option<ClaimId>,
    contract_ref: Option<ContractRef>,
    occurrence_date: Option<OccurrenceDate>,
    declared_at: Option<DateTime<Utc>>,
    declared_by: Option<String>,
    status: Option<DeclarationStatus>,
}

impl Aggregate for DeclarationSinistre {
    type Id = DeclarationId;
    type Event = DeclarationEvent;

    const CATEGORY: &'static str = "declaration";

    fn apply(&mut self, fact: &Fact<DeclarationEvent>) {
        match fact.payload() {
            DeclarationEvent::SinistreDeclare(declared) => {
                self.declaration_id = Some(declared.declaration_id);
                self.claim_id = Some(declared.claim_id.clone());
                self.contract_ref = Some(declared.contract_ref.clone());
                self.occurrence_date = Some(declared.occurrence_date);
                self.declared_at = Some(declared.declared_at);
                self.declared_by = Some(fact.metadata().actor_id().to_owned());
                self.status = Some(declared.status);
            }
        }
    }
}

impl DeclarationSinistre {
    /// Checks the two rules every declaration must satisfy: a contract
    /// reference is present, and the occurrence date is not after `today`.
    pub fn check_preconditions(
        contract_ref: Option<&ContractRef>,
        occurrence_date: Option<DateTime<Utc>>,
        today: NaiveDate,
    ) -> Result<OccurrenceDate, DeclarationError> {
        if contract_ref.is_none() {
            return Err(DeclarationError::MissingContractReference);
        }
        OccurrenceDate::on_or_before(occurrence_date, today)
    }

    /// Declares a new claim, stamped with the current time.
    ///
    /// Returns a root under a fresh declaration ID whose only, staged fact
    /// is `SinistreDeclare`.
    pub fn declare(
        claim_id: ClaimId,
        contract_ref: Option<ContractRef>,
        occurrence_date: Option<DateTime<Utc>>,
        metadata: Metadata,
    ) -> Result<Root<Self>, DeclarationError> {
        Self::declare_at(claim_id, contract_ref, occurrence_date, metadata, Utc::now())
    }

    /// Declares a new claim at `now`, which is both the declaration time
    /// and the day the occurrence date is checked against.
    pub fn declare_at(
        claim_id: ClaimId,
        contract_ref: Option<ContractRef>,
        occurrence_date: Option<DateTime<Utc>>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<Root<Self>, DeclarationError> {
        let occurrence_date =
            Self::check_preconditions(contract_ref.as_ref(), occurrence_date, now.date_naive())?;
        let contract_ref = contract_ref.ok_or(DeclarationError::MissingContractReference)?;

        let declaration_id = DeclarationId::new();
        let declared = SinistreDeclare {
            declaration_id,
            claim_id,
            contract_ref,
            occurrence_date,
            declared_at: now,
            status: DeclarationStatus::Declaree,
        };

        let mut root = Root::new(declaration_id);
        root.record_fact(Fact::at(
            declaration_id,
            DeclarationEvent::SinistreDeclare(declared),
            metadata,
            now,
        ));
        Ok(root)
    }

    /// Technical identity, once declared.
    pub fn declaration_id(&self) -> Option<DeclarationId> {
        self.declaration_id
    }

    /// Business-facing claim identifier, once declared.
    pub fn claim_id(&self) -> Option<&ClaimId> {
        self.claim_id.as_ref()
    }

    /// The contract the claim is made against.
    pub fn contract_ref(&self) -> Option<&ContractRef> {
        self.contract_ref.as_ref()
    }

    /// Day the loss occurred.
    pub fn occurrence_date(&self) -> Option<OccurrenceDate> {
        self.occurrence_date
    }

    /// When the claim was declared.
    pub fn declared_at(&self) -> Option<DateTime<Utc>> {
        self.declared_at
    }

    /// Who declared the claim.
    pub fn declared_by(&self) -> Option<&str> {
        self.declared_by.as_deref()
    }

    /// Lifecycle status. `None` until declared.
    pub fn status(&self) -> Option<DeclarationStatus> {
        self.status
    }
}
