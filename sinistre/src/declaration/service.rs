use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::{
    ClaimId, ContractRef, DeclarationError, DeclarationEvent, DeclarationId, DeclarationSinistre,
    claim_sequence_scope,
};
use crate::{
    Metadata, Result, cancel::cancellable, publisher::FactPublisher, repository::Repository,
    sequence::SequenceGenerator,
};

/// A request to declare a claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareCommand {
    /// The contract the claim is made against, `POL-YYYYMMDD-XXXXX`.
    pub contract_ref: Option<String>,
    /// When the loss occurred. Only its UTC day is kept.
    pub occurrence_date: Option<DateTime<Utc>>,
    /// Correlation ID of the business flow.
    pub correlation_id: String,
    /// ID of the message that caused this command, if any.
    #[serde(default)]
    pub causation_id: Option<String>,
    /// The user or system issuing the command.
    pub actor_id: String,
}

/// A successfully declared claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared {
    /// The allocated claim identifier.
    pub claim_id: ClaimId,
    /// Technical identity of the new declaration.
    pub declaration_id: DeclarationId,
    /// When the claim was declared.
    pub declared_at: DateTime<Utc>,
    /// Stream version after the declaration.
    pub version: i64,
}

/// Outcome of a declaration, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Whether the claim was declared.
    pub success: bool,
    /// The allocated claim identifier, on success.
    pub business_claim_id: Option<String>,
    /// When the claim was declared, on success.
    pub declared_at: Option<DateTime<Utc>>,
    /// Error code, on failure.
    pub error_kind: Option<String>,
    /// Human-readable error, on failure.
    pub error_message: Option<String>,
}

impl From<Result<Declared>> for CommandResult {
    fn from(outcome: Result<Declared>) -> Self {
        match outcome {
            Ok(declared) => Self {
                success: true,
                business_claim_id: Some(declared.claim_id.to_string()),
                declared_at: Some(declared.declared_at),
                error_kind: None,
                error_message: None,
            },
            Err(e) => Self {
                success: false,
                business_claim_id: None,
                declared_at: None,
                error_kind: Some(e.kind().to_owned()),
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// Handles claim declarations end to end: validate, allocate a claim
/// identifier, record the fact, persist it, publish it.
pub struct DeclarationService {
    sequences: SequenceGenerator,
    repository: Arc<dyn Repository<DeclarationSinistre>>,
    publisher: Arc<FactPublisher<DeclarationEvent>>,
}

impl DeclarationService {
    /// Creates the service.
    pub fn new(
        sequences: SequenceGenerator,
        repository: Arc<dyn Repository<DeclarationSinistre>>,
        publisher: Arc<FactPublisher<DeclarationEvent>>,
    ) -> Self {
        Self {
            sequences,
            repository,
            publisher,
        }
    }

    /// Declares a claim and reports the outcome as a [`CommandResult`].
    pub async fn handle(&self, command: DeclareCommand, cancel: &CancellationToken) -> CommandResult {
        self.declare(command, cancel).await.into()
    }

    /// Declares a claim.
    ///
    /// Rejected commands consume no claim identifier and create no stream.
    /// Once persisted, the fact is published before this returns; a publish
    /// failure is reported even though the claim is durably declared.
    #[instrument(
        skip(self, command, cancel),
        fields(correlation_id = %command.correlation_id, contract_ref = ?command.contract_ref)
    )]
    pub async fn declare(
        &self,
        command: DeclareCommand,
        cancel: &CancellationToken,
    ) -> Result<Declared> {
        info!("processing claim declaration");
        let outcome = self.try_declare(command, cancel).await;
        match &outcome {
            Ok(declared) => info!(claim_id = %declared.claim_id, "claim declared"),
            Err(e) => error!(error = %e, kind = e.kind(), "claim declaration failed"),
        }
        outcome
    }

    async fn try_declare(
        &self,
        command: DeclareCommand,
        cancel: &CancellationToken,
    ) -> Result<Declared> {
        let now = Utc::now();
        let contract_ref = ContractRef::parse_optional(command.contract_ref.as_deref())?;
        DeclarationSinistre::check_preconditions(
            contract_ref.as_ref(),
            command.occurrence_date,
            now.date_naive(),
        )?;
        let metadata = metadata_of(&command)?;

        let sequence = cancellable(cancel, self.sequences.next(&claim_sequence_scope(now.year())))
            .await?;
        let claim_id = ClaimId::new(now.year(), sequence)?;

        let mut root = DeclarationSinistre::declare_at(
            claim_id.clone(),
            contract_ref,
            command.occurrence_date,
            metadata,
            now,
        )?;
        let declaration_id = *root.id();

        let committed = self.repository.save(&mut root, cancel).await?;
        cancellable(cancel, self.publisher.publish_batch(&committed)).await?;

        Ok(Declared {
            claim_id,
            declaration_id,
            declared_at: root.state().declared_at().unwrap_or(now),
            version: root.version(),
        })
    }
}

fn metadata_of(command: &DeclareCommand) -> Result<Metadata> {
    if command.correlation_id.trim().is_empty() {
        return Err(DeclarationError::MissingCorrelationId.into());
    }
    if command.actor_id.trim().is_empty() {
        return Err(DeclarationError::MissingActorId.into());
    }
    let metadata = Metadata::new(command.correlation_id.trim(), command.actor_id.trim());
    Ok(match command.causation_id.as_deref().map(str::trim) {
        Some(causation_id) if !causation_id.is_empty() => metadata.caused_by(causation_id),
        _ => metadata,
    })
}
