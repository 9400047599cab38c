use chrono::NaiveDate;

/// A broken business rule of the claim declaration.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// No contract reference was given.
    #[error("a claim declaration must reference a contract")]
    MissingContractReference,
    /// The contract reference is not `POL-YYYYMMDD-XXXXX`.
    #[error("invalid contract reference `{0}`, expected POL-YYYYMMDD-XXXXX")]
    InvalidContractReference(String),
    /// The occurrence date is missing or later than today.
    #[error("{}", future_date_message(.date, .today))]
    FutureOccurrenceDate {
        /// The rejected date, absent if none was given.
        date: Option<NaiveDate>,
        /// The current UTC day.
        today: NaiveDate,
    },
    /// The claim identifier is not `SIN-YYYY-NNNNNN`.
    #[error("invalid claim identifier `{0}`, expected SIN-YYYY-NNNNNN")]
    InvalidClaimId(String),
    /// The declaration identifier is not a non-nil UUID.
    #[error("invalid declaration identifier `{0}`")]
    InvalidDeclarationId(String),
    /// The status is not one the lifecycle knows.
    #[error("unknown declaration status `{0}`")]
    InvalidStatus(String),
    /// A command arrived without a correlation ID.
    #[error("a correlation id is required")]
    MissingCorrelationId,
    /// A command arrived without an actor ID.
    #[error("an actor id is required")]
    MissingActorId,
}

impl DeclarationError {
    /// Stable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingContractReference => "MISSING_CONTRACT_REFERENCE",
            Self::FutureOccurrenceDate { .. } => "FUTURE_OCCURRENCE_DATE",
            _ => "VALIDATION_ERROR",
        }
    }
}

fn future_date_message(date: &Option<NaiveDate>, today: &NaiveDate) -> String {
    match date {
        Some(date) => format!("occurrence date {date} is after today ({today})"),
        None => "an occurrence date is required".to_owned(),
    }
}
