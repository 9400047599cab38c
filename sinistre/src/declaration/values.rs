//! Value objects of the claim declaration. Each one is valid by
//! construction: parsing and deserialisation reject malformed input.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DeclarationError;
use crate::{AggregateId, Error, Result};

/// Largest sequence number a claim identifier can hold.
pub const MAX_CLAIM_SEQUENCE: u64 = 999_999;

fn all_digits(text: &str, len: usize) -> bool {
    text.len() == len && text.bytes().all(|b| b.is_ascii_digit())
}

/// Business-facing claim identifier, `SIN-YYYY-NNNNNN`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClaimId(String);

impl ClaimId {
    /// Formats the identifier for sequence number `sequence` of `year`.
    pub fn new(year: i32, sequence: u64) -> Result<Self> {
        if sequence == 0 || sequence > MAX_CLAIM_SEQUENCE {
            return Err(Error::SequenceExhausted {
                scope: claim_sequence_scope(year),
                value: sequence,
            });
        }
        if !(0..=9999).contains(&year) {
            return Err(DeclarationError::InvalidClaimId(format!("SIN-{year}-{sequence:06}")).into());
        }
        Ok(Self(format!("SIN-{year:04}-{sequence:06}")))
    }

    /// The identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The declaration year.
    pub fn year(&self) -> i32 {
        self.0[4..8].parse().unwrap_or_default()
    }

    /// The sequence number within the year.
    pub fn sequence(&self) -> u64 {
        self.0[9..].parse().unwrap_or_default()
    }
}

/// Sequence scope claim identifiers of `year` are drawn from.
pub fn claim_sequence_scope(year: i32) -> String {
    format!("identifiantSinistre_{year}")
}

impl FromStr for ClaimId {
    type Err = DeclarationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = s
            .strip_prefix("SIN-")
            .and_then(|rest| rest.split_once('-'))
            .is_some_and(|(year, seq)| all_digits(year, 4) && all_digits(seq, 6));
        match valid {
            true => Ok(Self(s.to_owned())),
            false => Err(DeclarationError::InvalidClaimId(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ClaimId {
    type Error = DeclarationError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClaimId> for String {
    fn from(value: ClaimId) -> Self {
        value.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insurance contract reference, `POL-YYYYMMDD-XXXXX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractRef(String);

impl ContractRef {
    /// The reference as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses optional input: absent or blank means no reference.
    pub fn parse_optional(
        value: Option<&str>,
    ) -> std::result::Result<Option<Self>, DeclarationError> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => text.parse().map(Some),
        }
    }
}

impl FromStr for ContractRef {
    type Err = DeclarationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = s
            .strip_prefix("POL-")
            .and_then(|rest| rest.split_once('-'))
            .is_some_and(|(date, number)| all_digits(date, 8) && all_digits(number, 5));
        match valid {
            true => Ok(Self(s.to_owned())),
            false => Err(DeclarationError::InvalidContractReference(s.to_owned())),
        }
    }
}

impl TryFrom<String> for ContractRef {
    type Error = DeclarationError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContractRef> for String {
    fn from(value: ContractRef) -> Self {
        value.0
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Day the loss occurred, never after the day it is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceDate(NaiveDate);

impl OccurrenceDate {
    /// Accepts `value` if its UTC day is `today` or earlier.
    pub fn on_or_before(
        value: Option<DateTime<Utc>>,
        today: NaiveDate,
    ) -> std::result::Result<Self, DeclarationError> {
        match value.map(|v| v.date_naive()) {
            Some(date) if date <= today => Ok(Self(date)),
            date => Err(DeclarationError::FutureOccurrenceDate { date, today }),
        }
    }

    /// The calendar day.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for OccurrenceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle status of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationStatus {
    /// Declared and awaiting processing.
    Declaree,
    /// Accepted by a claims handler.
    Validee,
    /// Withdrawn or rejected.
    Annulee,
}

impl DeclarationStatus {
    /// The status as stored and published.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Declaree => "Declaree",
            Self::Validee => "Validee",
            Self::Annulee => "Annulee",
        }
    }
}

impl FromStr for DeclarationStatus {
    type Err = DeclarationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Declaree" => Ok(Self::Declaree),
            "Validee" => Ok(Self::Validee),
            "Annulee" => Ok(Self::Annulee),
            other => Err(DeclarationError::InvalidStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for DeclarationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Technical identity of a declaration aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclarationId(Uuid);

impl DeclarationId {
    /// Wraps a UUID, rejecting the nil UUID.
    pub fn from_uuid(id: Uuid) -> std::result::Result<Self, DeclarationError> {
        match id.is_nil() {
            true => Err(DeclarationError::InvalidDeclarationId(id.to_string())),
            false => Ok(Self(id)),
        }
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl AggregateId for DeclarationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for DeclarationId {
    type Err = DeclarationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let id = Uuid::parse_str(s)
            .map_err(|_| DeclarationError::InvalidDeclarationId(s.to_owned()))?;
        Self::from_uuid(id)
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
