//! The `Bet` record and its validation invariants.

use serde::{Deserialize, Serialize};

use crate::error::BetValidationError;

/// A positive integer identifying a client agency, in `[1, N]`.
pub type AgencyId = u32;

/// A single lottery entry submitted by an agency.
///
/// Immutable once constructed: [`Bet::new`] is the only constructor
/// and it validates every field up front, so a `Bet` in hand is known
/// good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Agency this bet was placed through.
    pub agency: AgencyId,
    /// Bettor's first name.
    pub first_name: String,
    /// Bettor's last name.
    pub last_name: String,
    /// National identity document number.
    pub document: String,
    /// ISO date string.
    pub birthdate: String,
    /// The bet pick, as an integer-valued string.
    pub number: String,
}

impl Bet {
    /// Builds a `Bet` from raw, untrusted field strings.
    ///
    /// Fails if any field is empty, if `agency` is not a positive
    /// integer, or if `number` is not an integer.
    pub fn new(
        agency: &str,
        first_name: &str,
        last_name: &str,
        document: &str,
        birthdate: &str,
        number: &str,
    ) -> Result<Self, BetValidationError> {
        let agency_id: AgencyId = agency
            .parse()
            .ok()
            .filter(|&a: &AgencyId| a > 0)
            .ok_or_else(|| BetValidationError::InvalidAgency(agency.to_string()))?;

        require_non_empty("first_name", first_name)?;
        require_non_empty("last_name", last_name)?;
        require_non_empty("document", document)?;
        require_non_empty("birthdate", birthdate)?;

        if number.is_empty() || number.parse::<i64>().is_err() {
            return Err(BetValidationError::InvalidNumber(number.to_string()));
        }

        Ok(Bet {
            agency: agency_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            document: document.to_string(),
            birthdate: birthdate.to_string(),
            number: number.to_string(),
        })
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), BetValidationError> {
    if value.is_empty() {
        Err(BetValidationError::EmptyField(field))
    } else {
        Ok(())
    }
}
