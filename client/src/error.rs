//! Client error types

use anchor_lang::prelude::Pubkey;
use product_survey::SurveyError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::ledger::LedgerError;

/// Errors surfaced by the survey client
#[derive(Debug, Error)]
pub enum ClientError {
    /// The program refused the call
    #[error("Program rejected the call: {0}")]
    Rejected(SurveyError),

    /// Encrypted ledger failure
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Bad client configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Rating outside 1..=5, caught before encryption
    #[error("Rating {0} is outside 1..=5")]
    InvalidRating(u8),

    /// Another finalize for the same product is already running
    #[error("Finalize already in flight for survey {survey_id} product {product_index}")]
    FinalizeInFlight { survey_id: u64, product_index: u8 },

    /// Local decryption requested without a decrypt oracle
    #[error("No decrypt oracle bound to network {0}")]
    OracleUnavailable(String),

    /// Transport or decoding failure talking to a cluster
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A write was asked for on behalf of a key this client cannot sign for
    #[error("No signer for {0}")]
    MissingSigner(Pubkey),

    /// The backend cannot perform this operation
    #[error("Not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl From<SurveyError> for ClientError {
    fn from(err: SurveyError) -> Self {
        ClientError::Rejected(err)
    }
}

impl ClientError {
    /// `NotFinalizedYet` while polling means "try again later"
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ClientError::Rejected(SurveyError::NotFinalizedYet))
    }
}

/// Every program error. Keep in sync with the program's enum.
const SURVEY_ERRORS: &[SurveyError] = &[
    SurveyError::InvalidProductCount,
    SurveyError::TitleTooLong,
    SurveyError::DescriptionTooLong,
    SurveyError::ProductNameTooLong,
    SurveyError::RatingCountMismatch,
    SurveyError::IndexOutOfRange,
    SurveyError::MalformedCleartext,
    SurveyError::CiphertextCountMismatch,
    SurveyError::NotAdmin,
    SurveyError::Unauthorized,
    SurveyError::SurveyInactive,
    SurveyError::AlreadyEnded,
    SurveyError::SurveyStillActive,
    SurveyError::AlreadySubmitted,
    SurveyError::NoResponses,
    SurveyError::NotAllDecrypted,
    SurveyError::AlreadyDecrypted,
    SurveyError::AlreadyFinalized,
    SurveyError::RequestAlreadyFulfilled,
    SurveyError::ComputationPending,
    SurveyError::NoPendingComputation,
    SurveyError::SurveyNotFound,
    SurveyError::UnknownRequest,
    SurveyError::NotFinalizedYet,
    SurveyError::BadSignature,
];

/// Maps a custom program error code back to its `SurveyError`
pub fn survey_error_from_code(code: u32) -> Option<SurveyError> {
    SURVEY_ERRORS
        .iter()
        .copied()
        .find(|e| u32::from(*e) == code)
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_table_covers_every_code() {
        for err in SURVEY_ERRORS {
            let code = u32::from(*err);
            let back = survey_error_from_code(code).unwrap();
            assert_eq!(u32::from(back), code);
        }
        // Codes are dense from the Anchor offset, so none were missed
        let max = SURVEY_ERRORS.iter().map(|e| u32::from(*e)).max().unwrap();
        assert_eq!(max + 1 - 6000, SURVEY_ERRORS.len() as u32);
        assert!(survey_error_from_code(5999).is_none());
        assert!(survey_error_from_code(max + 1).is_none());
    }
}
