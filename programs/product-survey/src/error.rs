use anchor_lang::prelude::*;

#[error_code]
pub enum SurveyError {
    // Input validation
    #[msg("A survey needs between 2 and 5 products")]
    InvalidProductCount,
    #[msg("Survey title is too long")]
    TitleTooLong,
    #[msg("Survey description is too long")]
    DescriptionTooLong,
    #[msg("Product name is too long")]
    ProductNameTooLong,
    #[msg("Number of ratings does not match the number of products")]
    RatingCountMismatch,
    #[msg("Product index out of range")]
    IndexOutOfRange,
    #[msg("Cleartext must be a 4-byte big-endian integer")]
    MalformedCleartext,
    #[msg("MXE returned the wrong number of ciphertexts")]
    CiphertextCountMismatch,

    // Authorization
    #[msg("Only the survey admin can do this")]
    NotAdmin,
    #[msg("Unauthorized")]
    Unauthorized,

    // State preconditions
    #[msg("Survey is not accepting ratings")]
    SurveyInactive,
    #[msg("Survey has already ended")]
    AlreadyEnded,
    #[msg("Survey is still active")]
    SurveyStillActive,
    #[msg("Already submitted ratings for this survey")]
    AlreadySubmitted,
    #[msg("Survey has no responses")]
    NoResponses,
    #[msg("Not every product has been decrypted")]
    NotAllDecrypted,
    #[msg("Product has already been decrypted")]
    AlreadyDecrypted,
    #[msg("Survey is already finalized")]
    AlreadyFinalized,
    #[msg("Decryption request has already been fulfilled")]
    RequestAlreadyFulfilled,
    #[msg("An MXE computation over the survey sums is still in flight")]
    ComputationPending,
    #[msg("No MXE computation over the survey sums is in flight")]
    NoPendingComputation,

    // Lookup
    #[msg("Survey not found")]
    SurveyNotFound,
    #[msg("Unknown decryption request")]
    UnknownRequest,
    #[msg("Product sum has not been decrypted yet")]
    NotFinalizedYet,

    // Integrity
    #[msg("Decryption callback is not signed by the MXE")]
    BadSignature,
}
