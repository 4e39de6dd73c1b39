use anchor_lang::prelude::*;

#[event]
pub struct SurveyCreated {
    pub survey_id: u64,
    pub title: String,
    pub admin: Pubkey,
}

#[event]
pub struct RatingSubmitted {
    pub survey_id: u64,
    pub user: Pubkey,
}

#[event]
pub struct SurveyEnded {
    pub survey_id: u64,
    pub total_responses: u64,
}

#[event]
pub struct FinalizeRequested {
    pub survey_id: u64,
    pub product_index: u8,
    pub request_id: u64,
}

#[event]
pub struct SurveyFinalized {
    pub survey_id: u64,
    pub product_index: u8,
    pub decrypted_sum: u32,
}

#[event]
pub struct SurveyCompleted {
    pub survey_id: u64,
}
