//! Async view of the survey program.
//!
//! Mirrors the on-chain instructions and account reads so the orchestrator
//! can drive a deployed program or a `LocalNetwork` the same way.

use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;
use product_survey::{Ciphertext, Survey};

use crate::error::ClientResult;
use crate::ledger::EncryptedInput;

/// How a decryption callback reached the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOrigin {
    /// Invoked by the Arcium program as the registered callback of reveal_sum
    Mxe,
    /// Submitted directly by a client; only accepted where the config
    /// allows unsigned callbacks
    Unsigned,
}

#[async_trait]
pub trait SurveyProgram: Send + Sync {
    /// Address the ledger binds input proofs to
    fn program_id(&self) -> Pubkey;

    async fn create_survey(
        &self,
        admin: &Pubkey,
        title: &str,
        description: &str,
        product_names: &[String],
    ) -> ClientResult<u64>;

    async fn submit_ratings(
        &self,
        survey_id: u64,
        user: &Pubkey,
        ratings: Vec<EncryptedInput>,
    ) -> ClientResult<()>;

    async fn end_survey(&self, survey_id: u64, caller: &Pubkey) -> ClientResult<()>;

    /// Returns the request id of the new decryption request
    async fn finalize_product(
        &self,
        survey_id: u64,
        product_index: u8,
        caller: &Pubkey,
    ) -> ClientResult<u64>;

    async fn decryption_callback(
        &self,
        request_id: u64,
        cleartext: Vec<u8>,
        origin: CallbackOrigin,
    ) -> ClientResult<u32>;

    async fn mark_survey_fully_finalized(&self, survey_id: u64, caller: &Pubkey)
        -> ClientResult<()>;

    // Reads

    async fn get_survey(&self, survey_id: u64) -> ClientResult<Survey>;

    async fn get_survey_count(&self) -> ClientResult<u64>;

    async fn has_user_submitted(&self, survey_id: u64, user: &Pubkey) -> ClientResult<bool>;

    async fn get_encrypted_sum(&self, survey_id: u64, product_index: u8)
        -> ClientResult<Ciphertext>;

    async fn get_decrypted_sum(&self, survey_id: u64, product_index: u8) -> ClientResult<u32>;

    async fn is_survey_fully_finalized(&self, survey_id: u64) -> ClientResult<bool>;
}
