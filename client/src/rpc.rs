//! `SurveyProgram` over a Solana RPC endpoint.
//!
//! Reads fetch and deserialize the program's accounts. Writes are signed
//! by one local keypair, which must be the caller named in the call.
//! Queuing MXE computations (create and finalize) also needs the Arcium
//! addresses from the `[arcium]` config section.

use std::time::{SystemTime, UNIX_EPOCH};

use anchor_lang::prelude::Pubkey;
use anchor_lang::{AccountDeserialize, Id, InstructionData, ToAccountMetas};
use arcium_client::idl::arcium::program::Arcium;
use async_trait::async_trait;
use product_survey::{
    Ciphertext, DecryptionRequest, SubmissionRecord, Survey, SurveyConfig, SurveyError,
    CONFIG_SEED, REQUEST_SEED, SIGN_SEED, SUBMISSION_SEED, SURVEY_SEED,
};
use solana_client::client_error::ClientError as RpcClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::{Instruction, InstructionError};
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use solana_sdk::transaction::{Transaction, TransactionError};
use tracing::{debug, info, warn};

use crate::config::{ArciumAccounts, ClientConfig};
use crate::error::{survey_error_from_code, ClientError, ClientResult};
use crate::ledger::EncryptedInput;
use crate::program::{CallbackOrigin, SurveyProgram};

/// Seed of Arcium's per-computation account, keyed by MXE program and offset
const COMPUTATION_ACCOUNT_SEED: &[u8] = b"ComputationAccount";

/// Program error carried by a failed transaction, if any
pub fn rejection_from(err: &TransactionError) -> Option<SurveyError> {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
            survey_error_from_code(*code)
        }
        _ => None,
    }
}

fn map_rpc_error(err: RpcClientError) -> ClientError {
    match err.get_transaction_error().as_ref().and_then(rejection_from) {
        Some(rejection) => ClientError::Rejected(rejection),
        None => ClientError::Rpc(err.to_string()),
    }
}

/// Offsets only need to be unique per MXE; the request id is the offset
fn fresh_computation_offset() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// PDAs of one survey program deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramAddresses {
    pub program_id: Pubkey,
}

impl ProgramAddresses {
    fn pda(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program_id).0
    }

    pub fn config(&self) -> Pubkey {
        self.pda(&[CONFIG_SEED])
    }

    pub fn survey(&self, survey_id: u64) -> Pubkey {
        self.pda(&[SURVEY_SEED, &survey_id.to_le_bytes()])
    }

    pub fn submission(&self, survey_id: u64, user: &Pubkey) -> Pubkey {
        let survey = self.survey(survey_id);
        self.pda(&[SUBMISSION_SEED, survey.as_ref(), user.as_ref()])
    }

    pub fn request(&self, request_id: u64) -> Pubkey {
        self.pda(&[REQUEST_SEED, &request_id.to_le_bytes()])
    }

    pub fn sign_seed(&self) -> Pubkey {
        self.pda(&[SIGN_SEED])
    }

    // ==================== INSTRUCTIONS ====================

    pub fn end_survey(&self, admin: Pubkey, survey_id: u64) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: product_survey::accounts::EndSurvey {
                admin,
                survey: self.survey(survey_id),
            }
            .to_account_metas(None),
            data: product_survey::instruction::EndSurvey { survey_id }.data(),
        }
    }

    pub fn mark_survey_fully_finalized(&self, admin: Pubkey, survey_id: u64) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: product_survey::accounts::MarkSurveyFullyFinalized {
                admin,
                survey: self.survey(survey_id),
            }
            .to_account_metas(None),
            data: product_survey::instruction::MarkSurveyFullyFinalized { survey_id }.data(),
        }
    }

    /// Direct (unsigned) delivery of a cleartext
    pub fn decryption_callback(
        &self,
        survey_id: u64,
        request_id: u64,
        cleartext: Vec<u8>,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: product_survey::accounts::DecryptionCallback {
                arcium_program: Arcium::id(),
                instructions_sysvar: solana_sdk::sysvar::instructions::ID,
                config: self.config(),
                survey: self.survey(survey_id),
                decryption_request: self.request(request_id),
            }
            .to_account_metas(None),
            data: product_survey::instruction::DecryptionCallback {
                request_id,
                cleartext,
            }
            .data(),
        }
    }

    fn computation_account(&self, mxe_program_id: &Pubkey, offset: u64) -> Pubkey {
        Pubkey::find_program_address(
            &[COMPUTATION_ACCOUNT_SEED, mxe_program_id.as_ref(), &offset.to_le_bytes()],
            &Arcium::id(),
        )
        .0
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_survey(
        &self,
        arcium: &ArciumAccounts,
        mxe_program_id: &Pubkey,
        admin: Pubkey,
        survey_id: u64,
        computation_offset: u64,
        title: String,
        description: String,
        product_names: Vec<String>,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: product_survey::accounts::CreateSurvey {
                admin,
                config: self.config(),
                survey: self.survey(survey_id),
                sign_seed: self.sign_seed(),
                arcium_program: Arcium::id(),
                mxe_account: arcium.mxe_account,
                cluster_account: arcium.cluster_account,
                pool_account: arcium.pool_account,
                clock_account: arcium.clock_account,
                mempool_account: arcium.mempool_account,
                executing_pool: arcium.executing_pool,
                computation_account: self.computation_account(mxe_program_id, computation_offset),
                comp_def_account: arcium.init_sums_comp_def,
                system_program: solana_sdk::system_program::ID,
            }
            .to_account_metas(None),
            data: product_survey::instruction::CreateSurvey {
                computation_offset,
                title,
                description,
                product_names,
            }
            .data(),
        }
    }

    pub fn finalize_product(
        &self,
        arcium: &ArciumAccounts,
        mxe_program_id: &Pubkey,
        admin: Pubkey,
        survey_id: u64,
        product_index: u8,
        computation_offset: u64,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: product_survey::accounts::FinalizeProduct {
                admin,
                config: self.config(),
                survey: self.survey(survey_id),
                decryption_request: self.request(computation_offset),
                sign_seed: self.sign_seed(),
                arcium_program: Arcium::id(),
                mxe_account: arcium.mxe_account,
                cluster_account: arcium.cluster_account,
                pool_account: arcium.pool_account,
                clock_account: arcium.clock_account,
                mempool_account: arcium.mempool_account,
                executing_pool: arcium.executing_pool,
                computation_account: self.computation_account(mxe_program_id, computation_offset),
                comp_def_account: arcium.reveal_sum_comp_def,
                system_program: solana_sdk::system_program::ID,
            }
            .to_account_metas(None),
            data: product_survey::instruction::FinalizeProduct {
                survey_id,
                product_index,
                computation_offset,
            }
            .data(),
        }
    }
}

pub struct RpcSurveyProgram {
    rpc: RpcClient,
    addresses: ProgramAddresses,
    payer: Option<Keypair>,
    arcium: Option<ArciumAccounts>,
}

impl RpcSurveyProgram {
    pub fn new(rpc_url: impl Into<String>, program_id: Pubkey) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.into(), CommitmentConfig::confirmed()),
            addresses: ProgramAddresses { program_id },
            payer: None,
            arcium: None,
        }
    }

    /// Backend for `config`, loading the keypair if one is configured
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let mut program = Self::new(config.network.rpc_url.clone(), config.network.program_id()?);
        if let Some(path) = &config.network.keypair_path {
            let payer = read_keypair_file(path).map_err(|e| {
                ClientError::Rpc(format!("cannot read keypair {}: {}", path.display(), e))
            })?;
            program = program.with_payer(payer);
        }
        if let Some(arcium) = &config.arcium {
            program = program.with_arcium(arcium.accounts()?);
        }
        Ok(program)
    }

    pub fn with_payer(mut self, payer: Keypair) -> Self {
        self.payer = Some(payer);
        self
    }

    pub fn with_arcium(mut self, accounts: ArciumAccounts) -> Self {
        self.arcium = Some(accounts);
        self
    }

    pub fn addresses(&self) -> &ProgramAddresses {
        &self.addresses
    }

    /// Key admin writes are signed with, if a keypair is loaded
    pub fn payer(&self) -> Option<Pubkey> {
        self.payer.as_ref().map(|payer| payer.pubkey())
    }

    /// The loaded keypair, if it is `caller`
    fn signer_for(&self, caller: &Pubkey) -> ClientResult<&Keypair> {
        self.payer
            .as_ref()
            .filter(|payer| payer.pubkey() == *caller)
            .ok_or(ClientError::MissingSigner(*caller))
    }

    fn arcium(&self) -> ClientResult<&ArciumAccounts> {
        self.arcium
            .as_ref()
            .ok_or(ClientError::Unsupported("queuing MXE computations needs an [arcium] config section"))
    }

    async fn send(&self, ix: Instruction, signer: &Keypair) -> ClientResult<()> {
        let blockhash = self.rpc.get_latest_blockhash().await.map_err(map_rpc_error)?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&signer.pubkey()),
            &[signer],
            blockhash,
        );
        let signature = self
            .rpc
            .send_and_confirm_transaction(&tx)
            .await
            .map_err(map_rpc_error)?;
        debug!(%signature, "Transaction confirmed");
        Ok(())
    }

    async fn fetch<T: AccountDeserialize>(&self, address: &Pubkey) -> ClientResult<Option<T>> {
        let account = self
            .rpc
            .get_account_with_commitment(address, self.rpc.commitment())
            .await
            .map_err(map_rpc_error)?
            .value;
        match account {
            Some(account) if account.owner == self.addresses.program_id => {
                let state = T::try_deserialize(&mut account.data.as_slice())
                    .map_err(|e| ClientError::Rpc(format!("bad account {}: {}", address, e)))?;
                Ok(Some(state))
            }
            _ => Ok(None),
        }
    }

    async fn fetch_config(&self) -> ClientResult<SurveyConfig> {
        self.fetch(&self.addresses.config())
            .await?
            .ok_or_else(|| ClientError::Rpc("survey program is not initialized".to_string()))
    }
}

#[async_trait]
impl SurveyProgram for RpcSurveyProgram {
    fn program_id(&self) -> Pubkey {
        self.addresses.program_id
    }

    async fn create_survey(
        &self,
        admin: &Pubkey,
        title: &str,
        description: &str,
        product_names: &[String],
    ) -> ClientResult<u64> {
        let signer = self.signer_for(admin)?;
        let arcium = self.arcium()?;
        Survey::validate_details(title, description, product_names)?;

        let config = self.fetch_config().await?;
        let survey_id = config.survey_count;
        let ix = self.addresses.create_survey(
            arcium,
            &config.mxe_program_id,
            *admin,
            survey_id,
            fresh_computation_offset(),
            title.to_string(),
            description.to_string(),
            product_names.to_vec(),
        );
        self.send(ix, signer).await?;

        info!(survey_id, "Survey created; zero sums queued");
        Ok(survey_id)
    }

    async fn submit_ratings(
        &self,
        _survey_id: u64,
        _user: &Pubkey,
        _ratings: Vec<EncryptedInput>,
    ) -> ClientResult<()> {
        Err(ClientError::Unsupported(
            "ratings are encrypted for the MXE and submitted by the rater's wallet",
        ))
    }

    async fn end_survey(&self, survey_id: u64, caller: &Pubkey) -> ClientResult<()> {
        let signer = self.signer_for(caller)?;
        self.send(self.addresses.end_survey(*caller, survey_id), signer)
            .await
    }

    async fn finalize_product(
        &self,
        survey_id: u64,
        product_index: u8,
        caller: &Pubkey,
    ) -> ClientResult<u64> {
        let signer = self.signer_for(caller)?;
        let arcium = self.arcium()?;
        let config = self.fetch_config().await?;

        let request_id = fresh_computation_offset();
        let ix = self.addresses.finalize_product(
            arcium,
            &config.mxe_program_id,
            *caller,
            survey_id,
            product_index,
            request_id,
        );
        self.send(ix, signer).await?;

        info!(survey_id, product_index, request_id, "Reveal queued");
        Ok(request_id)
    }

    async fn decryption_callback(
        &self,
        request_id: u64,
        cleartext: Vec<u8>,
        origin: CallbackOrigin,
    ) -> ClientResult<u32> {
        if origin == CallbackOrigin::Mxe {
            return Err(ClientError::Unsupported(
                "MXE callbacks are delivered by the Arcium program",
            ));
        }
        let signer = self
            .payer
            .as_ref()
            .ok_or(ClientError::Unsupported("direct callbacks need a fee payer keypair"))?;
        let request: DecryptionRequest = self
            .fetch(&self.addresses.request(request_id))
            .await?
            .ok_or(SurveyError::UnknownRequest)?;

        let ix = self
            .addresses
            .decryption_callback(request.survey_id, request_id, cleartext);
        self.send(ix, signer).await?;

        self.get_decrypted_sum(request.survey_id, request.product_index)
            .await
    }

    async fn mark_survey_fully_finalized(
        &self,
        survey_id: u64,
        caller: &Pubkey,
    ) -> ClientResult<()> {
        let signer = self.signer_for(caller)?;
        self.send(
            self.addresses.mark_survey_fully_finalized(*caller, survey_id),
            signer,
        )
        .await
    }

    async fn get_survey(&self, survey_id: u64) -> ClientResult<Survey> {
        Ok(self
            .fetch(&self.addresses.survey(survey_id))
            .await?
            .ok_or(SurveyError::SurveyNotFound)?)
    }

    async fn get_survey_count(&self) -> ClientResult<u64> {
        match self.fetch::<SurveyConfig>(&self.addresses.config()).await? {
            Some(config) => Ok(config.survey_count),
            None => {
                warn!(program = %self.addresses.program_id, "No config account; program not initialized");
                Ok(0)
            }
        }
    }

    async fn has_user_submitted(&self, survey_id: u64, user: &Pubkey) -> ClientResult<bool> {
        self.get_survey(survey_id).await?;
        let record: Option<SubmissionRecord> = self
            .fetch(&self.addresses.submission(survey_id, user))
            .await?;
        Ok(record.is_some_and(|r| r.submitted))
    }

    async fn get_encrypted_sum(
        &self,
        survey_id: u64,
        product_index: u8,
    ) -> ClientResult<Ciphertext> {
        Ok(self.get_survey(survey_id).await?.encrypted_sum(product_index)?)
    }

    async fn get_decrypted_sum(&self, survey_id: u64, product_index: u8) -> ClientResult<u32> {
        Ok(self.get_survey(survey_id).await?.decrypted_sum(product_index)?)
    }

    async fn is_survey_fully_finalized(&self, survey_id: u64) -> ClientResult<bool> {
        Ok(self.get_survey(survey_id).await?.is_fully_decrypted())
    }
}
