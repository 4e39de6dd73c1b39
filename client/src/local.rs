//! In-process survey network.
//!
//! Runs the program's account state transitions against a `MockMxe`. One
//! `RwLock` over all state serializes writes the way the runtime serializes
//! transactions, and every write validates before it mutates.
//!
//! With a gateway configured, decryption requests are answered by a spawned
//! task after `delay`, signed as the MXE. Without one, unsigned callbacks
//! are allowed and clients decrypt locally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anchor_lang::prelude::Pubkey;
use async_trait::async_trait;
use parking_lot::RwLock;
use product_survey::{
    Ciphertext, DecryptionRequest, SubmissionRecord, Survey, SurveyConfig, SurveyError,
    SURVEY_SEED,
};
use tracing::{debug, info, warn};

use crate::error::ClientResult;
use crate::ledger::{DecryptOracle, EncryptedInput, EncryptedLedger, MockMxe};
use crate::program::{CallbackOrigin, SurveyProgram};

/// Events the network emitted, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    SurveyCreated { survey_id: u64, title: String, admin: Pubkey },
    RatingSubmitted { survey_id: u64, user: Pubkey },
    SurveyEnded { survey_id: u64, total_responses: u64 },
    FinalizeRequested { survey_id: u64, product_index: u8, request_id: u64 },
    SurveyFinalized { survey_id: u64, product_index: u8, decrypted_sum: u32 },
    SurveyCompleted { survey_id: u64 },
}

#[derive(Default)]
struct NetworkState {
    config: SurveyConfig,
    surveys: Vec<Survey>,
    submissions: HashMap<(u64, Pubkey), SubmissionRecord>,
    requests: HashMap<u64, DecryptionRequest>,
    next_request_id: u64,
    events: Vec<NetworkEvent>,
}

impl NetworkState {
    fn survey(&self, survey_id: u64) -> ClientResult<&Survey> {
        Ok(self
            .surveys
            .get(survey_id as usize)
            .ok_or(SurveyError::SurveyNotFound)?)
    }

    fn survey_mut(&mut self, survey_id: u64) -> ClientResult<&mut Survey> {
        Ok(self
            .surveys
            .get_mut(survey_id as usize)
            .ok_or(SurveyError::SurveyNotFound)?)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// PDA a deployed program would store this survey at
pub fn survey_address(survey_id: u64) -> Pubkey {
    Pubkey::find_program_address(&[SURVEY_SEED, &survey_id.to_le_bytes()], &product_survey::ID).0
}

/// Applies a decryption callback. Shared by direct callers and the gateway.
fn deliver(
    state: &RwLock<NetworkState>,
    request_id: u64,
    cleartext: &[u8],
    origin: CallbackOrigin,
) -> ClientResult<u32> {
    let mut guard = state.write();
    let state = &mut *guard;

    let request = state
        .requests
        .get_mut(&request_id)
        .ok_or(SurveyError::UnknownRequest)?;
    state
        .config
        .authorize_callback(origin == CallbackOrigin::Mxe)?;
    let survey = state
        .surveys
        .get_mut(request.survey_id as usize)
        .ok_or(SurveyError::UnknownRequest)?;

    let decrypted_sum = request.fulfil(survey, cleartext, unix_now())?;
    state.events.push(NetworkEvent::SurveyFinalized {
        survey_id: request.survey_id,
        product_index: request.product_index,
        decrypted_sum,
    });
    Ok(decrypted_sum)
}

pub struct LocalNetwork {
    program_id: Pubkey,
    state: Arc<RwLock<NetworkState>>,
    mxe: Arc<MockMxe>,
    gateway_delay: Option<Duration>,
}

impl LocalNetwork {
    /// Network without a gateway. Unsigned callbacks are accepted.
    pub fn new(mxe: Arc<MockMxe>) -> Self {
        Self::build(mxe, None)
    }

    /// Network whose gateway answers each request after `delay`.
    /// Unsigned callbacks are rejected.
    pub fn with_gateway(mxe: Arc<MockMxe>, delay: Duration) -> Self {
        Self::build(mxe, Some(delay))
    }

    fn build(mxe: Arc<MockMxe>, gateway_delay: Option<Duration>) -> Self {
        let authority = Pubkey::new_unique();
        let mut state = NetworkState::default();
        state.config.initialize(
            authority,
            Pubkey::new_unique(),
            gateway_delay.is_none(),
            255,
        );

        Self {
            program_id: product_survey::ID,
            state: Arc::new(RwLock::new(state)),
            mxe,
            gateway_delay,
        }
    }

    pub fn authority(&self) -> Pubkey {
        self.state.read().config.authority
    }

    pub fn allows_unsigned_callbacks(&self) -> bool {
        self.state.read().config.allow_unsigned_callbacks
    }

    pub fn disable_unsigned_callbacks(&self, caller: &Pubkey) -> ClientResult<()> {
        self.state.write().config.disable_unsigned_callbacks(caller)?;
        Ok(())
    }

    pub fn events(&self) -> Vec<NetworkEvent> {
        self.state.read().events.clone()
    }

    pub fn request(&self, request_id: u64) -> Option<DecryptionRequest> {
        self.state.read().requests.get(&request_id).cloned()
    }

    fn spawn_gateway(&self, request_id: u64, handle: Ciphertext, delay: Duration) {
        let state = Arc::clone(&self.state);
        let mxe = Arc::clone(&self.mxe);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let cleartext = match mxe.local_decrypt(&handle) {
                Ok(value) => value.to_be_bytes(),
                Err(e) => {
                    warn!(request_id, error = %e, "Gateway could not decrypt");
                    return;
                }
            };
            match deliver(&state, request_id, &cleartext, CallbackOrigin::Mxe) {
                Ok(sum) => debug!(request_id, sum, "Gateway fulfilled request"),
                Err(e) => debug!(request_id, error = %e, "Gateway callback rejected"),
            }
        });
    }
}

#[async_trait]
impl SurveyProgram for LocalNetwork {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    async fn create_survey(
        &self,
        admin: &Pubkey,
        title: &str,
        description: &str,
        product_names: &[String],
    ) -> ClientResult<u64> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let survey_id = state.config.survey_count;
        let mut survey = Survey::default();
        survey.initialize(
            survey_id,
            *admin,
            title.to_string(),
            description.to_string(),
            product_names.to_vec(),
            unix_now(),
            255,
        )?;
        let zeros: Vec<Ciphertext> = (0..survey.product_count()).map(|_| self.mxe.zero()).collect();
        survey.apply_encrypted_sums(&zeros, 0)?;

        state.config.allocate_survey_id();
        state.surveys.push(survey);
        state.events.push(NetworkEvent::SurveyCreated {
            survey_id,
            title: title.to_string(),
            admin: *admin,
        });

        info!(survey_id, products = product_names.len(), "Survey created");
        Ok(survey_id)
    }

    async fn submit_ratings(
        &self,
        survey_id: u64,
        user: &Pubkey,
        ratings: Vec<EncryptedInput>,
    ) -> ClientResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let already_submitted = state.submissions.contains_key(&(survey_id, *user));
        let survey = state.survey(survey_id)?;
        survey.check_submission(already_submitted, ratings.len())?;

        // Every proof is checked before any sum is consumed
        let verified = ratings
            .iter()
            .map(|input| self.mxe.verify_input(&self.program_id, user, input))
            .collect::<Result<Vec<_>, _>>()?;
        let mut sums = Vec::with_capacity(verified.len());
        for (index, rating) in verified.iter().enumerate() {
            let current = survey.encrypted_sum(index as u8)?;
            sums.push(self.mxe.accumulate_rating(&current, rating)?);
        }
        let nonce = survey.sums_nonce + 1;

        let survey = state.survey_mut(survey_id)?;
        survey.record_submission(already_submitted, ratings.len())?;
        survey.apply_encrypted_sums(&sums, nonce)?;

        let mut record = SubmissionRecord::default();
        record.record(survey_address(survey_id), *user, unix_now(), 255);
        state.submissions.insert((survey_id, *user), record);
        state
            .events
            .push(NetworkEvent::RatingSubmitted { survey_id, user: *user });

        debug!(survey_id, "Ratings accumulated");
        Ok(())
    }

    async fn end_survey(&self, survey_id: u64, caller: &Pubkey) -> ClientResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let survey = state.survey_mut(survey_id)?;
        survey.end(caller, unix_now())?;
        let total_responses = survey.total_responses;

        state.events.push(NetworkEvent::SurveyEnded {
            survey_id,
            total_responses,
        });
        info!(survey_id, total_responses, "Survey ended");
        Ok(())
    }

    async fn finalize_product(
        &self,
        survey_id: u64,
        product_index: u8,
        caller: &Pubkey,
    ) -> ClientResult<u64> {
        let (request_id, handle) = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let survey = state.survey_mut(survey_id)?;
            survey.begin_decryption(caller, product_index)?;
            let handle = survey.encrypted_sum(product_index)?;

            let request_id = state.next_request_id;
            state.next_request_id += 1;

            let mut request = DecryptionRequest::default();
            request.open(
                request_id,
                survey_address(survey_id),
                survey_id,
                product_index,
                unix_now(),
                255,
            );
            state.requests.insert(request_id, request);
            state.events.push(NetworkEvent::FinalizeRequested {
                survey_id,
                product_index,
                request_id,
            });
            (request_id, handle)
        };

        info!(survey_id, product_index, request_id, "Decryption requested");
        if let Some(delay) = self.gateway_delay {
            self.spawn_gateway(request_id, handle, delay);
        }
        Ok(request_id)
    }

    async fn decryption_callback(
        &self,
        request_id: u64,
        cleartext: Vec<u8>,
        origin: CallbackOrigin,
    ) -> ClientResult<u32> {
        deliver(&self.state, request_id, &cleartext, origin)
    }

    async fn mark_survey_fully_finalized(
        &self,
        survey_id: u64,
        caller: &Pubkey,
    ) -> ClientResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        state.survey_mut(survey_id)?.mark_fully_finalized(caller)?;
        state
            .events
            .push(NetworkEvent::SurveyCompleted { survey_id });
        info!(survey_id, "Survey completed");
        Ok(())
    }

    async fn get_survey(&self, survey_id: u64) -> ClientResult<Survey> {
        Ok(self.state.read().survey(survey_id)?.clone())
    }

    async fn get_survey_count(&self) -> ClientResult<u64> {
        Ok(self.state.read().config.survey_count)
    }

    async fn has_user_submitted(&self, survey_id: u64, user: &Pubkey) -> ClientResult<bool> {
        let state = self.state.read();
        state.survey(survey_id)?;
        Ok(state
            .submissions
            .get(&(survey_id, *user))
            .map(|r| r.submitted)
            .unwrap_or(false))
    }

    async fn get_encrypted_sum(
        &self,
        survey_id: u64,
        product_index: u8,
    ) -> ClientResult<Ciphertext> {
        Ok(self
            .state
            .read()
            .survey(survey_id)?
            .encrypted_sum(product_index)?)
    }

    async fn get_decrypted_sum(&self, survey_id: u64, product_index: u8) -> ClientResult<u32> {
        Ok(self
            .state
            .read()
            .survey(survey_id)?
            .decrypted_sum(product_index)?)
    }

    async fn is_survey_fully_finalized(&self, survey_id: u64) -> ClientResult<bool> {
        Ok(self.state.read().survey(survey_id)?.is_fully_decrypted())
    }
}
