//! Client Orchestrator
//!
//! Sequences survey creation, rating submission, ending, per-product
//! decryption and completion against any `SurveyProgram`.
//!
//! Decryption runs in one of two modes:
//! - Gateway: request, then poll `get_decrypted_sum` until the gateway's
//!   callback lands or the attempt budget runs out.
//! - Local: request, decrypt the sum with the session's oracle, and deliver
//!   it through an unsigned callback.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use parking_lot::Mutex;
use product_survey::{DecryptionStatus, SurveyError};
use tracing::{debug, info, warn};

use crate::config::{DecryptMode, DecryptionSettings};
use crate::error::{ClientError, ClientResult};
use crate::ledger::{DecryptOracle, EncryptedLedger, MAX_RATING, MIN_RATING};
use crate::program::{CallbackOrigin, SurveyProgram};

/// Binds a local decrypt oracle to one network.
///
/// Created explicitly and owned by the orchestrator. Switching networks
/// drops the old oracle so it can never decrypt for the wrong deployment.
pub struct DecryptSession {
    network: String,
    oracle: Option<Arc<dyn DecryptOracle>>,
}

impl DecryptSession {
    /// Session for a network with a gateway; no local decryption
    pub fn gateway(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            oracle: None,
        }
    }

    pub fn local(network: impl Into<String>, oracle: Arc<dyn DecryptOracle>) -> Self {
        Self {
            network: network.into(),
            oracle: Some(oracle),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Rebinds the session. The previous oracle is discarded.
    pub fn switch_network(
        &mut self,
        network: impl Into<String>,
        oracle: Option<Arc<dyn DecryptOracle>>,
    ) {
        self.network = network.into();
        self.oracle = oracle;
    }

    fn decrypt(&self, handle: &product_survey::Ciphertext) -> ClientResult<u32> {
        let oracle = self
            .oracle
            .as_ref()
            .ok_or_else(|| ClientError::OracleUnavailable(self.network.clone()))?;
        Ok(oracle.local_decrypt(handle)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Decrypted(u32),
    /// Polling gave up. The request stays open and may still complete.
    Pending { request_id: u64, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductResult {
    pub name: String,
    pub sum: Option<u32>,
    /// Rounded to two decimals
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyResults {
    pub survey_id: u64,
    pub title: String,
    pub total_responses: u64,
    pub products: Vec<ProductResult>,
}

impl fmt::Display for SurveyResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Survey {} \"{}\" ({} responses)",
            self.survey_id, self.title, self.total_responses
        )?;
        for product in &self.products {
            match (product.sum, product.average) {
                (Some(sum), Some(avg)) => {
                    writeln!(f, "  {}: sum {}, avg {:.2}/5.00", product.name, sum, avg)?
                }
                _ => writeln!(f, "  {}: encrypted", product.name)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveySummary {
    pub survey_id: u64,
    pub title: String,
    pub admin: Pubkey,
    pub product_names: Vec<String>,
    pub total_responses: u64,
    pub is_active: bool,
    pub is_finalized: bool,
    pub statuses: Vec<DecryptionStatus>,
}

fn average(sum: u32, responses: u64) -> Option<f64> {
    if responses == 0 {
        return None;
    }
    let raw = f64::from(sum) / responses as f64;
    Some((raw * 100.0).round() / 100.0)
}

/// Removes its key from the in-flight set on drop
struct InFlight<'a> {
    set: &'a Mutex<HashSet<(u64, u8)>>,
    key: (u64, u8),
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<(u64, u8)>>, survey_id: u64, product_index: u8) -> ClientResult<Self> {
        let key = (survey_id, product_index);
        if !set.lock().insert(key) {
            return Err(ClientError::FinalizeInFlight {
                survey_id,
                product_index,
            });
        }
        Ok(Self { set, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

pub struct Orchestrator<P, L> {
    program: Arc<P>,
    ledger: Arc<L>,
    session: DecryptSession,
    settings: DecryptionSettings,
    in_flight: Mutex<HashSet<(u64, u8)>>,
}

impl<P: SurveyProgram, L> Orchestrator<P, L> {
    pub fn new(
        program: Arc<P>,
        ledger: Arc<L>,
        session: DecryptSession,
        settings: DecryptionSettings,
    ) -> Self {
        Self {
            program,
            ledger,
            session,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn session(&self) -> &DecryptSession {
        &self.session
    }

    /// Swaps in a new session, returning the old one
    pub fn replace_session(&mut self, session: DecryptSession) -> DecryptSession {
        std::mem::replace(&mut self.session, session)
    }

    pub async fn create_survey(
        &self,
        admin: &Pubkey,
        title: &str,
        description: &str,
        product_names: &[String],
    ) -> ClientResult<u64> {
        let survey_id = self
            .program
            .create_survey(admin, title, description, product_names)
            .await?;
        info!(survey_id, title, "Created survey");
        Ok(survey_id)
    }

    pub async fn end_survey(&self, survey_id: u64, admin: &Pubkey) -> ClientResult<()> {
        self.program.end_survey(survey_id, admin).await
    }

    /// Drives one product to a decrypted sum, or reports it pending
    pub async fn finalize_product(
        &self,
        survey_id: u64,
        product_index: u8,
        admin: &Pubkey,
    ) -> ClientResult<FinalizeOutcome> {
        let _claim = InFlight::claim(&self.in_flight, survey_id, product_index)?;

        let survey = self.program.get_survey(survey_id).await?;
        if survey.decryption_status(product_index)? == DecryptionStatus::Decrypted {
            let sum = survey.decrypted_sum(product_index)?;
            debug!(survey_id, product_index, sum, "Already decrypted");
            return Ok(FinalizeOutcome::Decrypted(sum));
        }

        match self.settings.mode {
            DecryptMode::Gateway => self.finalize_via_gateway(survey_id, product_index, admin).await,
            DecryptMode::Local => self.finalize_locally(survey_id, product_index, admin).await,
        }
    }

    async fn finalize_via_gateway(
        &self,
        survey_id: u64,
        product_index: u8,
        admin: &Pubkey,
    ) -> ClientResult<FinalizeOutcome> {
        let request_id = self
            .program
            .finalize_product(survey_id, product_index, admin)
            .await?;
        info!(survey_id, product_index, request_id, "Waiting for gateway");

        let max_attempts = self.settings.max_poll_attempts;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.settings.poll_interval()).await;

            match self
                .program
                .get_decrypted_sum(survey_id, product_index)
                .await
            {
                Ok(sum) => {
                    info!(survey_id, product_index, sum, attempt, "Decrypted");
                    return Ok(FinalizeOutcome::Decrypted(sum));
                }
                Err(e) if e.is_not_ready() => {
                    debug!(survey_id, product_index, attempt, "Not ready");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            survey_id,
            product_index, request_id, "Gave up polling; request still open"
        );
        Ok(FinalizeOutcome::Pending {
            request_id,
            attempts: max_attempts,
        })
    }

    async fn finalize_locally(
        &self,
        survey_id: u64,
        product_index: u8,
        admin: &Pubkey,
    ) -> ClientResult<FinalizeOutcome> {
        if !self.session.has_oracle() {
            return Err(ClientError::OracleUnavailable(
                self.session.network().to_string(),
            ));
        }

        let request_id = self
            .program
            .finalize_product(survey_id, product_index, admin)
            .await?;
        let handle = self
            .program
            .get_encrypted_sum(survey_id, product_index)
            .await?;
        let value = self.session.decrypt(&handle)?;

        let sum = self
            .program
            .decryption_callback(request_id, value.to_be_bytes().to_vec(), CallbackOrigin::Unsigned)
            .await?;
        info!(survey_id, product_index, request_id, sum, "Decrypted locally");
        Ok(FinalizeOutcome::Decrypted(sum))
    }

    /// Finalizes every product in order
    pub async fn finalize_all(
        &self,
        survey_id: u64,
        admin: &Pubkey,
    ) -> ClientResult<Vec<FinalizeOutcome>> {
        let product_count = self.program.get_survey(survey_id).await?.product_count();
        let mut outcomes = Vec::with_capacity(product_count as usize);
        for product_index in 0..product_count {
            outcomes.push(self.finalize_product(survey_id, product_index, admin).await?);
        }
        Ok(outcomes)
    }

    /// Marks the survey finalized once every product is decrypted
    pub async fn complete_survey(&self, survey_id: u64, admin: &Pubkey) -> ClientResult<()> {
        if !self.program.is_survey_fully_finalized(survey_id).await? {
            return Err(SurveyError::NotAllDecrypted.into());
        }
        self.program
            .mark_survey_fully_finalized(survey_id, admin)
            .await
    }

    /// Sums and two-decimal averages for every decrypted product
    pub async fn results(&self, survey_id: u64) -> ClientResult<SurveyResults> {
        let survey = self.program.get_survey(survey_id).await?;

        let products = survey
            .product_names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let sum = survey.decrypted_sum(index as u8).ok();
                ProductResult {
                    name: name.clone(),
                    sum,
                    average: sum.and_then(|s| average(s, survey.total_responses)),
                }
            })
            .collect();

        Ok(SurveyResults {
            survey_id,
            title: survey.title,
            total_responses: survey.total_responses,
            products,
        })
    }

    pub async fn list_surveys(&self) -> ClientResult<Vec<SurveySummary>> {
        let count = self.program.get_survey_count().await?;
        let mut summaries = Vec::with_capacity(count as usize);

        for survey_id in 0..count {
            let survey = self.program.get_survey(survey_id).await?;
            summaries.push(SurveySummary {
                survey_id,
                statuses: survey.products.iter().map(|p| p.status).collect(),
                title: survey.title,
                admin: survey.admin,
                product_names: survey.product_names,
                total_responses: survey.total_responses,
                is_active: survey.is_active,
                is_finalized: survey.is_finalized,
            });
        }
        Ok(summaries)
    }
}

impl<P: SurveyProgram> Orchestrator<P, ()> {
    /// Orchestrator that never encrypts ratings, for admin and read-only use
    pub fn without_ledger(
        program: Arc<P>,
        session: DecryptSession,
        settings: DecryptionSettings,
    ) -> Self {
        Self::new(program, Arc::new(()), session, settings)
    }
}

impl<P: SurveyProgram, L: EncryptedLedger> Orchestrator<P, L> {
    /// Encrypts and submits one rating per product
    pub async fn submit_ratings(
        &self,
        survey_id: u64,
        user: &Pubkey,
        ratings: &[u8],
    ) -> ClientResult<()> {
        if let Some(bad) = ratings
            .iter()
            .find(|r| !(MIN_RATING..=MAX_RATING).contains(&u32::from(**r)))
        {
            return Err(ClientError::InvalidRating(*bad));
        }

        let program_id = self.program.program_id();
        let inputs = ratings
            .iter()
            .map(|r| self.ledger.encrypt(&program_id, user, u32::from(*r)))
            .collect();

        self.program.submit_ratings(survey_id, user, inputs).await?;
        debug!(survey_id, count = ratings.len(), "Submitted encrypted ratings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockMxe;
    use crate::local::LocalNetwork;
    use std::time::Duration;

    fn local_orchestrator() -> (Orchestrator<LocalNetwork, MockMxe>, Arc<LocalNetwork>) {
        let mxe = Arc::new(MockMxe::new());
        let net = Arc::new(LocalNetwork::new(mxe.clone()));
        let settings = DecryptionSettings {
            mode: DecryptMode::Local,
            ..Default::default()
        };
        let orch = Orchestrator::new(net.clone(), mxe.clone(), DecryptSession::local("localnet", mxe), settings);
        (orch, net)
    }

    fn names() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    #[tokio::test]
    async fn test_admin_orchestrator_without_ledger() {
        let (mut rater, net) = local_orchestrator();
        let admin = Pubkey::new_unique();
        let id = rater.create_survey(&admin, "T", "D", &names()).await.unwrap();
        rater
            .submit_ratings(id, &Pubkey::new_unique(), &[4, 2])
            .await
            .unwrap();
        rater.end_survey(id, &admin).await.unwrap();

        // The admin side only needs the oracle, never the ledger
        let session = rater.replace_session(DecryptSession::gateway("elsewhere"));
        let settings = DecryptionSettings {
            mode: DecryptMode::Local,
            ..Default::default()
        };
        let admin_orch = Orchestrator::without_ledger(net, session, settings);

        let outcomes = admin_orch.finalize_all(id, &admin).await.unwrap();
        assert_eq!(
            outcomes,
            vec![FinalizeOutcome::Decrypted(4), FinalizeOutcome::Decrypted(2)]
        );
        admin_orch.complete_survey(id, &admin).await.unwrap();
        let results = admin_orch.results(id).await.unwrap();
        assert_eq!(results.products[0].average, Some(4.0));
    }

    #[test]
    fn test_average_rounds_to_two_decimals() {
        assert_eq!(average(8, 2), Some(4.0));
        assert_eq!(average(10, 3), Some(3.33));
        assert_eq!(average(11, 3), Some(3.67));
        assert_eq!(average(5, 0), None);
    }

    #[test]
    fn test_session_switch_drops_oracle() {
        let mut session = DecryptSession::local("localnet", Arc::new(MockMxe::new()));
        assert!(session.has_oracle());

        session.switch_network("devnet", None);
        assert_eq!(session.network(), "devnet");
        assert!(matches!(
            session.decrypt(&[0u8; 32]),
            Err(ClientError::OracleUnavailable(n)) if n == "devnet"
        ));
    }

    #[tokio::test]
    async fn test_invalid_rating_rejected_before_submit() {
        let (orch, net) = local_orchestrator();
        let admin = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let id = orch.create_survey(&admin, "T", "D", &names()).await.unwrap();

        for bad in [[0u8, 3], [3, 6]] {
            let err = orch.submit_ratings(id, &user, &bad).await.unwrap_err();
            assert!(matches!(err, ClientError::InvalidRating(_)));
        }
        assert!(!net.has_user_submitted(id, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_mode_without_oracle_requests_nothing() {
        let (mut orch, net) = local_orchestrator();
        let admin = Pubkey::new_unique();
        let id = orch.create_survey(&admin, "T", "D", &names()).await.unwrap();
        orch.submit_ratings(id, &Pubkey::new_unique(), &[2, 2]).await.unwrap();
        orch.end_survey(id, &admin).await.unwrap();

        let old = orch.replace_session(DecryptSession::gateway("devnet"));
        assert_eq!(old.network(), "localnet");

        let err = orch.finalize_product(id, 0, &admin).await.unwrap_err();
        assert!(matches!(err, ClientError::OracleUnavailable(_)));
        assert_eq!(
            net.get_survey(id).await.unwrap().decryption_status(0).unwrap(),
            DecryptionStatus::Encrypted
        );
    }

    #[tokio::test]
    async fn test_already_decrypted_returns_stored_sum() {
        let (orch, net) = local_orchestrator();
        let admin = Pubkey::new_unique();
        let id = orch.create_survey(&admin, "T", "D", &names()).await.unwrap();
        orch.submit_ratings(id, &Pubkey::new_unique(), &[4, 1]).await.unwrap();
        orch.end_survey(id, &admin).await.unwrap();

        assert_eq!(
            orch.finalize_product(id, 0, &admin).await.unwrap(),
            FinalizeOutcome::Decrypted(4)
        );
        let requests_before = net.events().len();
        assert_eq!(
            orch.finalize_product(id, 0, &admin).await.unwrap(),
            FinalizeOutcome::Decrypted(4)
        );
        assert_eq!(net.events().len(), requests_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_finalize_same_product_rejected() {
        let mxe = Arc::new(MockMxe::new());
        let net = Arc::new(LocalNetwork::with_gateway(mxe.clone(), Duration::from_secs(5)));
        let orch = Orchestrator::new(
            net.clone(),
            mxe,
            DecryptSession::gateway("devnet"),
            DecryptionSettings::default(),
        );
        let admin = Pubkey::new_unique();
        let id = orch.create_survey(&admin, "T", "D", &names()).await.unwrap();
        orch.submit_ratings(id, &Pubkey::new_unique(), &[3, 5]).await.unwrap();
        orch.end_survey(id, &admin).await.unwrap();

        let (first, second) = tokio::join!(
            orch.finalize_product(id, 1, &admin),
            orch.finalize_product(id, 1, &admin)
        );
        assert_eq!(first.unwrap(), FinalizeOutcome::Decrypted(5));
        assert!(matches!(
            second,
            Err(ClientError::FinalizeInFlight { survey_id, product_index: 1 }) if survey_id == id
        ));

        // The claim is released once the first call returns
        assert_eq!(
            orch.finalize_product(id, 1, &admin).await.unwrap(),
            FinalizeOutcome::Decrypted(5)
        );
    }

    #[tokio::test]
    async fn test_complete_requires_all_products() {
        let (orch, _net) = local_orchestrator();
        let admin = Pubkey::new_unique();
        let id = orch.create_survey(&admin, "T", "D", &names()).await.unwrap();
        orch.submit_ratings(id, &Pubkey::new_unique(), &[1, 2]).await.unwrap();
        orch.end_survey(id, &admin).await.unwrap();
        orch.finalize_product(id, 0, &admin).await.unwrap();

        let err = orch.complete_survey(id, &admin).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(SurveyError::NotAllDecrypted)));

        orch.finalize_product(id, 1, &admin).await.unwrap();
        orch.complete_survey(id, &admin).await.unwrap();

        let summary = &orch.list_surveys().await.unwrap()[0];
        assert!(summary.is_finalized);
        assert!(summary
            .statuses
            .iter()
            .all(|s| *s == DecryptionStatus::Decrypted));
    }
}
