//! Account state for surveys and decryption requests.
//!
//! Every state transition lives here as a method returning
//! `Result<_, SurveyError>` so the instruction handlers stay thin and the
//! same rules can be exercised off-chain.

use anchor_lang::prelude::*;

use crate::error::SurveyError;

// ==================== LIMITS ====================

pub const MIN_PRODUCTS: usize = 2;
pub const MAX_PRODUCTS: usize = 5;
pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_PRODUCT_NAME_LEN: usize = 32;

/// One MXE ciphertext (a single encrypted field element)
pub type Ciphertext = [u8; 32];

pub type StateResult<T> = core::result::Result<T, SurveyError>;

// ==================== CONFIG ====================

/// Program-wide settings, created once at deployment
#[account]
#[derive(InitSpace, Default, Debug, PartialEq)]
pub struct SurveyConfig {
    pub authority: Pubkey,
    pub mxe_program_id: Pubkey,
    /// Accept decryption callbacks that were not signed through the MXE.
    /// Only local deployments without a decryption gateway set this.
    pub allow_unsigned_callbacks: bool,
    pub survey_count: u64,
    pub bump: u8,
}

impl SurveyConfig {
    pub fn initialize(
        &mut self,
        authority: Pubkey,
        mxe_program_id: Pubkey,
        allow_unsigned_callbacks: bool,
        bump: u8,
    ) {
        self.authority = authority;
        self.mxe_program_id = mxe_program_id;
        self.allow_unsigned_callbacks = allow_unsigned_callbacks;
        self.survey_count = 0;
        self.bump = bump;
    }

    /// Hands out the next sequential survey id
    pub fn allocate_survey_id(&mut self) -> u64 {
        let id = self.survey_count;
        self.survey_count += 1;
        id
    }

    /// One-way switch: once off, unsigned callbacks can never be re-enabled
    pub fn disable_unsigned_callbacks(&mut self, caller: &Pubkey) -> StateResult<()> {
        if *caller != self.authority {
            return Err(SurveyError::Unauthorized);
        }
        self.allow_unsigned_callbacks = false;
        Ok(())
    }

    pub fn authorize_callback(&self, signed_by_mxe: bool) -> StateResult<()> {
        if signed_by_mxe || self.allow_unsigned_callbacks {
            Ok(())
        } else {
            Err(SurveyError::BadSignature)
        }
    }
}

// ==================== SURVEY ====================

#[derive(
    AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq, InitSpace,
)]
pub enum DecryptionStatus {
    #[default]
    Encrypted,
    Requested,
    Decrypted,
}

/// Encrypted accumulator and decryption progress for one product
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default, PartialEq, Eq, InitSpace)]
pub struct ProductTally {
    pub encrypted_sum: [u8; 32],
    pub status: DecryptionStatus,
    /// Authoritative once `status` is `Decrypted`
    pub decrypted_sum: u32,
}

#[account]
#[derive(InitSpace, Default, Debug, PartialEq)]
pub struct Survey {
    pub id: u64,
    pub admin: Pubkey,
    #[max_len(100)]
    pub title: String,
    #[max_len(500)]
    pub description: String,
    #[max_len(5, 32)]
    pub product_names: Vec<String>,
    #[max_len(5)]
    pub products: Vec<ProductTally>,
    /// Nonce shared by the accumulator ciphertexts
    pub sums_nonce: u128,
    /// An MXE computation over the sums is queued and its callback has not
    /// landed yet. Only one may be in flight, so every computation starts
    /// from the sums the previous one produced.
    pub sums_pending: bool,
    pub is_active: bool,
    pub is_finalized: bool,
    pub total_responses: u64,
    pub created_at: i64,
    pub ended_at: i64,
    pub bump: u8,
}

impl Survey {
    pub fn validate_details(
        title: &str,
        description: &str,
        product_names: &[String],
    ) -> StateResult<()> {
        if !(MIN_PRODUCTS..=MAX_PRODUCTS).contains(&product_names.len()) {
            return Err(SurveyError::InvalidProductCount);
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(SurveyError::TitleTooLong);
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(SurveyError::DescriptionTooLong);
        }
        if product_names.iter().any(|name| name.len() > MAX_PRODUCT_NAME_LEN) {
            return Err(SurveyError::ProductNameTooLong);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        &mut self,
        id: u64,
        admin: Pubkey,
        title: String,
        description: String,
        product_names: Vec<String>,
        created_at: i64,
        bump: u8,
    ) -> StateResult<()> {
        Self::validate_details(&title, &description, &product_names)?;

        self.id = id;
        self.admin = admin;
        self.title = title;
        self.description = description;
        self.products = vec![ProductTally::default(); product_names.len()];
        self.product_names = product_names;
        self.sums_nonce = 0;
        // init_sums is queued alongside creation
        self.sums_pending = true;
        self.is_active = true;
        self.is_finalized = false;
        self.total_responses = 0;
        self.created_at = created_at;
        self.ended_at = 0;
        self.bump = bump;
        Ok(())
    }

    pub fn product_count(&self) -> u8 {
        self.products.len() as u8
    }

    fn product(&self, index: u8) -> StateResult<&ProductTally> {
        self.products
            .get(index as usize)
            .ok_or(SurveyError::IndexOutOfRange)
    }

    fn product_mut(&mut self, index: u8) -> StateResult<&mut ProductTally> {
        self.products
            .get_mut(index as usize)
            .ok_or(SurveyError::IndexOutOfRange)
    }

    /// Checks a submission without recording it
    pub fn check_submission(&self, already_submitted: bool, rating_count: usize) -> StateResult<()> {
        if !self.is_active {
            return Err(SurveyError::SurveyInactive);
        }
        if already_submitted {
            return Err(SurveyError::AlreadySubmitted);
        }
        if rating_count != self.products.len() {
            return Err(SurveyError::RatingCountMismatch);
        }
        if self.sums_pending {
            return Err(SurveyError::ComputationPending);
        }
        Ok(())
    }

    /// Counts the response and marks the sums as being recomputed. The
    /// caller queues the accumulation right after.
    pub fn record_submission(&mut self, already_submitted: bool, rating_count: usize) -> StateResult<()> {
        self.check_submission(already_submitted, rating_count)?;
        self.total_responses += 1;
        self.sums_pending = true;
        Ok(())
    }

    /// Stores accumulator ciphertexts produced by the MXE and releases the
    /// pending computation. Slots beyond `product_count` are padding and
    /// are dropped.
    pub fn apply_encrypted_sums(&mut self, sums: &[Ciphertext], nonce: u128) -> StateResult<()> {
        if !self.sums_pending {
            return Err(SurveyError::NoPendingComputation);
        }
        if sums.len() < self.products.len() {
            return Err(SurveyError::CiphertextCountMismatch);
        }
        for (product, sum) in self.products.iter_mut().zip(sums) {
            product.encrypted_sum = *sum;
        }
        self.sums_nonce = nonce;
        self.sums_pending = false;
        Ok(())
    }

    pub fn end(&mut self, caller: &Pubkey, now: i64) -> StateResult<()> {
        if *caller != self.admin {
            return Err(SurveyError::NotAdmin);
        }
        if !self.is_active {
            return Err(SurveyError::AlreadyEnded);
        }
        self.is_active = false;
        self.ended_at = now;
        Ok(())
    }

    /// Moves a product to `Requested`. A product that is already
    /// `Requested` may be requested again; whichever callback lands first
    /// sets the sum.
    pub fn begin_decryption(&mut self, caller: &Pubkey, product_index: u8) -> StateResult<()> {
        if *caller != self.admin {
            return Err(SurveyError::NotAdmin);
        }
        if self.is_active {
            return Err(SurveyError::SurveyStillActive);
        }
        let status = self.product(product_index)?.status;
        if self.total_responses == 0 {
            return Err(SurveyError::NoResponses);
        }
        if status == DecryptionStatus::Decrypted {
            return Err(SurveyError::AlreadyDecrypted);
        }
        // The last accumulation has to land before its sum can be revealed
        if self.sums_pending {
            return Err(SurveyError::ComputationPending);
        }
        let product = self.product_mut(product_index)?;
        product.status = DecryptionStatus::Requested;
        Ok(())
    }

    pub fn complete_decryption(&mut self, product_index: u8, sum: u32) -> StateResult<()> {
        let product = self.product_mut(product_index)?;
        if product.status == DecryptionStatus::Decrypted {
            return Err(SurveyError::AlreadyDecrypted);
        }
        product.status = DecryptionStatus::Decrypted;
        product.decrypted_sum = sum;
        Ok(())
    }

    pub fn encrypted_sum(&self, product_index: u8) -> StateResult<Ciphertext> {
        Ok(self.product(product_index)?.encrypted_sum)
    }

    pub fn decryption_status(&self, product_index: u8) -> StateResult<DecryptionStatus> {
        Ok(self.product(product_index)?.status)
    }

    pub fn decrypted_sum(&self, product_index: u8) -> StateResult<u32> {
        let product = self.product(product_index)?;
        match product.status {
            DecryptionStatus::Decrypted => Ok(product.decrypted_sum),
            _ => Err(SurveyError::NotFinalizedYet),
        }
    }

    pub fn is_fully_decrypted(&self) -> bool {
        !self.products.is_empty()
            && self
                .products
                .iter()
                .all(|p| p.status == DecryptionStatus::Decrypted)
    }

    pub fn mark_fully_finalized(&mut self, caller: &Pubkey) -> StateResult<()> {
        if *caller != self.admin {
            return Err(SurveyError::NotAdmin);
        }
        if self.is_finalized {
            return Err(SurveyError::AlreadyFinalized);
        }
        if self.is_active || !self.is_fully_decrypted() {
            return Err(SurveyError::NotAllDecrypted);
        }
        self.is_finalized = true;
        Ok(())
    }
}

// ==================== SUBMISSIONS ====================

/// Marks that `user` has rated `survey`. The PDA is created on first
/// submission and the flag never goes back to false.
#[account]
#[derive(InitSpace, Default, Debug, PartialEq)]
pub struct SubmissionRecord {
    pub survey: Pubkey,
    pub user: Pubkey,
    pub submitted: bool,
    pub submitted_at: i64,
    pub bump: u8,
}

impl SubmissionRecord {
    pub fn record(&mut self, survey: Pubkey, user: Pubkey, now: i64, bump: u8) {
        self.survey = survey;
        self.user = user;
        self.submitted = true;
        self.submitted_at = now;
        self.bump = bump;
    }
}

// ==================== DECRYPTION REQUESTS ====================

#[derive(
    AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq, InitSpace,
)]
pub enum RequestStatus {
    #[default]
    Requested,
    Fulfilled,
}

#[account]
#[derive(InitSpace, Default, Debug, PartialEq)]
pub struct DecryptionRequest {
    pub request_id: u64,
    pub survey: Pubkey,
    pub survey_id: u64,
    pub product_index: u8,
    pub status: RequestStatus,
    pub requested_at: i64,
    pub fulfilled_at: i64,
    pub bump: u8,
}

impl DecryptionRequest {
    pub fn open(
        &mut self,
        request_id: u64,
        survey: Pubkey,
        survey_id: u64,
        product_index: u8,
        now: i64,
        bump: u8,
    ) {
        self.request_id = request_id;
        self.survey = survey;
        self.survey_id = survey_id;
        self.product_index = product_index;
        self.status = RequestStatus::Requested;
        self.requested_at = now;
        self.fulfilled_at = 0;
        self.bump = bump;
    }

    /// Applies a verified cleartext to the survey this request points at.
    /// Nothing is written unless every check passes.
    pub fn fulfil(&mut self, survey: &mut Survey, cleartext: &[u8], now: i64) -> StateResult<u32> {
        if survey.id != self.survey_id {
            return Err(SurveyError::UnknownRequest);
        }
        if self.status == RequestStatus::Fulfilled {
            return Err(SurveyError::RequestAlreadyFulfilled);
        }
        let sum = decode_cleartext(cleartext)?;
        survey.complete_decryption(self.product_index, sum)?;
        self.status = RequestStatus::Fulfilled;
        self.fulfilled_at = now;
        Ok(sum)
    }
}

/// Cleartexts arrive as a big-endian `u32`
pub fn decode_cleartext(bytes: &[u8]) -> StateResult<u32> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| SurveyError::MalformedCleartext)?;
    Ok(u32::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Product {}", i)).collect()
    }

    /// Survey whose init_sums callback has not landed yet
    fn created_survey(admin: Pubkey, product_count: usize) -> Survey {
        let mut survey = Survey::default();
        survey
            .initialize(
                0,
                admin,
                "Coffee".to_string(),
                "Rate our blends".to_string(),
                names(product_count),
                1_700_000_000,
                255,
            )
            .unwrap();
        survey
    }

    fn new_survey(admin: Pubkey, product_count: usize) -> Survey {
        let mut survey = created_survey(admin, product_count);
        survey.apply_encrypted_sums(&[[0u8; 32]; MAX_PRODUCTS], 0).unwrap();
        survey
    }

    /// Survey with one response per rater, already ended
    fn ended_survey(admin: Pubkey, responses: u64) -> Survey {
        let mut survey = new_survey(admin, 2);
        for n in 0..responses {
            survey.record_submission(false, 2).unwrap();
            survey
                .apply_encrypted_sums(&[[0u8; 32]; MAX_PRODUCTS], n as u128 + 1)
                .unwrap();
        }
        survey.end(&admin, 1_700_000_100).unwrap();
        survey
    }

    /// Plaintext stand-in for the MXE: the first four bytes of each slot
    /// carry the sum.
    fn mxe_accumulate(sums: &[Ciphertext], ratings: &[u32]) -> Vec<Ciphertext> {
        sums.iter()
            .zip(ratings)
            .map(|(sum, rating)| {
                let current = u32::from_le_bytes([sum[0], sum[1], sum[2], sum[3]]);
                let mut next = [0u8; 32];
                next[..4].copy_from_slice(&(current + rating).to_le_bytes());
                next
            })
            .collect()
    }

    fn stored_sums(survey: &Survey) -> Vec<Ciphertext> {
        survey.products.iter().map(|p| p.encrypted_sum).collect()
    }

    fn plain_sums(survey: &Survey) -> Vec<u32> {
        stored_sums(survey)
            .iter()
            .map(|sum| u32::from_le_bytes([sum[0], sum[1], sum[2], sum[3]]))
            .collect()
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    #[test]
    fn test_product_count_bounds() {
        for n in [0, 1, 6, 7] {
            let mut survey = Survey::default();
            let err = survey
                .initialize(0, Pubkey::new_unique(), "t".into(), "d".into(), names(n), 0, 0)
                .unwrap_err();
            assert!(matches!(err, SurveyError::InvalidProductCount), "n = {}", n);
        }
        for n in MIN_PRODUCTS..=MAX_PRODUCTS {
            let survey = new_survey(Pubkey::new_unique(), n);
            assert_eq!(survey.product_count() as usize, n);
            assert_eq!(survey.products.len(), survey.product_names.len());
        }
    }

    #[test]
    fn test_new_survey_is_active_and_zeroed() {
        let admin = Pubkey::new_unique();
        let survey = new_survey(admin, 3);
        assert!(survey.is_active);
        assert!(!survey.is_finalized);
        assert_eq!(survey.admin, admin);
        assert_eq!(survey.total_responses, 0);
        assert!(survey
            .products
            .iter()
            .all(|p| p.status == DecryptionStatus::Encrypted && p.decrypted_sum == 0));
    }

    #[test]
    fn test_fresh_accounts_start_sealed() {
        assert_eq!(ProductTally::default().status, DecryptionStatus::Encrypted);
        assert_eq!(DecryptionRequest::default().status, RequestStatus::Requested);
    }

    #[test]
    fn test_text_limits() {
        let long_title = "t".repeat(MAX_TITLE_LEN + 1);
        let long_desc = "d".repeat(MAX_DESCRIPTION_LEN + 1);
        let long_name = vec!["a".to_string(), "b".repeat(MAX_PRODUCT_NAME_LEN + 1)];

        assert!(matches!(
            Survey::validate_details(&long_title, "", &names(2)),
            Err(SurveyError::TitleTooLong)
        ));
        assert!(matches!(
            Survey::validate_details("", &long_desc, &names(2)),
            Err(SurveyError::DescriptionTooLong)
        ));
        assert!(matches!(
            Survey::validate_details("", "", &long_name),
            Err(SurveyError::ProductNameTooLong)
        ));
    }

    #[test]
    fn test_config_allocates_sequential_ids() {
        let mut config = SurveyConfig::default();
        config.initialize(Pubkey::new_unique(), Pubkey::new_unique(), false, 1);
        assert_eq!(config.allocate_survey_id(), 0);
        assert_eq!(config.allocate_survey_id(), 1);
        assert_eq!(config.survey_count, 2);
    }

    // =========================================================================
    // SUBMISSIONS
    // =========================================================================

    #[test]
    fn test_submission_counts_once_per_user() {
        let mut survey = new_survey(Pubkey::new_unique(), 2);
        survey.record_submission(false, 2).unwrap();
        assert_eq!(survey.total_responses, 1);

        let err = survey.record_submission(true, 2).unwrap_err();
        assert!(matches!(err, SurveyError::AlreadySubmitted));
        assert_eq!(survey.total_responses, 1);
    }

    #[test]
    fn test_submission_rating_count_must_match() {
        let mut survey = new_survey(Pubkey::new_unique(), 3);
        for count in [0, 2, 4] {
            let err = survey.record_submission(false, count).unwrap_err();
            assert!(matches!(err, SurveyError::RatingCountMismatch));
        }
        assert_eq!(survey.total_responses, 0);
    }

    #[test]
    fn test_submission_after_end_rejected() {
        let admin = Pubkey::new_unique();
        let mut survey = new_survey(admin, 2);
        survey.end(&admin, 10).unwrap();
        let err = survey.record_submission(false, 2).unwrap_err();
        assert!(matches!(err, SurveyError::SurveyInactive));
    }

    #[test]
    fn test_inactive_checked_before_duplicate() {
        let admin = Pubkey::new_unique();
        let mut survey = new_survey(admin, 2);
        survey.end(&admin, 10).unwrap();
        let err = survey.check_submission(true, 5).unwrap_err();
        assert!(matches!(err, SurveyError::SurveyInactive));
    }

    #[test]
    fn test_apply_encrypted_sums_keeps_product_count() {
        let mut survey = new_survey(Pubkey::new_unique(), 2);
        let sums = [[1u8; 32], [2u8; 32], [3u8; 32], [4u8; 32], [5u8; 32]];
        survey.record_submission(false, 2).unwrap();
        survey.apply_encrypted_sums(&sums, 42).unwrap();
        assert_eq!(survey.products.len(), 2);
        assert_eq!(survey.encrypted_sum(1).unwrap(), [2u8; 32]);
        assert_eq!(survey.sums_nonce, 42);

        survey.record_submission(false, 2).unwrap();
        let err = survey.apply_encrypted_sums(&sums[..1], 43).unwrap_err();
        assert!(matches!(err, SurveyError::CiphertextCountMismatch));
        assert_eq!(survey.sums_nonce, 42);
        assert!(survey.sums_pending);
    }

    // =========================================================================
    // IN-FLIGHT COMPUTATIONS
    // =========================================================================

    #[test]
    fn test_submission_waits_for_initial_sums() {
        let mut survey = created_survey(Pubkey::new_unique(), 2);
        assert!(survey.sums_pending);

        let err = survey.record_submission(false, 2).unwrap_err();
        assert!(matches!(err, SurveyError::ComputationPending));
        assert_eq!(survey.total_responses, 0);

        survey.apply_encrypted_sums(&[[0u8; 32]; MAX_PRODUCTS], 0).unwrap();
        survey.record_submission(false, 2).unwrap();
        assert_eq!(survey.total_responses, 1);
    }

    #[test]
    fn test_overlapping_submissions_do_not_lose_ratings() {
        let mut survey = new_survey(Pubkey::new_unique(), 2);

        // First rater queues [5, 1] against the zero sums
        survey.record_submission(false, 2).unwrap();
        let first = mxe_accumulate(&stored_sums(&survey), &[5, 1]);

        // Second rater arrives before the first callback
        let err = survey.record_submission(false, 2).unwrap_err();
        assert!(matches!(err, SurveyError::ComputationPending));

        survey.apply_encrypted_sums(&first, 1).unwrap();

        // Retried after the callback, it builds on the first result
        survey.record_submission(false, 2).unwrap();
        let second = mxe_accumulate(&first, &[3, 3]);
        survey.apply_encrypted_sums(&second, 2).unwrap();

        assert_eq!(plain_sums(&survey), vec![8, 4]);
        assert_eq!(survey.total_responses, 2);
        assert!(!survey.sums_pending);
    }

    #[test]
    fn test_unexpected_sums_callback_rejected() {
        let mut survey = new_survey(Pubkey::new_unique(), 2);
        let err = survey
            .apply_encrypted_sums(&[[9u8; 32]; MAX_PRODUCTS], 7)
            .unwrap_err();
        assert!(matches!(err, SurveyError::NoPendingComputation));
        assert_eq!(survey.encrypted_sum(0).unwrap(), [0u8; 32]);
        assert_eq!(survey.sums_nonce, 0);
    }

    #[test]
    fn test_finalize_waits_for_last_accumulation() {
        let admin = Pubkey::new_unique();
        let mut survey = new_survey(admin, 2);
        survey.record_submission(false, 2).unwrap();
        // Ending does not need the sums
        survey.end(&admin, 10).unwrap();

        let err = survey.begin_decryption(&admin, 0).unwrap_err();
        assert!(matches!(err, SurveyError::ComputationPending));
        assert_eq!(survey.decryption_status(0).unwrap(), DecryptionStatus::Encrypted);

        survey.apply_encrypted_sums(&[[0u8; 32]; MAX_PRODUCTS], 1).unwrap();
        survey.begin_decryption(&admin, 0).unwrap();
    }

    // =========================================================================
    // ENDING
    // =========================================================================

    #[test]
    fn test_end_requires_admin_and_happens_once() {
        let admin = Pubkey::new_unique();
        let mut survey = new_survey(admin, 2);

        let err = survey.end(&Pubkey::new_unique(), 5).unwrap_err();
        assert!(matches!(err, SurveyError::NotAdmin));
        assert!(survey.is_active);

        survey.end(&admin, 5).unwrap();
        assert!(!survey.is_active);
        assert_eq!(survey.ended_at, 5);

        let err = survey.end(&admin, 6).unwrap_err();
        assert!(matches!(err, SurveyError::AlreadyEnded));
        assert_eq!(survey.ended_at, 5);
    }

    // =========================================================================
    // DECRYPTION STATE MACHINE
    // =========================================================================

    #[test]
    fn test_finalize_before_end_rejected() {
        let admin = Pubkey::new_unique();
        let mut survey = new_survey(admin, 2);
        survey.record_submission(false, 2).unwrap();
        let err = survey.begin_decryption(&admin, 0).unwrap_err();
        assert!(matches!(err, SurveyError::SurveyStillActive));
    }

    #[test]
    fn test_finalize_preconditions() {
        let admin = Pubkey::new_unique();

        let mut survey = ended_survey(admin, 1);
        assert!(matches!(
            survey.begin_decryption(&Pubkey::new_unique(), 0),
            Err(SurveyError::NotAdmin)
        ));
        assert!(matches!(
            survey.begin_decryption(&admin, 2),
            Err(SurveyError::IndexOutOfRange)
        ));

        let mut empty = ended_survey(admin, 0);
        assert!(matches!(
            empty.begin_decryption(&admin, 0),
            Err(SurveyError::NoResponses)
        ));
    }

    #[test]
    fn test_product_state_machine() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 2);

        assert_eq!(survey.decryption_status(0).unwrap(), DecryptionStatus::Encrypted);
        survey.begin_decryption(&admin, 0).unwrap();
        assert_eq!(survey.decryption_status(0).unwrap(), DecryptionStatus::Requested);

        // Retrying a pending request is allowed
        survey.begin_decryption(&admin, 0).unwrap();
        assert!(matches!(survey.decrypted_sum(0), Err(SurveyError::NotFinalizedYet)));

        survey.complete_decryption(0, 8).unwrap();
        assert_eq!(survey.decryption_status(0).unwrap(), DecryptionStatus::Decrypted);
        assert_eq!(survey.decrypted_sum(0).unwrap(), 8);

        assert!(matches!(
            survey.begin_decryption(&admin, 0),
            Err(SurveyError::AlreadyDecrypted)
        ));
        assert!(matches!(
            survey.complete_decryption(0, 99),
            Err(SurveyError::AlreadyDecrypted)
        ));
        assert_eq!(survey.decrypted_sum(0).unwrap(), 8);
    }

    #[test]
    fn test_fully_decrypted_and_mark_finalized() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 2);

        survey.begin_decryption(&admin, 0).unwrap();
        survey.complete_decryption(0, 8).unwrap();
        assert!(!survey.is_fully_decrypted());
        assert!(matches!(
            survey.mark_fully_finalized(&admin),
            Err(SurveyError::NotAllDecrypted)
        ));

        survey.begin_decryption(&admin, 1).unwrap();
        survey.complete_decryption(1, 4).unwrap();
        assert!(survey.is_fully_decrypted());

        assert!(matches!(
            survey.mark_fully_finalized(&Pubkey::new_unique()),
            Err(SurveyError::NotAdmin)
        ));
        survey.mark_fully_finalized(&admin).unwrap();
        assert!(survey.is_finalized);
        assert!(matches!(
            survey.mark_fully_finalized(&admin),
            Err(SurveyError::AlreadyFinalized)
        ));
    }

    // =========================================================================
    // DECRYPTION REQUESTS
    // =========================================================================

    #[test]
    fn test_request_fulfil_decodes_big_endian() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 2);
        survey.begin_decryption(&admin, 1).unwrap();

        let mut request = DecryptionRequest::default();
        request.open(77, Pubkey::new_unique(), survey.id, 1, 10, 254);

        let sum = request.fulfil(&mut survey, &4u32.to_be_bytes(), 11).unwrap();
        assert_eq!(sum, 4);
        assert_eq!(request.status, RequestStatus::Fulfilled);
        assert_eq!(request.fulfilled_at, 11);
        assert_eq!(survey.decrypted_sum(1).unwrap(), 4);
    }

    #[test]
    fn test_request_fulfil_is_not_repeatable() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 1);
        survey.begin_decryption(&admin, 0).unwrap();

        let mut first = DecryptionRequest::default();
        first.open(1, Pubkey::new_unique(), survey.id, 0, 0, 0);
        let mut retry = DecryptionRequest::default();
        retry.open(2, Pubkey::new_unique(), survey.id, 0, 0, 0);

        first.fulfil(&mut survey, &[0, 0, 0, 5], 1).unwrap();
        assert!(matches!(
            first.fulfil(&mut survey, &[0, 0, 0, 5], 2),
            Err(SurveyError::RequestAlreadyFulfilled)
        ));

        // A late answer for a second request must not overwrite the sum
        assert!(matches!(
            retry.fulfil(&mut survey, &[0, 0, 0, 9], 3),
            Err(SurveyError::AlreadyDecrypted)
        ));
        assert_eq!(retry.status, RequestStatus::Requested);
        assert_eq!(survey.decrypted_sum(0).unwrap(), 5);
    }

    #[test]
    fn test_request_rejects_bad_cleartext_without_writing() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 1);
        survey.begin_decryption(&admin, 0).unwrap();

        let mut request = DecryptionRequest::default();
        request.open(1, Pubkey::new_unique(), survey.id, 0, 0, 0);

        for bad in [&[][..], &[1, 2, 3][..], &[0, 0, 0, 0, 1][..]] {
            assert!(matches!(
                request.fulfil(&mut survey, bad, 1),
                Err(SurveyError::MalformedCleartext)
            ));
        }
        assert_eq!(request.status, RequestStatus::Requested);
        assert_eq!(survey.decryption_status(0).unwrap(), DecryptionStatus::Requested);
    }

    #[test]
    fn test_request_for_other_survey_is_unknown() {
        let admin = Pubkey::new_unique();
        let mut survey = ended_survey(admin, 1);
        let mut request = DecryptionRequest::default();
        request.open(1, Pubkey::new_unique(), survey.id + 1, 0, 0, 0);
        assert!(matches!(
            request.fulfil(&mut survey, &[0, 0, 0, 1], 1),
            Err(SurveyError::UnknownRequest)
        ));
    }

    #[test]
    fn test_callback_authorization() {
        let authority = Pubkey::new_unique();
        let mut config = SurveyConfig::default();
        config.initialize(authority, Pubkey::new_unique(), true, 0);

        assert!(config.authorize_callback(true).is_ok());
        assert!(config.authorize_callback(false).is_ok());

        assert!(matches!(
            config.disable_unsigned_callbacks(&Pubkey::new_unique()),
            Err(SurveyError::Unauthorized)
        ));
        config.disable_unsigned_callbacks(&authority).unwrap();

        assert!(config.authorize_callback(true).is_ok());
        assert!(matches!(
            config.authorize_callback(false),
            Err(SurveyError::BadSignature)
        ));
    }
}
