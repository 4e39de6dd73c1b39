//! Encrypted ledger interface and an in-process mock.
//!
//! The real ledger is the Arcium MXE cluster. Handles are opaque 32-byte
//! ciphertexts; the client never learns anything from them. `MockMxe`
//! keeps plaintexts in a private table keyed by handle so local networks
//! and tests can run the full flow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anchor_lang::prelude::Pubkey;
use parking_lot::Mutex;
use product_survey::Ciphertext;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Ratings outside this range contribute nothing to a sum
pub const MIN_RATING: u32 = 1;
pub const MAX_RATING: u32 = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unknown ciphertext handle {0}")]
    UnknownHandle(String),

    #[error("Input proof does not bind handle {0} to this program and user")]
    InvalidProof(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// An encrypted value plus the proof that ties it to one program and user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: Ciphertext,
    pub proof: Vec<u8>,
}

/// Encryption and homomorphic accumulation
pub trait EncryptedLedger: Send + Sync {
    fn encrypt(&self, program: &Pubkey, user: &Pubkey, value: u32) -> EncryptedInput;

    /// Checks the proof and returns the handle it vouches for
    fn verify_input(
        &self,
        program: &Pubkey,
        user: &Pubkey,
        input: &EncryptedInput,
    ) -> LedgerResult<Ciphertext>;

    /// A fresh encryption of zero
    fn zero(&self) -> Ciphertext;

    /// `sum + rating`, where a rating outside 1..=5 adds nothing. `sum` is
    /// consumed: its handle is no longer valid afterwards.
    fn accumulate_rating(&self, sum: &Ciphertext, rating: &Ciphertext) -> LedgerResult<Ciphertext>;
}

/// Decrypts a handle without a gateway. Only local deployments have one.
pub trait DecryptOracle: Send + Sync {
    fn local_decrypt(&self, handle: &Ciphertext) -> LedgerResult<u32>;
}

/// In-process stand-in for the MXE cluster
#[derive(Default)]
pub struct MockMxe {
    plaintexts: Mutex<HashMap<Ciphertext, u32>>,
    counter: AtomicU64,
}

impl MockMxe {
    pub fn new() -> Self {
        Self::default()
    }

    fn seal(&self, value: u32) -> Ciphertext {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(b"mxe-ciphertext");
        hasher.update(n.to_le_bytes());
        hasher.update(value.to_le_bytes());
        let handle: Ciphertext = hasher.finalize().into();

        self.plaintexts.lock().insert(handle, value);
        handle
    }

    fn open(&self, handle: &Ciphertext) -> LedgerResult<u32> {
        self.plaintexts
            .lock()
            .get(handle)
            .copied()
            .ok_or_else(|| LedgerError::UnknownHandle(hex::encode(handle)))
    }

    fn proof_for(program: &Pubkey, user: &Pubkey, handle: &Ciphertext) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"mxe-input-proof");
        hasher.update(program.as_ref());
        hasher.update(user.as_ref());
        hasher.update(handle);
        hasher.finalize().to_vec()
    }
}

impl EncryptedLedger for MockMxe {
    fn encrypt(&self, program: &Pubkey, user: &Pubkey, value: u32) -> EncryptedInput {
        let handle = self.seal(value);
        EncryptedInput {
            handle,
            proof: Self::proof_for(program, user, &handle),
        }
    }

    fn verify_input(
        &self,
        program: &Pubkey,
        user: &Pubkey,
        input: &EncryptedInput,
    ) -> LedgerResult<Ciphertext> {
        if input.proof != Self::proof_for(program, user, &input.handle) {
            return Err(LedgerError::InvalidProof(hex::encode(input.handle)));
        }
        self.open(&input.handle)?;
        Ok(input.handle)
    }

    fn zero(&self) -> Ciphertext {
        self.seal(0)
    }

    fn accumulate_rating(&self, sum: &Ciphertext, rating: &Ciphertext) -> LedgerResult<Ciphertext> {
        let rating = self.open(rating)?;
        let total = self
            .plaintexts
            .lock()
            .remove(sum)
            .ok_or_else(|| LedgerError::UnknownHandle(hex::encode(sum)))?;
        let contribution = if (MIN_RATING..=MAX_RATING).contains(&rating) {
            rating
        } else {
            0
        };
        Ok(self.seal(total.saturating_add(contribution)))
    }
}

impl DecryptOracle for MockMxe {
    fn local_decrypt(&self, handle: &Ciphertext) -> LedgerResult<u32> {
        self.open(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_hides_equal_values() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let a = mxe.encrypt(&program, &user, 3);
        let b = mxe.encrypt(&program, &user, 3);
        assert_ne!(a.handle, b.handle);
        assert_eq!(mxe.local_decrypt(&a.handle).unwrap(), 3);
    }

    #[test]
    fn test_proof_bound_to_program_and_user() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let input = mxe.encrypt(&program, &user, 4);

        assert_eq!(mxe.verify_input(&program, &user, &input).unwrap(), input.handle);
        assert!(matches!(
            mxe.verify_input(&program, &Pubkey::new_unique(), &input),
            Err(LedgerError::InvalidProof(_))
        ));
        assert!(matches!(
            mxe.verify_input(&Pubkey::new_unique(), &user, &input),
            Err(LedgerError::InvalidProof(_))
        ));
    }

    #[test]
    fn test_forged_handle_rejected() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let handle = [7u8; 32];
        let forged = EncryptedInput {
            handle,
            proof: MockMxe::proof_for(&program, &user, &handle),
        };
        assert!(matches!(
            mxe.verify_input(&program, &user, &forged),
            Err(LedgerError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_accumulate_ignores_out_of_range() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut sum = mxe.zero();
        for rating in [5, 0, 3, 9] {
            let input = mxe.encrypt(&program, &user, rating);
            sum = mxe.accumulate_rating(&sum, &input.handle).unwrap();
        }
        assert_eq!(mxe.local_decrypt(&sum).unwrap(), 8);
    }

    #[test]
    fn test_accumulate_consumes_previous_sum() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let zero = mxe.zero();
        let rating = mxe.encrypt(&program, &user, 4);

        let sum = mxe.accumulate_rating(&zero, &rating.handle).unwrap();
        assert_eq!(mxe.plaintexts.lock().len(), 2);
        assert!(matches!(
            mxe.local_decrypt(&zero),
            Err(LedgerError::UnknownHandle(_))
        ));
        assert!(matches!(
            mxe.accumulate_rating(&zero, &rating.handle),
            Err(LedgerError::UnknownHandle(_))
        ));
        assert_eq!(mxe.local_decrypt(&sum).unwrap(), 4);
    }

    #[test]
    fn test_table_tracks_live_sums_only() {
        let mxe = MockMxe::new();
        let (program, user) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut sum = mxe.zero();
        for _ in 0..50 {
            let input = mxe.encrypt(&program, &user, 3);
            sum = mxe.accumulate_rating(&sum, &input.handle).unwrap();
        }
        // 50 rating inputs plus the one live sum
        assert_eq!(mxe.plaintexts.lock().len(), 51);
        assert_eq!(mxe.local_decrypt(&sum).unwrap(), 150);
    }
}
