//! Arcium Encrypted Instructions for the Product Satisfaction Survey
//!
//! Per-product rating sums live encrypted to the MXE. Each respondent's
//! ratings are added inside MPC and only the sum the admin asks for is
//! ever revealed.

use arcis_imports::*;

#[encrypted]
mod circuits {
    use arcis_imports::*;

    /// Number of accumulator slots; surveys with fewer products leave the
    /// tail at zero.
    const SLOTS: usize = 5;

    /// Encrypted running totals, one per product
    #[derive(Clone)]
    pub struct ProductSums {
        pub sums: [u32; SLOTS],
    }

    /// One respondent's ratings, one per product
    pub struct Ratings {
        pub values: [u8; SLOTS],
    }

    /// Zeroed accumulators for a new survey
    #[instruction]
    pub fn init_sums() -> Enc<Mxe, ProductSums> {
        Mxe.from_arcis(ProductSums { sums: [0; SLOTS] })
    }

    /// Add one respondent's ratings to the running sums.
    ///
    /// A rating outside 1..=5 contributes nothing. Padding slots carry a
    /// zero and so never move.
    #[instruction]
    pub fn accumulate_ratings(
        ratings: Enc<Shared, Ratings>,
        current: Enc<Mxe, ProductSums>,
    ) -> Enc<Mxe, ProductSums> {
        let ratings = ratings.to_arcis();
        let mut totals = current.to_arcis();

        for slot in 0..SLOTS {
            let rating = ratings.values[slot];
            if rating >= 1 && rating <= 5 {
                totals.sums[slot] += rating as u32;
            }
        }

        Mxe.from_arcis(totals)
    }

    /// Reveal the sum for a single product. The other slots stay encrypted.
    #[instruction]
    pub fn reveal_sum(current: Enc<Mxe, ProductSums>, product_index: u8) -> u32 {
        let totals = current.to_arcis();

        // Select by comparison; the whole array is touched either way
        let mut selected: u32 = 0;
        for slot in 0..SLOTS {
            if slot as u8 == product_index {
                selected = totals.sums[slot];
            }
        }

        selected.reveal()
    }
}

/// Plaintext mirror of the rating rule applied inside `accumulate_ratings`
pub mod validation {
    pub const MIN_RATING: u8 = 1;
    pub const MAX_RATING: u8 = 5;

    pub fn is_valid_rating(rating: u8) -> bool {
        (MIN_RATING..=MAX_RATING).contains(&rating)
    }

}
