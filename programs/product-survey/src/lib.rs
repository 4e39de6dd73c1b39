//! Product Satisfaction Survey - Solana Anchor Program
//!
//! Stores encrypted per-product rating sums and tracks the decryption
//! requests that turn them into plaintext. Ratings are added together
//! inside the Arcium MXE; the program only ever sees ciphertexts and the
//! per-product sums the admin chooses to reveal.

use anchor_lang::prelude::*;
#[allow(deprecated)]
use anchor_lang::solana_program::sysvar::instructions::get_instruction_relative;
use arcium_client::idl::arcium::cpi::{accounts::QueueComputation, queue_computation};
use arcium_client::idl::arcium::program::Arcium;
use arcium_client::idl::arcium::types::{
    ArgumentList, ArgumentRef, CallbackAccount, CallbackInstruction,
};
use arcium_client::pda::comp_def_offset;

pub mod error;
pub mod events;
pub mod state;

pub use error::SurveyError;
pub use events::*;
pub use state::*;

declare_id!("HVXFPhB2aVjjbSUQpAvpWBkLWjRyY7RkfwqvFvngRNeE");

// ==================== CONSTANTS ====================

/// Seeds for PDA derivation
pub const CONFIG_SEED: &[u8] = b"config";
pub const SURVEY_SEED: &[u8] = b"survey";
pub const SUBMISSION_SEED: &[u8] = b"submission";
pub const REQUEST_SEED: &[u8] = b"decrypt_request";
pub const SIGN_SEED: &[u8] = b"sign";

/// Computation definition names (must match arcis/survey-circuit)
pub const INIT_SUMS_COMP: &str = "init_sums";
pub const ACCUMULATE_RATINGS_COMP: &str = "accumulate_ratings";
pub const REVEAL_SUM_COMP: &str = "reveal_sum";

fn empty_args() -> ArgumentList {
    ArgumentList {
        args: Vec::new(),
        byte_arrays: Vec::new(),
        plaintext_numbers: Vec::new(),
        values_128_bit: Vec::new(),
        accounts: Vec::new(),
    }
}

/// Appends the survey's accumulators as an `Enc<Mxe, ProductSums>` argument.
/// The circuit works on `MAX_PRODUCTS` slots; unused ones are zero padding.
fn push_encrypted_sums(args: &mut ArgumentList, survey: &Survey) {
    args.args
        .push(ArgumentRef::PlaintextU128(args.values_128_bit.len() as u8));
    args.values_128_bit.push(survey.sums_nonce);

    for slot in 0..MAX_PRODUCTS {
        let ciphertext = survey
            .products
            .get(slot)
            .map(|p| p.encrypted_sum)
            .unwrap_or([0u8; 32]);
        args.args
            .push(ArgumentRef::EncryptedU32(args.byte_arrays.len() as u8));
        args.byte_arrays.push(ciphertext);
    }
}

fn build_args_for_ratings(
    encryption_pubkey: [u8; 32],
    ratings_nonce: u128,
    encrypted_ratings: &[Ciphertext],
    survey: &Survey,
) -> ArgumentList {
    let mut args = empty_args();

    args.args
        .push(ArgumentRef::X25519Pubkey(args.byte_arrays.len() as u8));
    args.byte_arrays.push(encryption_pubkey);
    args.args
        .push(ArgumentRef::PlaintextU128(args.values_128_bit.len() as u8));
    args.values_128_bit.push(ratings_nonce);

    for slot in 0..MAX_PRODUCTS {
        let rating = encrypted_ratings.get(slot).copied().unwrap_or([0u8; 32]);
        args.args
            .push(ArgumentRef::EncryptedU8(args.byte_arrays.len() as u8));
        args.byte_arrays.push(rating);
    }

    push_encrypted_sums(&mut args, survey);
    args
}

fn build_args_for_reveal(survey: &Survey, product_index: u8) -> ArgumentList {
    let mut args = empty_args();
    push_encrypted_sums(&mut args, survey);
    args.args
        .push(ArgumentRef::PlaintextU8(args.plaintext_numbers.len() as u8));
    args.plaintext_numbers.push(product_index as u64);
    args
}

/// Instruction Arcium invokes with the computation's output. `accounts`
/// are passed after Arcium's own and must match the callback's
/// `Accounts` struct in order.
fn callback_instruction(discriminator: &[u8], accounts: &[(Pubkey, bool)]) -> CallbackInstruction {
    CallbackInstruction {
        program_id: crate::ID,
        discriminator: discriminator.to_vec(),
        accounts: accounts
            .iter()
            .map(|(pubkey, is_writable)| CallbackAccount {
                pubkey: *pubkey,
                is_writable: *is_writable,
            })
            .collect(),
    }
}

/// True when the transaction's current top-level instruction belongs to
/// Arcium, which is the only way a callback reaches us through the MXE.
fn invoked_by_arcium(instructions: &AccountInfo) -> Result<bool> {
    let current = get_instruction_relative(0, instructions)?;
    Ok(current.program_id == Arcium::id())
}

/// Queues an MXE computation signed by the program's sign PDA
#[allow(clippy::too_many_arguments)]
fn queue_mxe<'info>(
    arcium_program: AccountInfo<'info>,
    accounts: QueueComputation<'info>,
    sign_bump: u8,
    computation_offset: u64,
    comp_def_name: &str,
    args: ArgumentList,
    mxe_program_id: Pubkey,
    callback: CallbackInstruction,
) -> Result<()> {
    let signer_seeds: &[&[&[u8]]] = &[&[SIGN_SEED, &[sign_bump]]];
    let cpi_ctx = CpiContext::new_with_signer(arcium_program, accounts, signer_seeds);

    queue_computation(
        cpi_ctx,
        computation_offset,
        comp_def_offset(comp_def_name),
        None,
        args,
        mxe_program_id,
        vec![callback],
        0,
        0,
        0,
    )?;
    Ok(())
}

// ==================== PROGRAM ====================

#[program]
pub mod product_survey {
    use super::*;

    /// One-time deployment setup. `allow_unsigned_callbacks` must stay
    /// false anywhere a decryption gateway exists.
    pub fn initialize(
        ctx: Context<Initialize>,
        mxe_program_id: Pubkey,
        allow_unsigned_callbacks: bool,
    ) -> Result<()> {
        ctx.accounts.config.initialize(
            ctx.accounts.authority.key(),
            mxe_program_id,
            allow_unsigned_callbacks,
            ctx.bumps.config,
        );
        if allow_unsigned_callbacks {
            msg!("Unsigned decryption callbacks are ENABLED (local deployment)");
        }
        Ok(())
    }

    /// Permanently turn off the local decryption bypass
    pub fn disable_unsigned_callbacks(ctx: Context<DisableUnsignedCallbacks>) -> Result<()> {
        ctx.accounts
            .config
            .disable_unsigned_callbacks(&ctx.accounts.authority.key())?;
        Ok(())
    }

    /// Create a survey and queue initialization of its encrypted sums
    pub fn create_survey(
        ctx: Context<CreateSurvey>,
        computation_offset: u64,
        title: String,
        description: String,
        product_names: Vec<String>,
    ) -> Result<u64> {
        let now = Clock::get()?.unix_timestamp;
        let admin = ctx.accounts.admin.key();
        let survey_id = ctx.accounts.config.allocate_survey_id();

        let survey = &mut ctx.accounts.survey;
        survey.initialize(
            survey_id,
            admin,
            title,
            description,
            product_names,
            now,
            ctx.bumps.survey,
        )?;
        msg!("Creating survey {} with {} products", survey_id, survey.product_count());

        let cpi_accounts = QueueComputation {
            signer: ctx.accounts.admin.to_account_info(),
            sign_seed: ctx.accounts.sign_seed.to_account_info(),
            comp: ctx.accounts.computation_account.to_account_info(),
            mxe: ctx.accounts.mxe_account.to_account_info(),
            mempool: ctx.accounts.mempool_account.to_account_info(),
            executing_pool: ctx.accounts.executing_pool.to_account_info(),
            comp_def_acc: ctx.accounts.comp_def_account.to_account_info(),
            cluster: ctx.accounts.cluster_account.to_account_info(),
            pool_account: ctx.accounts.pool_account.to_account_info(),
            system_program: ctx.accounts.system_program.to_account_info(),
            clock: ctx.accounts.clock_account.to_account_info(),
        };
        queue_mxe(
            ctx.accounts.arcium_program.to_account_info(),
            cpi_accounts,
            ctx.bumps.sign_seed,
            computation_offset,
            INIT_SUMS_COMP,
            empty_args(),
            ctx.accounts.config.mxe_program_id,
            callback_instruction(
                crate::instruction::InitSumsCallback::DISCRIMINATOR,
                &[(ctx.accounts.survey.key(), true)],
            ),
        )?;

        emit!(SurveyCreated {
            survey_id,
            title: ctx.accounts.survey.title.clone(),
            admin,
        });

        Ok(survey_id)
    }

    /// Callback from Arcium with the encrypted zero accumulators
    pub fn init_sums_callback(
        ctx: Context<SumsCallback>,
        encrypted_sums: Vec<[u8; 32]>,
        nonce: u128,
    ) -> Result<()> {
        require!(
            invoked_by_arcium(&ctx.accounts.instructions_sysvar)?,
            SurveyError::BadSignature
        );
        ctx.accounts
            .survey
            .apply_encrypted_sums(&encrypted_sums, nonce)?;
        Ok(())
    }

    /// Submit one encrypted 1-5 rating per product
    pub fn submit_ratings(
        ctx: Context<SubmitRatings>,
        survey_id: u64,
        computation_offset: u64,
        encrypted_ratings: Vec<[u8; 32]>,
        encryption_pubkey: [u8; 32],
        ratings_nonce: u128,
    ) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let user = ctx.accounts.user.key();
        let survey_key = ctx.accounts.survey.key();
        let already_submitted = ctx.accounts.submission.submitted;

        ctx.accounts
            .survey
            .record_submission(already_submitted, encrypted_ratings.len())?;
        ctx.accounts
            .submission
            .record(survey_key, user, now, ctx.bumps.submission);

        let cpi_accounts = QueueComputation {
            signer: ctx.accounts.user.to_account_info(),
            sign_seed: ctx.accounts.sign_seed.to_account_info(),
            comp: ctx.accounts.computation_account.to_account_info(),
            mxe: ctx.accounts.mxe_account.to_account_info(),
            mempool: ctx.accounts.mempool_account.to_account_info(),
            executing_pool: ctx.accounts.executing_pool.to_account_info(),
            comp_def_acc: ctx.accounts.comp_def_account.to_account_info(),
            cluster: ctx.accounts.cluster_account.to_account_info(),
            pool_account: ctx.accounts.pool_account.to_account_info(),
            system_program: ctx.accounts.system_program.to_account_info(),
            clock: ctx.accounts.clock_account.to_account_info(),
        };
        let args = build_args_for_ratings(
            encryption_pubkey,
            ratings_nonce,
            &encrypted_ratings,
            &ctx.accounts.survey,
        );
        queue_mxe(
            ctx.accounts.arcium_program.to_account_info(),
            cpi_accounts,
            ctx.bumps.sign_seed,
            computation_offset,
            ACCUMULATE_RATINGS_COMP,
            args,
            ctx.accounts.config.mxe_program_id,
            callback_instruction(
                crate::instruction::AccumulateRatingsCallback::DISCRIMINATOR,
                &[(survey_key, true)],
            ),
        )?;

        emit!(RatingSubmitted { survey_id, user });

        Ok(())
    }

    /// Callback from Arcium with the updated encrypted sums
    pub fn accumulate_ratings_callback(
        ctx: Context<SumsCallback>,
        encrypted_sums: Vec<[u8; 32]>,
        nonce: u128,
    ) -> Result<()> {
        require!(
            invoked_by_arcium(&ctx.accounts.instructions_sysvar)?,
            SurveyError::BadSignature
        );
        ctx.accounts
            .survey
            .apply_encrypted_sums(&encrypted_sums, nonce)?;
        Ok(())
    }

    /// Close the survey to new ratings
    pub fn end_survey(ctx: Context<EndSurvey>, survey_id: u64) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let survey = &mut ctx.accounts.survey;
        survey.end(&ctx.accounts.admin.key(), now)?;

        emit!(SurveyEnded {
            survey_id,
            total_responses: survey.total_responses,
        });

        Ok(())
    }

    /// Request decryption of one product's sum. Returns the request id,
    /// which is the computation offset the caller picked.
    pub fn finalize_product(
        ctx: Context<FinalizeProduct>,
        survey_id: u64,
        product_index: u8,
        computation_offset: u64,
    ) -> Result<u64> {
        let now = Clock::get()?.unix_timestamp;
        let survey_key = ctx.accounts.survey.key();
        let admin = ctx.accounts.admin.key();

        ctx.accounts
            .survey
            .begin_decryption(&admin, product_index)?;
        ctx.accounts.decryption_request.open(
            computation_offset,
            survey_key,
            survey_id,
            product_index,
            now,
            ctx.bumps.decryption_request,
        );

        let cpi_accounts = QueueComputation {
            signer: ctx.accounts.admin.to_account_info(),
            sign_seed: ctx.accounts.sign_seed.to_account_info(),
            comp: ctx.accounts.computation_account.to_account_info(),
            mxe: ctx.accounts.mxe_account.to_account_info(),
            mempool: ctx.accounts.mempool_account.to_account_info(),
            executing_pool: ctx.accounts.executing_pool.to_account_info(),
            comp_def_acc: ctx.accounts.comp_def_account.to_account_info(),
            cluster: ctx.accounts.cluster_account.to_account_info(),
            pool_account: ctx.accounts.pool_account.to_account_info(),
            system_program: ctx.accounts.system_program.to_account_info(),
            clock: ctx.accounts.clock_account.to_account_info(),
        };
        let args = build_args_for_reveal(&ctx.accounts.survey, product_index);
        queue_mxe(
            ctx.accounts.arcium_program.to_account_info(),
            cpi_accounts,
            ctx.bumps.sign_seed,
            computation_offset,
            REVEAL_SUM_COMP,
            args,
            ctx.accounts.config.mxe_program_id,
            callback_instruction(
                crate::instruction::DecryptionCallback::DISCRIMINATOR,
                &[
                    (ctx.accounts.config.key(), false),
                    (survey_key, true),
                    (ctx.accounts.decryption_request.key(), true),
                ],
            ),
        )?;

        msg!(
            "Decryption requested for survey {} product {} (request {})",
            survey_id,
            product_index,
            computation_offset
        );
        emit!(FinalizeRequested {
            survey_id,
            product_index,
            request_id: computation_offset,
        });

        Ok(computation_offset)
    }

    /// Deliver the revealed sum for a pending request.
    ///
    /// Arcium invokes this as the registered callback of `reveal_sum`.
    /// Local deployments without a gateway may call it directly if the
    /// config allows unsigned callbacks.
    pub fn decryption_callback(
        ctx: Context<DecryptionCallback>,
        request_id: u64,
        cleartext: Vec<u8>,
    ) -> Result<u32> {
        let request_info = &ctx.accounts.decryption_request;
        if request_info.owner != &crate::ID || request_info.data_is_empty() {
            return err!(SurveyError::UnknownRequest);
        }
        let mut request = {
            let data = request_info.try_borrow_data()?;
            DecryptionRequest::try_deserialize(&mut &data[..])
                .map_err(|_| error!(SurveyError::UnknownRequest))?
        };
        require!(
            request.request_id == request_id && request.survey == ctx.accounts.survey.key(),
            SurveyError::UnknownRequest
        );

        let signed_by_mxe = invoked_by_arcium(&ctx.accounts.instructions_sysvar)?;
        ctx.accounts.config.authorize_callback(signed_by_mxe)?;

        let now = Clock::get()?.unix_timestamp;
        let survey = &mut ctx.accounts.survey;
        let decrypted_sum = request.fulfil(survey, &cleartext, now)?;

        {
            let mut data = request_info.try_borrow_mut_data()?;
            let mut writer: &mut [u8] = &mut data[..];
            request.try_serialize(&mut writer)?;
        }

        emit!(SurveyFinalized {
            survey_id: survey.id,
            product_index: request.product_index,
            decrypted_sum,
        });

        Ok(decrypted_sum)
    }

    /// Publish the survey as complete once every product is decrypted
    pub fn mark_survey_fully_finalized(
        ctx: Context<MarkSurveyFullyFinalized>,
        survey_id: u64,
    ) -> Result<()> {
        ctx.accounts
            .survey
            .mark_fully_finalized(&ctx.accounts.admin.key())?;

        emit!(SurveyCompleted { survey_id });

        Ok(())
    }
}

// ==================== ACCOUNT STRUCTURES ====================

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(mut)]
    pub authority: Signer<'info>,

    #[account(
        init,
        payer = authority,
        space = 8 + SurveyConfig::INIT_SPACE,
        seeds = [CONFIG_SEED],
        bump
    )]
    pub config: Account<'info, SurveyConfig>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct DisableUnsignedCallbacks<'info> {
    pub authority: Signer<'info>,

    #[account(
        mut,
        seeds = [CONFIG_SEED],
        bump = config.bump
    )]
    pub config: Account<'info, SurveyConfig>,
}

#[derive(Accounts)]
pub struct CreateSurvey<'info> {
    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [CONFIG_SEED],
        bump = config.bump
    )]
    pub config: Account<'info, SurveyConfig>,

    #[account(
        init,
        payer = admin,
        space = 8 + Survey::INIT_SPACE,
        seeds = [SURVEY_SEED, config.survey_count.to_le_bytes().as_ref()],
        bump
    )]
    pub survey: Account<'info, Survey>,

    /// CHECK: Sign PDA for Arcium CPI
    #[account(
        seeds = [SIGN_SEED],
        bump
    )]
    pub sign_seed: AccountInfo<'info>,

    // Arcium accounts
    pub arcium_program: Program<'info, Arcium>,
    /// CHECK: MXE account
    pub mxe_account: AccountInfo<'info>,
    /// CHECK: Cluster account
    pub cluster_account: AccountInfo<'info>,
    /// CHECK: Fee pool
    pub pool_account: AccountInfo<'info>,
    /// CHECK: Clock account
    pub clock_account: AccountInfo<'info>,
    /// CHECK: Mempool
    pub mempool_account: AccountInfo<'info>,
    /// CHECK: Executing pool
    pub executing_pool: AccountInfo<'info>,
    /// CHECK: Computation account
    #[account(mut)]
    pub computation_account: AccountInfo<'info>,
    /// CHECK: Comp def account
    pub comp_def_account: AccountInfo<'info>,

    pub system_program: Program<'info, System>,
}

/// Shared by `init_sums_callback` and `accumulate_ratings_callback`
#[derive(Accounts)]
pub struct SumsCallback<'info> {
    /// CHECK: address constrained to the Arcium program
    #[account(address = Arcium::id())]
    pub arcium_program: UncheckedAccount<'info>,
    /// CHECK: instructions sysvar, read to find the calling program
    #[account(address = ::anchor_lang::solana_program::sysvar::instructions::ID)]
    pub instructions_sysvar: UncheckedAccount<'info>,

    // Registered callback accounts
    #[account(mut)]
    pub survey: Account<'info, Survey>,
}

#[derive(Accounts)]
#[instruction(survey_id: u64)]
pub struct SubmitRatings<'info> {
    #[account(mut)]
    pub user: Signer<'info>,

    #[account(
        seeds = [CONFIG_SEED],
        bump = config.bump
    )]
    pub config: Account<'info, SurveyConfig>,

    #[account(
        mut,
        seeds = [SURVEY_SEED, survey_id.to_le_bytes().as_ref()],
        bump = survey.bump
    )]
    pub survey: Account<'info, Survey>,

    #[account(
        init_if_needed,
        payer = user,
        space = 8 + SubmissionRecord::INIT_SPACE,
        seeds = [SUBMISSION_SEED, survey.key().as_ref(), user.key().as_ref()],
        bump
    )]
    pub submission: Account<'info, SubmissionRecord>,

    /// CHECK: Sign PDA
    #[account(seeds = [SIGN_SEED], bump)]
    pub sign_seed: AccountInfo<'info>,

    // Arcium accounts (same as CreateSurvey)
    pub arcium_program: Program<'info, Arcium>,
    /// CHECK: MXE account
    pub mxe_account: AccountInfo<'info>,
    /// CHECK: Cluster account
    pub cluster_account: AccountInfo<'info>,
    /// CHECK: Fee pool
    pub pool_account: AccountInfo<'info>,
    /// CHECK: Clock account
    pub clock_account: AccountInfo<'info>,
    /// CHECK: Mempool
    pub mempool_account: AccountInfo<'info>,
    /// CHECK: Executing pool
    pub executing_pool: AccountInfo<'info>,
    /// CHECK: Computation account
    #[account(mut)]
    pub computation_account: AccountInfo<'info>,
    /// CHECK: Comp def account
    pub comp_def_account: AccountInfo<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(survey_id: u64)]
pub struct EndSurvey<'info> {
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [SURVEY_SEED, survey_id.to_le_bytes().as_ref()],
        bump = survey.bump
    )]
    pub survey: Account<'info, Survey>,
}

#[derive(Accounts)]
#[instruction(survey_id: u64, product_index: u8, computation_offset: u64)]
pub struct FinalizeProduct<'info> {
    #[account(mut)]
    pub admin: Signer<'info>,

    #[account(
        seeds = [CONFIG_SEED],
        bump = config.bump
    )]
    pub config: Account<'info, SurveyConfig>,

    #[account(
        mut,
        seeds = [SURVEY_SEED, survey_id.to_le_bytes().as_ref()],
        bump = survey.bump
    )]
    pub survey: Account<'info, Survey>,

    #[account(
        init,
        payer = admin,
        space = 8 + DecryptionRequest::INIT_SPACE,
        seeds = [REQUEST_SEED, computation_offset.to_le_bytes().as_ref()],
        bump
    )]
    pub decryption_request: Account<'info, DecryptionRequest>,

    /// CHECK: Sign PDA
    #[account(seeds = [SIGN_SEED], bump)]
    pub sign_seed: AccountInfo<'info>,

    // Arcium accounts
    pub arcium_program: Program<'info, Arcium>,
    /// CHECK: MXE account
    pub mxe_account: AccountInfo<'info>,
    /// CHECK: Cluster account
    pub cluster_account: AccountInfo<'info>,
    /// CHECK: Fee pool
    pub pool_account: AccountInfo<'info>,
    /// CHECK: Clock account
    pub clock_account: AccountInfo<'info>,
    /// CHECK: Mempool
    pub mempool_account: AccountInfo<'info>,
    /// CHECK: Executing pool
    pub executing_pool: AccountInfo<'info>,
    /// CHECK: Computation account
    #[account(mut)]
    pub computation_account: AccountInfo<'info>,
    /// CHECK: Comp def account
    pub comp_def_account: AccountInfo<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(request_id: u64)]
pub struct DecryptionCallback<'info> {
    /// CHECK: address constrained to the Arcium program
    #[account(address = Arcium::id())]
    pub arcium_program: UncheckedAccount<'info>,
    /// CHECK: instructions sysvar, read to find the calling program
    #[account(address = ::anchor_lang::solana_program::sysvar::instructions::ID)]
    pub instructions_sysvar: UncheckedAccount<'info>,

    // Registered callback accounts
    #[account(
        seeds = [CONFIG_SEED],
        bump = config.bump
    )]
    pub config: Account<'info, SurveyConfig>,

    #[account(mut)]
    pub survey: Account<'info, Survey>,

    /// CHECK: deserialized in the handler so a missing request maps to
    /// `UnknownRequest` instead of a generic account error
    #[account(
        mut,
        seeds = [REQUEST_SEED, request_id.to_le_bytes().as_ref()],
        bump
    )]
    pub decryption_request: UncheckedAccount<'info>,
}

#[derive(Accounts)]
#[instruction(survey_id: u64)]
pub struct MarkSurveyFullyFinalized<'info> {
    pub admin: Signer<'info>,

    #[account(
        mut,
        seeds = [SURVEY_SEED, survey_id.to_le_bytes().as_ref()],
        bump = survey.bump
    )]
    pub survey: Account<'info, Survey>,
}
