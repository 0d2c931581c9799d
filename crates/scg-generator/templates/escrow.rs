use anchor_lang::prelude::*;
use anchor_lang::system_program::{transfer, Transfer};

declare_id!("11111111111111111111111111111111");

#[program]
pub mod escrow {
    use super::*;

    pub fn initialize(ctx: Context<Initialize>, amount: u64, release_after: i64) -> Result<()> {
        require!(amount > 0, EscrowError::InvalidAmount);

        let escrow = &mut ctx.accounts.escrow;
        escrow.depositor = ctx.accounts.depositor.key();
        escrow.beneficiary = ctx.accounts.beneficiary.key();
        escrow.amount = amount;
        escrow.release_after = release_after;
        escrow.released = false;
        escrow.bump = ctx.bumps.escrow;

        transfer(
            CpiContext::new(
                ctx.accounts.system_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.depositor.to_account_info(),
                    to: ctx.accounts.escrow.to_account_info(),
                },
            ),
            amount,
        )
    }

    pub fn release(ctx: Context<Release>) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let amount = ctx.accounts.escrow.amount;

        require!(!ctx.accounts.escrow.released, EscrowError::AlreadyReleased);
        require!(now >= ctx.accounts.escrow.release_after, EscrowError::TooEarly);

        let escrow_info = ctx.accounts.escrow.to_account_info();
        let beneficiary_info = ctx.accounts.beneficiary.to_account_info();

        **escrow_info.try_borrow_mut_lamports()? = escrow_info
            .lamports()
            .checked_sub(amount)
            .ok_or(EscrowError::Overflow)?;
        **beneficiary_info.try_borrow_mut_lamports()? = beneficiary_info
            .lamports()
            .checked_add(amount)
            .ok_or(EscrowError::Overflow)?;

        ctx.accounts.escrow.released = true;
        Ok(())
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(
        init,
        payer = depositor,
        space = 8 + EscrowAccount::INIT_SPACE,
        seeds = [b"escrow", depositor.key().as_ref(), beneficiary.key().as_ref()],
        bump
    )]
    pub escrow: Box<Account<'info, EscrowAccount>>,
    #[account(mut)]
    pub depositor: Signer<'info>,
    /// CHECK: only receives lamports
    pub beneficiary: UncheckedAccount<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Release<'info> {
    #[account(
        mut,
        seeds = [b"escrow", escrow.depositor.as_ref(), beneficiary.key().as_ref()],
        bump = escrow.bump,
        has_one = beneficiary
    )]
    pub escrow: Box<Account<'info, EscrowAccount>>,
    /// CHECK: matched against escrow.beneficiary
    #[account(mut)]
    pub beneficiary: UncheckedAccount<'info>,
    pub authority: Signer<'info>,
}

#[account]
#[derive(InitSpace)]
pub struct EscrowAccount {
    pub depositor: Pubkey,
    pub beneficiary: Pubkey,
    pub amount: u64,
    pub release_after: i64,
    pub released: bool,
    pub bump: u8,
}

#[error_code]
pub enum EscrowError {
    #[msg("Amount must be greater than zero")]
    InvalidAmount,
    #[msg("Escrow has already been released")]
    AlreadyReleased,
    #[msg("Release time has not been reached")]
    TooEarly,
    #[msg("Arithmetic overflow")]
    Overflow,
}
