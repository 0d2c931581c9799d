use anchor_lang::prelude::*;

declare_id!("11111111111111111111111111111111");

#[program]
pub mod token_vesting {
    use super::*;

    pub fn create_schedule(
        ctx: Context<CreateSchedule>,
        total_amount: u64,
        start_time: i64,
        cliff_seconds: i64,
        duration_seconds: i64,
    ) -> Result<()> {
        require!(total_amount > 0, VestingError::InvalidAmount);
        require!(duration_seconds > 0, VestingError::InvalidDuration);
        require!(cliff_seconds <= duration_seconds, VestingError::InvalidDuration);

        let schedule = &mut ctx.accounts.schedule;
        schedule.grantor = ctx.accounts.grantor.key();
        schedule.beneficiary = ctx.accounts.beneficiary.key();
        schedule.total_amount = total_amount;
        schedule.withdrawn = 0;
        schedule.start_time = start_time;
        schedule.cliff_seconds = cliff_seconds;
        schedule.duration_seconds = duration_seconds;
        schedule.bump = ctx.bumps.schedule;
        Ok(())
    }

    pub fn withdraw(ctx: Context<Withdraw>) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let schedule = &ctx.accounts.schedule;

        let vested = schedule.vested_amount(now)?;
        let available = vested
            .checked_sub(schedule.withdrawn)
            .ok_or(VestingError::Overflow)?;
        require!(available > 0, VestingError::NothingToWithdraw);

        let schedule_info = ctx.accounts.schedule.to_account_info();
        let beneficiary_info = ctx.accounts.beneficiary.to_account_info();
        **schedule_info.try_borrow_mut_lamports()? = schedule_info
            .lamports()
            .checked_sub(available)
            .ok_or(VestingError::Overflow)?;
        **beneficiary_info.try_borrow_mut_lamports()? = beneficiary_info
            .lamports()
            .checked_add(available)
            .ok_or(VestingError::Overflow)?;

        let schedule = &mut ctx.accounts.schedule;
        schedule.withdrawn = schedule
            .withdrawn
            .checked_add(available)
            .ok_or(VestingError::Overflow)?;
        Ok(())
    }
}

#[derive(Accounts)]
pub struct CreateSchedule<'info> {
    #[account(
        init,
        payer = grantor,
        space = 8 + VestingSchedule::INIT_SPACE,
        seeds = [b"vesting", beneficiary.key().as_ref()],
        bump
    )]
    pub schedule: Box<Account<'info, VestingSchedule>>,
    #[account(mut)]
    pub grantor: Signer<'info>,
    /// CHECK: only receives vested lamports
    pub beneficiary: UncheckedAccount<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    #[account(
        mut,
        seeds = [b"vesting", beneficiary.key().as_ref()],
        bump = schedule.bump,
        has_one = beneficiary
    )]
    pub schedule: Box<Account<'info, VestingSchedule>>,
    #[account(mut)]
    pub beneficiary: Signer<'info>,
}

#[account]
#[derive(InitSpace)]
pub struct VestingSchedule {
    pub grantor: Pubkey,
    pub beneficiary: Pubkey,
    pub total_amount: u64,
    pub withdrawn: u64,
    pub start_time: i64,
    pub cliff_seconds: i64,
    pub duration_seconds: i64,
    pub bump: u8,
}

impl VestingSchedule {
    pub fn vested_amount(&self, now: i64) -> Result<u64> {
        let elapsed = now.saturating_sub(self.start_time);
        if elapsed < self.cliff_seconds {
            return Ok(0);
        }
        if elapsed >= self.duration_seconds {
            return Ok(self.total_amount);
        }

        let vested = (self.total_amount as u128)
            .checked_mul(elapsed as u128)
            .and_then(|v| v.checked_div(self.duration_seconds as u128))
            .ok_or(VestingError::Overflow)?;
        Ok(vested as u64)
    }
}

#[error_code]
pub enum VestingError {
    #[msg("Amount must be greater than zero")]
    InvalidAmount,
    #[msg("Duration must be positive and not shorter than the cliff")]
    InvalidDuration,
    #[msg("Nothing has vested yet")]
    NothingToWithdraw,
    #[msg("Arithmetic overflow")]
    Overflow,
}
