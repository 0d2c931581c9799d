use anchor_lang::prelude::*;
use anchor_lang::system_program::{transfer, Transfer};

declare_id!("11111111111111111111111111111111");

#[program]
pub mod crowdfunding {
    use super::*;

    pub fn create_campaign(ctx: Context<CreateCampaign>, goal: u64, deadline: i64) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        require!(goal > 0, CrowdfundingError::InvalidGoal);
        require!(deadline > now, CrowdfundingError::InvalidDeadline);

        let campaign = &mut ctx.accounts.campaign;
        campaign.creator = ctx.accounts.creator.key();
        campaign.goal = goal;
        campaign.raised = 0;
        campaign.deadline = deadline;
        campaign.claimed = false;
        campaign.bump = ctx.bumps.campaign;
        Ok(())
    }

    pub fn contribute(ctx: Context<Contribute>, amount: u64) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        require!(amount > 0, CrowdfundingError::InvalidAmount);
        require!(now < ctx.accounts.campaign.deadline, CrowdfundingError::CampaignEnded);

        transfer(
            CpiContext::new(
                ctx.accounts.system_program.to_account_info(),
                Transfer {
                    from: ctx.accounts.contributor.to_account_info(),
                    to: ctx.accounts.campaign.to_account_info(),
                },
            ),
            amount,
        )?;

        let campaign = &mut ctx.accounts.campaign;
        campaign.raised = campaign
            .raised
            .checked_add(amount)
            .ok_or(CrowdfundingError::Overflow)?;
        Ok(())
    }

    pub fn claim(ctx: Context<Claim>) -> Result<()> {
        let now = Clock::get()?.unix_timestamp;
        let raised = ctx.accounts.campaign.raised;

        require!(now >= ctx.accounts.campaign.deadline, CrowdfundingError::CampaignActive);
        require!(raised >= ctx.accounts.campaign.goal, CrowdfundingError::GoalNotReached);
        require!(!ctx.accounts.campaign.claimed, CrowdfundingError::AlreadyClaimed);

        let campaign_info = ctx.accounts.campaign.to_account_info();
        let creator_info = ctx.accounts.creator.to_account_info();
        **campaign_info.try_borrow_mut_lamports()? = campaign_info
            .lamports()
            .checked_sub(raised)
            .ok_or(CrowdfundingError::Overflow)?;
        **creator_info.try_borrow_mut_lamports()? = creator_info
            .lamports()
            .checked_add(raised)
            .ok_or(CrowdfundingError::Overflow)?;

        ctx.accounts.campaign.claimed = true;
        Ok(())
    }
}

#[derive(Accounts)]
pub struct CreateCampaign<'info> {
    #[account(
        init,
        payer = creator,
        space = 8 + Campaign::INIT_SPACE,
        seeds = [b"campaign", creator.key().as_ref()],
        bump
    )]
    pub campaign: Box<Account<'info, Campaign>>,
    #[account(mut)]
    pub creator: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Contribute<'info> {
    #[account(mut, seeds = [b"campaign", campaign.creator.as_ref()], bump = campaign.bump)]
    pub campaign: Box<Account<'info, Campaign>>,
    #[account(mut)]
    pub contributor: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Claim<'info> {
    #[account(
        mut,
        seeds = [b"campaign", creator.key().as_ref()],
        bump = campaign.bump,
        has_one = creator
    )]
    pub campaign: Box<Account<'info, Campaign>>,
    #[account(mut)]
    pub creator: Signer<'info>,
}

#[account]
#[derive(InitSpace)]
pub struct Campaign {
    pub creator: Pubkey,
    pub goal: u64,
    pub raised: u64,
    pub deadline: i64,
    pub claimed: bool,
    pub bump: u8,
}

#[error_code]
pub enum CrowdfundingError {
    #[msg("Goal must be greater than zero")]
    InvalidGoal,
    #[msg("Deadline must be in the future")]
    InvalidDeadline,
    #[msg("Contribution must be greater than zero")]
    InvalidAmount,
    #[msg("Campaign has ended")]
    CampaignEnded,
    #[msg("Campaign is still running")]
    CampaignActive,
    #[msg("Funding goal was not reached")]
    GoalNotReached,
    #[msg("Funds already claimed")]
    AlreadyClaimed,
    #[msg("Arithmetic overflow")]
    Overflow,
}
