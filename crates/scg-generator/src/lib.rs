//! # scg-generator
//!
//! LLM-driven generation of Solana Anchor programs, verified by building them.
//!
//! ## Build Loop
//!
//! 1. **Generate**: prompt the model with the contract description and a
//!    known-good reference program
//! 2. **Check**: parse with `syn`, then run `anchor build`
//! 3. **Repair**: classify the failure; apply a deterministic patch when one
//!    exists, otherwise ask the model to fix the code with targeted guidance
//! 4. **Resolve**: on success, sync `declare_id!` with the deploy keypair
//!
//! # Usage
//!
//! ```bash
//! # Generate, build and fix an escrow contract
//! cargo run -p scg-generator -- buildloop --type escrow --schema escrow.json
//!
//! # Build what is already in the workspace, fixing failures
//! cargo run -p scg-generator -- build
//!
//! # With a specific model
//! SCG_MODEL=claude-sonnet-4-20250514 cargo run -p scg-generator -- buildloop --type vesting
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Contract   │ ──> │   Prompt    │ ──> │     LLM     │
//! │    Spec     │     │  + Template │     │     API     │
//! └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                │
//!                     ┌──────────────────────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │  lib.rs in  │
//!              │  workspace  │
//!              └──────┬──────┘
//!                     ▼
//!              ┌─────────────┐   (passes)   ┌─────────────┐
//!              │ syn + anchor│ ───────────> │ Program ID  │
//!              │    build    │              │  resolution │
//!              └──────┬──────┘              └─────────────┘
//!                 (fails)
//!                     ▼
//!              ┌─────────────┐
//!              │  Classify   │
//!              └──────┬──────┘
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   ┌─────────────┐       ┌─────────────┐
//!   │    Patch    │       │ Fix Prompt  │
//!   │ (no model)  │       │  + hints    │
//!   └─────────────┘       └─────────────┘
//! ```

pub mod client;
pub mod config;
pub mod generator;
pub mod prompt;
pub mod store;
pub mod templates;
pub mod writer;

pub use client::{ClientConfig, ClientError, CompletionModel, LlmClient, Message, Provider, Role};
pub use config::{AppConfig, ConfigError};
pub use generator::{
    AttemptAction, AttemptRecord, CodeGenerator, GeneratorConfig, GeneratorError, GeneratorResult,
    Workspace,
};
pub use prompt::{extract_code_block, PromptBuilder};
pub use store::{ContractRecord, ContractStatus, ContractStore, StoreError};
pub use templates::Template;
pub use writer::{FileWriter, WriteOutcome};
