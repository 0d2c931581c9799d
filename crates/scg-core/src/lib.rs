//! # scg-core
//!
//! Core types for LLM-driven Anchor contract generation.
//!
//! - [`ContractSpec`]: the structured description a contract is generated from
//! - [`ProgramId`]: validated on-chain program address, plus helpers that find
//!   and rewrite `declare_id!` in generated source

pub mod contract;
pub mod error;
pub mod program_id;

pub use contract::{ContractKind, ContractSpec};
pub use error::CoreError;
pub use program_id::{
    extract_declared_id, extract_from_cli_output, replace_declared_id, ProgramId,
    PLACEHOLDER_PROGRAM_ID,
};
