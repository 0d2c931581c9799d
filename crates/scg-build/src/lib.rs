//! # scg-build
//!
//! Everything that touches the Solana/Anchor toolchain.
//!
//! The generator checks code in order of cost (cheapest first):
//!
//! | Stage | Tool | Time | Catches |
//! |-------|------|------|---------|
//! | syntax | syn | instant | Truncated or malformed model output |
//! | build | `anchor build` / `cargo build-sbf` | minutes | Type, borrow, macro and IDL errors |
//!
//! A failed build is classified ([`classify`]) and, where a known signature
//! has a mechanical fix, patched ([`patch`]) before the model is asked again.

pub mod classify;
pub mod deploy;
pub mod error;
pub mod keys;
pub mod patch;
pub mod result;
pub mod runner;

pub use classify::{classify, Diagnosis, ErrorClass};
pub use deploy::{program_id_from_keypair, DeployCommand, DeployResult, DeployRunner};
pub use error::BuildError;
pub use keys::KeyResolver;
pub use patch::{Patch, ProjectFiles};
pub use result::BuildResult;
pub use runner::{syntax_check, BuildTool, CommandBuilder, ProgramBuilder};
