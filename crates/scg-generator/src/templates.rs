//! Reference Anchor programs embedded in the binary.
//!
//! Each template is a complete program that builds with Anchor 0.30. They
//! are shown to the model as structural examples, never written to disk.

use scg_core::ContractKind;

/// A known-good reference program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Kind name (`escrow`, `token_vesting`, ...)
    pub name: &'static str,
    pub source: &'static str,
}

const ESCROW: Template = Template {
    name: "escrow",
    source: include_str!("../templates/escrow.rs"),
};

const TOKEN_VESTING: Template = Template {
    name: "token_vesting",
    source: include_str!("../templates/token_vesting.rs"),
};

const CROWDFUNDING: Template = Template {
    name: "crowdfunding",
    source: include_str!("../templates/crowdfunding.rs"),
};

/// Template for `kind`. Custom kinds get the escrow program as a structural example.
pub fn for_kind(kind: &ContractKind) -> &'static Template {
    match kind {
        ContractKind::Escrow | ContractKind::Custom(_) => &ESCROW,
        ContractKind::TokenVesting => &TOKEN_VESTING,
        ContractKind::Crowdfunding => &CROWDFUNDING,
    }
}

/// All embedded templates.
pub fn catalog() -> [&'static Template; 3] {
    [&ESCROW, &TOKEN_VESTING, &CROWDFUNDING]
}
