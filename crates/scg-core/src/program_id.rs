//! Program ID parsing and `declare_id!` rewriting.
//!
//! Program IDs turn up in three places: the `declare_id!` macro inside
//! generated source, `Program Id: ...` lines printed by `anchor deploy`, and
//! `name: ID` lines printed by `anchor keys list`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// System program address, used as a stand-in until a real keypair exists.
pub const PLACEHOLDER_PROGRAM_ID: &str = "11111111111111111111111111111111";

const BASE58_CLASS: &str = "[1-9A-HJ-NP-Za-km-z]";

/// A validated base58 program address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProgramId(String);

impl ProgramId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The system-program placeholder.
    pub fn placeholder() -> Self {
        Self(PLACEHOLDER_PROGRAM_ID.to_string())
    }

    pub fn is_placeholder(&self) -> bool {
        self.0 == PLACEHOLDER_PROGRAM_ID
    }
}

impl FromStr for ProgramId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if address_regex().is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(CoreError::InvalidProgramId(s.to_string()))
        }
    }
}

impl TryFrom<String> for ProgramId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProgramId> for String {
    fn from(id: ProgramId) -> Self {
        id.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!("^{BASE58_CLASS}{{32,44}}$")).unwrap())
}

fn declare_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r#"declare_id!\(\s*"({BASE58_CLASS}{{32,44}})"\s*\)"#)).unwrap()
    })
}

fn any_declare_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"declare_id!\(\s*"[^"]*"\s*\)"#).unwrap())
}

fn cli_program_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?im)^\s*program\s+id:\s*({BASE58_CLASS}{{32,44}})\s*$")).unwrap()
    })
}

fn keys_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?m)^\s*[A-Za-z0-9_\-]+:\s*({BASE58_CLASS}{{32,44}})\s*$")).unwrap()
    })
}

/// Find the program ID passed to `declare_id!` in Rust source.
pub fn extract_declared_id(code: &str) -> Option<ProgramId> {
    declare_id_regex()
        .captures(code)
        .map(|caps| ProgramId(caps[1].to_string()))
}

/// Find a program ID in toolchain output.
///
/// `Program Id: X` lines take precedence over `anchor keys list` lines.
pub fn extract_from_cli_output(output: &str) -> Option<ProgramId> {
    cli_program_id_regex()
        .captures_iter(output)
        .last()
        .or_else(|| keys_list_regex().captures(output))
        .map(|caps| ProgramId(caps[1].to_string()))
}

/// Point `declare_id!` at `id`.
///
/// Replaces every existing `declare_id!` argument. When the source has none,
/// one is inserted after the first `use anchor_lang` line (or at the top).
pub fn replace_declared_id(code: &str, id: &ProgramId) -> String {
    let replacement = format!("declare_id!(\"{}\")", id);

    if any_declare_id_regex().is_match(code) {
        return any_declare_id_regex()
            .replace_all(code, regex::NoExpand(&replacement))
            .into_owned();
    }

    let statement = format!("{};", replacement);
    let mut lines: Vec<&str> = code.lines().collect();
    let insert_at = lines
        .iter()
        .position(|l| l.trim_start().starts_with("use anchor_lang"))
        .map(|i| i + 1)
        .unwrap_or(0);

    lines.insert(insert_at, "");
    lines.insert(insert_at + 1, &statement);

    let mut out = lines.join("\n");
    if code.ends_with('\n') {
        out.push('\n');
    }
    out
}
