//! Structured contract descriptions.
//!
//! A [`ContractSpec`] is what the user hands the generator: a contract kind,
//! a display name, and free-form parameters (parties, amounts, deadlines...)
//! that are forwarded verbatim to the model as JSON.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// The family of contract being generated.
///
/// Known kinds select a reference template; anything else is `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContractKind {
    Escrow,
    TokenVesting,
    Crowdfunding,
    Custom(String),
}

impl ContractKind {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &str {
        match self {
            ContractKind::Escrow => "escrow",
            ContractKind::TokenVesting => "token_vesting",
            ContractKind::Crowdfunding => "crowdfunding",
            ContractKind::Custom(name) => name,
        }
    }

    /// Rust module identifier for the `#[program]` module.
    pub fn module_name(&self) -> String {
        to_snake_case(self.as_str()).unwrap_or_else(|| "contract".to_string())
    }

    /// All kinds that ship with a reference template.
    pub fn known() -> [ContractKind; 3] {
        [
            ContractKind::Escrow,
            ContractKind::TokenVesting,
            ContractKind::Crowdfunding,
        ]
    }
}

impl FromStr for ContractKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Ok(match normalized.as_str() {
            "escrow" => ContractKind::Escrow,
            "token_vesting" | "vesting" | "tokenvesting" => ContractKind::TokenVesting,
            "crowdfunding" | "fundraising" | "crowd_funding" => ContractKind::Crowdfunding,
            _ => ContractKind::Custom(normalized),
        })
    }
}

impl From<String> for ContractKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<ContractKind> for String {
    fn from(kind: ContractKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of the contract to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    #[serde(rename = "contract_type")]
    pub kind: ContractKind,
    #[serde(rename = "contract_name", default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ContractSpec {
    /// Spec with no parameters, named after its kind.
    pub fn new(kind: ContractKind) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            parameters: Map::new(),
        }
    }

    /// Parse a full spec from JSON text.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let mut spec: ContractSpec = serde_json::from_str(json)?;
        spec.fill_defaults();
        Ok(spec)
    }

    /// Load a schema file.
    ///
    /// The file may either be a full spec (with `contract_type`) or a bare
    /// parameter object; in the latter case `fallback` supplies the kind.
    pub fn from_file(path: &Path, fallback: ContractKind) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text)?;
        Self::from_value(value, fallback)
    }

    /// Build a spec from an already-parsed JSON value.
    pub fn from_value(value: Value, fallback: ContractKind) -> Result<Self, CoreError> {
        let is_full_spec = value
            .as_object()
            .map(|obj| obj.contains_key("contract_type"))
            .unwrap_or(false);

        if is_full_spec {
            let mut spec: ContractSpec = serde_json::from_value(value)?;
            spec.fill_defaults();
            return Ok(spec);
        }

        let mut spec = ContractSpec::new(fallback);
        match value {
            Value::Object(parameters) => spec.parameters = parameters,
            Value::Null => {}
            other => {
                spec.parameters.insert("value".to_string(), other);
            }
        }
        Ok(spec)
    }

    /// Snake-case identifier for the generated `#[program]` module.
    pub fn program_module(&self) -> String {
        to_snake_case(&self.name).unwrap_or_else(|| self.kind.module_name())
    }

    /// Pretty JSON embedded in prompts.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    fn fill_defaults(&mut self) {
        if self.name.trim().is_empty() {
            self.name = self.kind.as_str().to_string();
        }
    }
}

/// Lowercase snake-case identifier, or `None` if nothing alphanumeric remains.
fn to_snake_case(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut prev_lower = false;

    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c.to_ascii_lowercase());
        } else {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return Some(format!("c_{}", trimmed));
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Escrow".parse::<ContractKind>().unwrap(), ContractKind::Escrow);
        assert_eq!("vesting".parse::<ContractKind>().unwrap(), ContractKind::TokenVesting);
        assert_eq!("token-vesting".parse::<ContractKind>().unwrap(), ContractKind::TokenVesting);
        assert_eq!("fundraising".parse::<ContractKind>().unwrap(), ContractKind::Crowdfunding);
        assert_eq!(
            "Supply Chain".parse::<ContractKind>().unwrap(),
            ContractKind::Custom("supply_chain".to_string())
        );
    }

    #[test]
    fn test_parse_full_spec() {
        let spec = ContractSpec::parse(
            r#"{
                "contract_type": "escrow",
                "contract_name": "Freelance Escrow",
                "parameters": { "amount": "1000 SOL", "buyer": "UserA" }
            }"#,
        )
        .unwrap();

        assert_eq!(spec.kind, ContractKind::Escrow);
        assert_eq!(spec.name, "Freelance Escrow");
        assert_eq!(spec.parameters["buyer"], "UserA");
        assert_eq!(spec.program_module(), "freelance_escrow");
    }

    #[test]
    fn test_bare_parameters_use_fallback_kind() {
        let value = serde_json::json!({ "cliff_days": 30, "total": 1_000_000 });
        let spec = ContractSpec::from_value(value, ContractKind::TokenVesting).unwrap();

        assert_eq!(spec.kind, ContractKind::TokenVesting);
        assert_eq!(spec.name, "token_vesting");
        assert_eq!(spec.parameters["cliff_days"], 30);
    }

    #[test]
    fn test_missing_name_defaults_to_kind() {
        let spec = ContractSpec::parse(r#"{ "contract_type": "crowdfunding" }"#).unwrap();
        assert_eq!(spec.name, "crowdfunding");
        assert!(spec.parameters.is_empty());
    }

    #[test]
    fn test_program_module_follows_name() {
        let spec = ContractSpec::new(ContractKind::Crowdfunding);
        assert_eq!(spec.name, "crowdfunding");

        let mut named = ContractSpec::new(ContractKind::Escrow);
        named.name = "MyDeal".to_string();
        assert_eq!(named.program_module(), "my_deal");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"{ "beneficiary": "Alice" }"#).unwrap();

        let spec = ContractSpec::from_file(&path, ContractKind::Escrow).unwrap();
        assert_eq!(spec.kind, ContractKind::Escrow);
        assert_eq!(spec.parameters["beneficiary"], "Alice");

        let missing = ContractSpec::from_file(&dir.path().join("nope.json"), ContractKind::Escrow);
        assert!(matches!(missing, Err(CoreError::Read { .. })));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("TokenVesting").as_deref(), Some("token_vesting"));
        assert_eq!(to_snake_case("  a--b  ").as_deref(), Some("a_b"));
        assert_eq!(to_snake_case("2024 deal").as_deref(), Some("c_2024_deal"));
        assert_eq!(to_snake_case("!!!"), None);
    }
}
