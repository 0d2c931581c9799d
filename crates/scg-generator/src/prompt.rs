//! Prompt assembly for Anchor program generation.
//!
//! Prompts carry the contract description, a reference program, and on
//! retries the classified build failure. Known failure classes contribute
//! their targeted guidance; everything else is passed through as compiler
//! output.

use scg_build::{BuildResult, Diagnosis};
use scg_core::{ContractKind, ContractSpec, ProgramId};

use crate::templates::Template;

/// Maximum compiler output lines included in a fix prompt.
const MAX_ERROR_LINES: usize = 40;

/// Builds generation, fix and update prompts.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the initial generation prompt.
    pub fn build_generation_prompt(
        spec: &ContractSpec,
        program_id: &ProgramId,
        template: Option<&Template>,
    ) -> String {
        let reference = match template {
            Some(t) => format!(
                r#"## REFERENCE PROGRAM ({name})

This program builds cleanly. Follow its structure and conventions, not its business logic.

```rust
{source}
```
"#,
                name = t.name,
                source = t.source.trim_end(),
            ),
            None => String::new(),
        };

        format!(
            r#"Generate a complete Solana smart contract using the Anchor framework.

## CONTRACT

Type: {kind}
Name: {name}

## PARAMETERS

```json
{parameters}
```

## PROGRAM ID

Use exactly `declare_id!("{program_id}");`

{reference}
## RULES

1. The `#[program]` module must be named `{module}`
2. Validate every instruction input and return custom `#[error_code]` errors
3. Use checked arithmetic for all lamport and token amounts
4. Derive PDAs with explicit seeds and store the bump
5. Only depend on `anchor_lang` (and `anchor_spl` for token accounts)

Return ONLY the Rust code for `lib.rs` in a ```rust code block."#,
            kind = spec.kind,
            name = spec.name,
            parameters = spec.to_pretty_json(),
            program_id = program_id,
            reference = reference,
            module = spec.program_module(),
        )
    }

    /// Build a fix prompt from a failed build.
    pub fn build_fix_prompt(
        spec: &ContractSpec,
        previous_code: &str,
        result: &BuildResult,
        diagnoses: &[Diagnosis],
    ) -> String {
        format!(
            r#"Your Anchor program for the {kind} contract "{name}" failed to build.

## PREVIOUS CODE

```rust
{previous_code}
```

## BUILD FAILURE

{failure}

## DIAGNOSIS

{diagnosis}

## TASK

Fix every error above while keeping all existing instructions and the existing `declare_id!`.

Return ONLY the fixed Rust code in a ```rust code block."#,
            kind = spec.kind,
            name = spec.name,
            previous_code = previous_code.trim_end(),
            failure = Self::format_build_failure(result),
            diagnosis = Self::format_diagnoses(diagnoses),
        )
    }

    /// Build a prompt that modifies an existing program.
    pub fn build_update_prompt(
        kind: &ContractKind,
        code: &str,
        requirements: &str,
        program_id: &ProgramId,
    ) -> String {
        format!(
            r#"Update the following {kind} Anchor program.

## CURRENT CODE

```rust
{code}
```

## REQUIREMENTS

{requirements}

## RULES

1. Keep `declare_id!("{program_id}");` unchanged
2. Keep existing instructions working unless the requirements say otherwise
3. Use checked arithmetic and custom `#[error_code]` errors for new logic

Return ONLY the complete updated Rust code in a ```rust code block."#,
            kind = kind,
            code = code.trim_end(),
            requirements = requirements.trim(),
            program_id = program_id,
        )
    }

    /// System prompt shared by every request.
    pub fn system_prompt() -> &'static str {
        r#"You are an expert Solana developer writing Anchor (0.29+) programs in Rust.

Conventions:
- `use anchor_lang::prelude::*;` and one `declare_id!` at the top
- Instructions live in a `#[program]` module and return `Result<()>`
- Account validation uses `#[derive(Accounts)]` structs with `'info` lifetimes
- State structs use `#[account]` and `#[derive(InitSpace)]`; errors use `#[error_code]`
- Read bumps from `ctx.bumps.<name>`
- Wrap large accounts as `Box<Account<'info, T>>` to stay inside the 4KB stack frame
- Use `checked_add`/`checked_sub` with `.ok_or(...)?`; never apply `?` to values that are not `Result`
- Copy keys and amounts into locals before taking `&mut` borrows

Return ONLY Rust code in a ```rust code block."#
    }

    fn format_build_failure(result: &BuildResult) -> String {
        let mut info = format!("**Stage**: {}\n", result.stage);

        if let Some(ref error) = result.error {
            info.push_str(&format!("\n**Error**: {}\n", error));
        }

        let lines = result.error_lines(MAX_ERROR_LINES);
        if !lines.is_empty() {
            info.push_str(&format!(
                "\n**Compiler output**:\n```\n{}\n```\n",
                lines.join("\n")
            ));
        }

        info
    }

    fn format_diagnoses(diagnoses: &[Diagnosis]) -> String {
        if diagnoses.is_empty() {
            return "No known failure pattern matched; fix the compiler errors shown above.".to_string();
        }

        diagnoses
            .iter()
            .map(|d| format!("- **{}**: {}", d.class, d.class.hint()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extract code from a model response.
///
/// Takes the first ```` ```rust ```` block, then the first bare fenced block,
/// then the whole response if it looks like Rust. An unterminated fence (a
/// response cut off at the token limit) yields everything after the opener.
pub fn extract_code_block(response: &str) -> Option<String> {
    if response.trim().is_empty() {
        return None;
    }

    if let Some(code) = fenced(response, "```rust") {
        return Some(code);
    }
    if let Some(code) = fenced(response, "```") {
        return Some(code);
    }

    let trimmed = response.trim();
    (trimmed.contains("use ") || trimmed.contains("fn ")).then(|| trimmed.to_string())
}

fn fenced(response: &str, opener: &str) -> Option<String> {
    let start = response.find(opener)? + opener.len();
    let rest = &response[start..];
    // Skip the remainder of the info-string line
    let body = &rest[rest.find('\n')? + 1..];
    let end = body.find("```").unwrap_or(body.len());
    let code = body[..end].trim();

    (!code.is_empty()).then(|| code.to_string())
}
