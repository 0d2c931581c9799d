//! Build failure classification.
//!
//! Matches known failure signatures in toolchain output. Classes with a
//! mechanical fix are handled by [`crate::patch`]; the rest are turned into
//! targeted guidance in the next prompt.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Known failure signatures, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// SBF stack frame exceeded (large accounts held on the stack)
    StackOverflow,
    /// Anchor >= 0.30 requires the `idl-build` feature in the program manifest
    MissingIdlBuild,
    /// `declare_id!` does not match the deploy keypair
    DeclaredIdMismatch,
    /// `?` applied where the error type cannot convert, or outside a `Result` fn
    QuestionMarkMisuse,
    /// Borrow checker or move errors
    BorrowOrMove,
    /// Missing imports, paths, or crates
    UnresolvedImport,
    /// E0308 mismatched types
    TypeMismatch,
    /// An error line that matched nothing more specific
    Other,
}

impl ErrorClass {
    const ALL: [ErrorClass; 7] = [
        ErrorClass::StackOverflow,
        ErrorClass::MissingIdlBuild,
        ErrorClass::DeclaredIdMismatch,
        ErrorClass::QuestionMarkMisuse,
        ErrorClass::BorrowOrMove,
        ErrorClass::UnresolvedImport,
        ErrorClass::TypeMismatch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorClass::StackOverflow => "stack-overflow",
            ErrorClass::MissingIdlBuild => "missing-idl-build",
            ErrorClass::DeclaredIdMismatch => "declared-id-mismatch",
            ErrorClass::QuestionMarkMisuse => "question-mark-misuse",
            ErrorClass::BorrowOrMove => "borrow-or-move",
            ErrorClass::UnresolvedImport => "unresolved-import",
            ErrorClass::TypeMismatch => "type-mismatch",
            ErrorClass::Other => "other",
        }
    }

    /// Whether [`crate::patch`] can fix this without the model.
    pub fn is_patchable(&self) -> bool {
        matches!(
            self,
            ErrorClass::StackOverflow | ErrorClass::MissingIdlBuild | ErrorClass::DeclaredIdMismatch
        )
    }

    /// Guidance appended to fix prompts.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorClass::StackOverflow => {
                "The program exceeds the 4KB SBF stack frame. Wrap large accounts in \
                 `Box<Account<'info, T>>`, avoid large local arrays, and move big structs to the heap."
            }
            ErrorClass::MissingIdlBuild => {
                "The program Cargo.toml needs `idl-build = [\"anchor-lang/idl-build\"]` under [features]. \
                 Do not change lib.rs for this error."
            }
            ErrorClass::DeclaredIdMismatch => {
                "The `declare_id!` value must equal the program keypair address. Keep the ID given in the prompt."
            }
            ErrorClass::QuestionMarkMisuse => {
                "Only use `?` on `Result` values whose error converts into `anchor_lang::error::Error`. \
                 For `Option`, use `.ok_or(ErrorCode::...)?`; for checked arithmetic use \
                 `.checked_add(x).ok_or(ErrorCode::Overflow)?`. Never use `?` inside functions that do not return `Result`."
            }
            ErrorClass::BorrowOrMove => {
                "Resolve borrow conflicts: read values you need (keys, bumps, amounts) into locals before taking \
                 `&mut` borrows, call `.to_account_info()` before mutable borrows, clone `Pubkey`s instead of moving, \
                 and do not hold a mutable account reference across a CPI."
            }
            ErrorClass::UnresolvedImport => {
                "Only import from `anchor_lang` (and `anchor_spl` if token accounts are needed). \
                 Use `use anchor_lang::prelude::*;` and fully-qualified paths for system program transfers."
            }
            ErrorClass::TypeMismatch => {
                "Fix the mismatched types: lamport amounts are `u64`, timestamps from `Clock::get()?.unix_timestamp` are `i64`, \
                 and instruction handlers return `Result<()>`."
            }
            ErrorClass::Other => "Fix the compiler errors shown above.",
        }
    }

    /// Compiled signature; `None` for `Other`, which is the fallback.
    fn pattern(&self) -> Option<&'static Regex> {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            ErrorClass::ALL
                .iter()
                .map(|class| Regex::new(class.pattern_source()).unwrap())
                .collect()
        });

        ErrorClass::ALL
            .iter()
            .position(|c| c == self)
            .map(|index| &patterns[index])
    }

    fn pattern_source(&self) -> &'static str {
        match self {
            ErrorClass::StackOverflow => {
                r"(?i)stack offset of -?\d+ exceeded max offset|access violation in stack frame|\bstack overflow\b"
            }
            ErrorClass::MissingIdlBuild => r"(?i)`?idl-build`?\s+feature\s+is\s+missing",
            ErrorClass::DeclaredIdMismatch => {
                r"(?i)DeclaredProgramIdMismatch|declared program id does not match"
            }
            ErrorClass::QuestionMarkMisuse => {
                r"the `\?` operator can only be (used|applied)|`\?` couldn't convert the error"
            }
            ErrorClass::BorrowOrMove => {
                r"error\[E0(382|499|502|505|506|507|596|597|716)\]|borrow of moved value|cannot move out of|cannot borrow .* as (mutable|immutable)"
            }
            ErrorClass::UnresolvedImport => {
                r"error\[E04(12|25|32|33)\]|unresolved import|failed to resolve|can't find crate"
            }
            ErrorClass::TypeMismatch => r"error\[E0308\]|mismatched types",
            ErrorClass::Other => r"^(error(\[E\d+\])?:|Error:)",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub class: ErrorClass,
    /// The matching line plus a few lines of context
    pub excerpt: String,
    /// 0-based line index of the match in the output
    pub line: usize,
}

const EXCERPT_CONTEXT_LINES: usize = 4;

fn generic_error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ErrorClass::Other.pattern_source()).unwrap())
}

/// Classify build output.
///
/// Returns one diagnosis per distinct class, ordered by first appearance.
/// `Other` is reported only when no specific class matched but the output
/// still contains an error line.
pub fn classify(output: &str) -> Vec<Diagnosis> {
    let lines: Vec<&str> = output.lines().collect();
    let mut diagnoses: Vec<Diagnosis> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        for class in ErrorClass::ALL {
            if diagnoses.iter().any(|d| d.class == class) {
                continue;
            }
            if class.pattern().is_some_and(|re| re.is_match(line)) {
                diagnoses.push(Diagnosis {
                    class,
                    excerpt: excerpt(&lines, index),
                    line: index,
                });
                break;
            }
        }
    }

    if diagnoses.is_empty() {
        if let Some(index) = lines
            .iter()
            .position(|l| generic_error_regex().is_match(l.trim_start()))
        {
            diagnoses.push(Diagnosis {
                class: ErrorClass::Other,
                excerpt: excerpt(&lines, index),
                line: index,
            });
        }
    }

    diagnoses
}

fn excerpt(lines: &[&str], index: usize) -> String {
    let end = (index + 1 + EXCERPT_CONTEXT_LINES).min(lines.len());
    lines[index..end]
        .iter()
        .take_while(|l| !l.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}
