//! Build outcome types.

use std::time::Duration;

/// Result of one syntax check or toolchain build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Stage that produced this result ("syn", "anchor build", ...)
    pub stage: String,
    /// Whether the stage succeeded
    pub passed: bool,
    /// First error line, if failed
    pub error: Option<String>,
    /// Combined stdout and stderr
    pub output: String,
    /// Wall-clock time spent
    pub duration: Duration,
}

impl BuildResult {
    /// Create a passing result with no output.
    pub fn pass(stage: impl Into<String>, duration: Duration) -> Self {
        Self::pass_with_output(stage, duration, String::new())
    }

    /// Create a passing result that keeps the tool output.
    pub fn pass_with_output(stage: impl Into<String>, duration: Duration, output: String) -> Self {
        Self {
            stage: stage.into(),
            passed: true,
            error: None,
            output,
            duration,
        }
    }

    /// Create a failing result.
    pub fn fail(
        stage: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
        output: String,
    ) -> Self {
        Self {
            stage: stage.into(),
            passed: false,
            error: Some(error.into()),
            output,
            duration,
        }
    }

    /// Lines worth showing a model: errors, panics and their `-->` locations.
    pub fn error_lines(&self, limit: usize) -> Vec<&str> {
        let mut lines = Vec::new();
        let mut after_error = 0usize;

        for line in self.output.lines() {
            let lower = line.to_lowercase();
            let is_error = lower.starts_with("error")
                || lower.contains("error:")
                || lower.contains("panicked")
                || lower.contains("exceeded max offset");

            if is_error {
                lines.push(line);
                after_error = 3;
            } else if after_error > 0 && !line.trim().is_empty() {
                // Keep the location and first context lines of each error
                lines.push(line);
                after_error -= 1;
            }

            if lines.len() >= limit {
                break;
            }
        }

        lines
    }

    /// Format as a short human-readable report.
    pub fn format_report(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut report = format!(
            "[{}] {} ({:.2}s)\n",
            status,
            self.stage,
            self.duration.as_secs_f64()
        );
        if let Some(ref error) = self.error {
            report.push_str(&format!("  Error: {}\n", error));
        }
        report
    }
}
