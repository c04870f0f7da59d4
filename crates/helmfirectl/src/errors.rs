//! Exit status for helmfirectl

use owo_colors::OwoColorize;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for any failed command
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Print `err` as a single `Error:` line on stderr and return the exit code.
pub fn report(err: &anyhow::Error) -> i32 {
    eprintln!("{} {}", "Error:".bright_red().bold(), one_line(err));
    EXIT_GENERAL_ERROR
}

/// The error chain joined with `: ` on one line.
pub fn one_line(err: &anyhow::Error) -> String {
    format!("{:#}", err).replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_one_line_joins_context() {
        let err = std::fs::read("/nonexistent/helmfile.yaml")
            .context("failed to read helmfile")
            .unwrap_err();
        let line = one_line(&err);
        assert!(line.starts_with("failed to read helmfile: "));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_report_is_general_error() {
        assert_eq!(report(&anyhow::anyhow!("boom")), EXIT_GENERAL_ERROR);
        assert_ne!(EXIT_SUCCESS, EXIT_GENERAL_ERROR);
    }
}
