//! End-of-run reporting

use colored::Colorize;
use fanout_core::TaskError;

/// Counts derived from the runner's error list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn new(total: usize, errors: &[TaskError]) -> Self {
        let skipped = errors.iter().filter(|e| e.is_cancellation()).count();
        Self {
            total,
            failed: errors.len() - skipped,
            skipped,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.total.saturating_sub(self.failed + self.skipped)
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 && self.skipped == 0 { 0 } else { 1 }
    }

    /// Print each error, then the summary line, to stderr
    pub fn print(&self, errors: &[TaskError]) {
        for error in errors {
            if error.is_cancellation() {
                eprintln!("{} {}", "skipped:".yellow().bold(), error);
            } else {
                eprintln!("{} {}", "failed:".red().bold(), error);
            }
        }

        let line = format!(
            "{} commands, {} succeeded, {} failed, {} skipped",
            self.total,
            self.succeeded(),
            self.failed,
            self.skipped
        );
        if self.exit_code() == 0 {
            eprintln!("{}", line.green());
        } else {
            eprintln!("{}", line.red());
        }
    }
}
