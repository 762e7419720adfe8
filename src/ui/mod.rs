//! Terminal output
//!
//! Everything user-facing goes to stderr so task stdout stays clean for
//! piping.

use colored::Colorize;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    #[default]
    Normal = 2,
    Verbose = 3,
}

/// Verbosity-gated printer
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer {
    verbosity: Verbosity,
}

impl Printer {
    pub fn new(verbosity: Verbosity) -> Self {
        Printer { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Print info message
    pub fn info(&self, message: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{}", message);
        }
    }

    /// Print warning message
    pub fn warn(&self, message: &str) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
    }

    /// Header printed before a task's handler runs
    pub fn task_header(&self, name: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{}", format!("▸ {}", name).bold());
        }
    }

    pub fn task_skipped(&self, name: &str, reason: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{} {} ({})", "skipped".yellow(), name, reason);
        }
    }

    pub fn task_failed(&self, name: &str, error: &str) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {}: {}", "failed".red().bold(), name, error);
        }
    }

    pub fn task_cancelled(&self, name: &str, reason: &str) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {}: {}", "cancelled".yellow().bold(), name, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert!(Verbosity::Verbose > Verbosity::Normal);
        assert!(Verbosity::Normal > Verbosity::Quiet);
        assert!(Verbosity::Quiet > Verbosity::Silent);
    }

    #[test]
    fn test_default_printer_is_normal() {
        assert_eq!(Printer::default().verbosity(), Verbosity::Normal);
    }
}
