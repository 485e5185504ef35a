//! Confirmation gates
//!
//! A gate is a synchronous suspension point: the run blocks until the
//! operator answers, or an auto-confirm gate pre-answers "yes" for
//! unattended runs. Which implementation is used is decided by
//! configuration, never by environment inspection inside a component.

use std::io::{self, BufRead, Write};

/// Yes/no decision point ahead of a mutating phase.
pub trait ConfirmationGate: Send + Sync {
    /// Returns false to abort the run at this gate.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Blocks on stdin for an explicit answer.
pub struct InteractiveGate;

impl ConfirmationGate for InteractiveGate {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N]: ", prompt);
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Treats every gate as pre-answered "yes" (`--yes` /
/// `TRUSTMEND_ASSUME_YES`).
pub struct AutoConfirmGate;

impl ConfirmationGate for AutoConfirmGate {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::info!(prompt, "auto-confirmed");
        true
    }
}
