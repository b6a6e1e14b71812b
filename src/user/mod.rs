//! Talking to whoever drives an operation: a terminal or nothing at all.

use anyhow::Result;
use log::{info, warn};
use std::io::{self, BufRead, Write};

/// Messages, warnings, progress and confirmations.
///
/// Headless sessions never block: `confirm` answers with a fixed value and
/// callers that would otherwise prompt fail instead.
#[cfg_attr(test, mockall::automock)]
pub trait User: Send + Sync {
    fn message(&self, text: &str);
    fn warning(&self, text: &str);
    fn progress(&self, text: &str, percent: u8);
    /// Returns true if the user confirms.
    fn confirm(&self, prompt: &str) -> Result<bool>;
    fn is_headless(&self) -> bool;
}

/// Core, testable prompt that reads from any BufRead and writes to any Write.
pub(crate) fn confirm_with_io<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{} [y/N] ", prompt)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let response = line.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

/// Interactive terminal session.
#[derive(Debug, Default)]
pub struct ConsoleUser {
    /// Answer yes to every prompt without asking.
    pub assume_yes: bool,
}

impl User for ConsoleUser {
    fn message(&self, text: &str) {
        println!("{}", text);
    }

    fn warning(&self, text: &str) {
        eprintln!("Warning: {}", text);
    }

    fn progress(&self, text: &str, percent: u8) {
        eprint!("\r{} {:>3}%", text, percent.min(100));
        if percent >= 100 {
            eprintln!();
        }
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut stdin_lock = stdin.lock();
        confirm_with_io(prompt, &mut stdin_lock, &mut stdout)
    }

    fn is_headless(&self) -> bool {
        false
    }
}

/// Non-interactive session that only logs.
#[derive(Debug, Default)]
pub struct HeadlessUser {
    pub assume_yes: bool,
}

impl User for HeadlessUser {
    fn message(&self, text: &str) {
        info!("{}", text);
    }

    fn warning(&self, text: &str) {
        warn!("{}", text);
    }

    fn progress(&self, _text: &str, _percent: u8) {}

    fn confirm(&self, prompt: &str) -> Result<bool> {
        info!("{} -> {}", prompt, if self.assume_yes { "yes" } else { "no" });
        Ok(self.assume_yes)
    }

    fn is_headless(&self) -> bool {
        true
    }
}
