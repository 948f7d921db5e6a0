//! User-visible console output.
//!
//! Everything the user should see goes through a [`Console`] so the handlers can be
//! exercised against a recording sink in tests. Lines are written to stderr because
//! stdout carries the resolved credentials.

use std::io::{self, Write};

use colored::{ColoredString, Colorize};

/// Label prepended to every console line.
pub const LABEL: &str = "1Password: ";

/// Sink for short, user-facing status lines.
pub trait Console: Send + Sync {
    /// Informational line (diagnostics relayed from `op`, cache hits).
    fn info(&self, message: &str);

    /// Error line (failed session exchange, unexpected failures).
    fn error(&self, message: &str);
}

/// Console writing colored, labelled lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Console for Terminal {
    fn info(&self, message: &str) {
        emit(io::stderr().lock(), format!("{LABEL}{message}").cyan());
    }

    fn error(&self, message: &str) {
        emit(io::stderr().lock(), format!("{LABEL}{message}").red());
    }
}

/// Writes one line, ignoring write errors: a closed stderr must not abort the process.
fn emit(mut out: impl Write, line: ColoredString) {
    let _ = writeln!(out, "{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn writes_labelled_line() {
        colored::control::set_override(false);
        let mut out = Vec::new();
        emit(&mut out, format!("{LABEL}unlocked").cyan());
        assert_eq!(String::from_utf8(out).unwrap(), "1Password: unlocked\n");
    }

    #[test]
    fn closed_stream_is_ignored() {
        emit(ClosedPipe, format!("{LABEL}lost").red());
    }
}
