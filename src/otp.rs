//! One-time password retrieval through the 1Password CLI.

use std::{io, process::Stdio, sync::Arc};

use async_trait::async_trait;
use log::{debug, error};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
};

use crate::console::Console;

/// Diagnostic lines from `op` shown to the user; the rest only reach the debug log.
/// `op` prints several lines of noise when an unlock prompt is cancelled.
pub const MAX_OUTPUT_LINES: usize = 2;

const ERROR_PREFIX: &str = "[ERROR]";
const CLIENT_PREFIX: &str = "error initializing client:";

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("missing `{program}` command")]
    NotInstalled { program: String },

    #[error("`{program}` exited with {status}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("`{program}` printed no one-time password")]
    EmptyOutput { program: String },

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Source of one-time passwords for a vault item.
#[async_trait]
pub trait OtpSource: Send + Sync {
    async fn fetch(&self, item: &str) -> Result<String, OtpError>;
}

/// Fetches OTPs with `op item get --otp <item>`.
pub struct OpCli {
    program: String,
    account: Option<String>,
    console: Arc<dyn Console>,
}

impl OpCli {
    pub fn new(program: impl Into<String>, account: Option<String>, console: Arc<dyn Console>) -> Self {
        Self {
            program: program.into(),
            account,
            console,
        }
    }

    fn command(&self, item: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["item", "get", "--otp", item]);
        if let Some(account) = &self.account {
            command.args(["--account", account]);
        }
        command
    }
}

#[async_trait]
impl OtpSource for OpCli {
    async fn fetch(&self, item: &str) -> Result<String, OtpError> {
        debug!("Fetching one-time password for {item:?}");
        let result = run(self.command(item), &self.program, self.console.as_ref()).await;
        if let Err(OtpError::NotInstalled { program }) = &result {
            error!("Failed: missing `{program}` command");
        }
        result
    }
}

/// Strips the boilerplate `op` puts in front of its diagnostics.
///
/// `[ERROR] 2023/02/04 16:29:52 foo failed` becomes `foo failed`, and
/// `error initializing client: disk full` becomes `disk full`.
pub fn beautify(line: &str) -> &str {
    let mut line = line.trim();
    if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
        // date and time follow the marker
        line = rest.trim_start().splitn(3, ' ').nth(2).unwrap_or_default();
    }
    if let Some(rest) = line.strip_prefix(CLIENT_PREFIX) {
        line = rest;
    }
    line.trim()
}

/// Runs `command`, relaying at most [`MAX_OUTPUT_LINES`] diagnostics while it runs,
/// and returns the first line of its output.
///
/// The process is driven in three steps:
/// 1. Spawns it with stdin attached to the terminal, so `op` can prompt for an unlock
/// 2. Reads stdout to the end while draining stderr line by line at the same time, so
///    neither pipe can fill up and block the child
/// 3. Waits for the exit status and takes the first non-empty stdout line
///
/// Diagnostics pass through [`beautify`]; the first [`MAX_OUTPUT_LINES`] non-empty ones
/// go to `console`, the rest only to the debug log.
///
/// # Arguments
/// * `command` - Prepared command; its stdio is configured here
/// * `program` - Program name used in errors and log lines
/// * `console` - Sink for the relayed diagnostics
///
/// # Returns
/// * `Ok(String)` - The trimmed first line of stdout
/// * `Err(OtpError)` - If the command could not run or produced no output
///
/// # Errors
/// * [`OtpError::NotInstalled`] - The program is not on `PATH`
/// * [`OtpError::Failed`] - The program exited unsuccessfully
/// * [`OtpError::EmptyOutput`] - stdout had no usable first line
/// * [`OtpError::Io`] - Spawning, reading or waiting failed otherwise
pub(crate) async fn run(
    mut command: Command,
    program: &str,
    console: &dyn Console,
) -> Result<String, OtpError> {
    let io_error = |source: io::Error| OtpError::Io {
        program: program.to_owned(),
        source,
    };

    // op may ask for a password or biometric unlock on the terminal
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => OtpError::NotInstalled {
            program: program.to_owned(),
        },
        _ => io_error(e),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(io::Error::other("stderr not captured")))?;

    let read_output = async {
        let mut output = String::new();
        BufReader::new(stdout).read_to_string(&mut output).await?;
        Ok::<_, io::Error>(output)
    };

    let drain_diagnostics = async {
        let mut lines = BufReader::new(stderr).lines();
        let mut shown = 0;
        while let Some(line) = lines.next_line().await? {
            let message = beautify(&line);
            if shown < MAX_OUTPUT_LINES && !message.is_empty() {
                console.info(message);
                shown += 1;
            } else {
                debug!("{program}: {line}");
            }
        }
        Ok::<_, io::Error>(())
    };

    // Both streams are polled together; reading them in turn can deadlock on a full pipe
    let (output, drained) = tokio::join!(read_output, drain_diagnostics);
    let status = child.wait().await.map_err(io_error)?;
    drained.map_err(io_error)?;
    let output = output.map_err(io_error)?;

    if !status.success() {
        error!("`{program}` exited with {status}");
        return Err(OtpError::Failed {
            program: program.to_owned(),
            status,
        });
    }

    match output.lines().next().map(str::trim) {
        Some(otp) if !otp.is_empty() => Ok(otp.to_owned()),
        _ => Err(OtpError::EmptyOutput {
            program: program.to_owned(),
        }),
    }
}
