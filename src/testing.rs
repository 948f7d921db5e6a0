//! In-memory stand-ins for the external collaborators.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::{
    cache::{SessionCache, SessionCredentials},
    console::Console,
    credentials::{SessionExchange, SessionRequest, SourceCredentials},
    otp::{OtpError, OtpSource},
    process::{CredentialProcess, ProcessError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

#[derive(Debug, Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn info_lines(&self) -> Vec<String> {
        self.filtered(Level::Info)
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.filtered(Level::Error)
    }

    fn filtered(&self, level: Level) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line)
            .collect()
    }
}

impl Console for RecordingConsole {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push((Level::Info, message.to_owned()));
    }

    fn error(&self, message: &str) {
        self.lines.lock().unwrap().push((Level::Error, message.to_owned()));
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    records: Mutex<HashMap<String, SessionCredentials>>,
}

impl MemoryCache {
    pub fn with(key: &str, session: SessionCredentials) -> Self {
        let cache = Self::default();
        cache.records.lock().unwrap().insert(key.to_owned(), session);
        cache
    }
}

impl SessionCache for MemoryCache {
    fn read(&self, key: &str) -> Option<SessionCredentials> {
        self.records.lock().unwrap().get(key).cloned()
    }

    fn write(&self, key: &str, session: &SessionCredentials) -> Result<()> {
        self.records.lock().unwrap().insert(key.to_owned(), session.clone());
        Ok(())
    }
}

/// OTP source returning a fixed code, or failing when it has none.
#[derive(Debug, Default)]
pub struct FakeOtp {
    code: Option<String>,
    items: Mutex<Vec<String>>,
}

impl FakeOtp {
    pub fn returning(code: &str) -> Self {
        Self {
            code: Some(code.to_owned()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<String> {
        self.items.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[async_trait]
impl OtpSource for FakeOtp {
    async fn fetch(&self, item: &str) -> Result<String, OtpError> {
        self.items.lock().unwrap().push(item.to_owned());
        self.code.clone().ok_or_else(|| OtpError::EmptyOutput {
            program: "op".into(),
        })
    }
}

/// Recorded `SessionRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCall {
    pub access_key_id: String,
    pub region: String,
    pub mfa_serial: String,
    pub mfa_token: String,
    pub force_refresh: bool,
}

#[derive(Debug, Default)]
pub struct FakeExchange {
    session: Option<SessionCredentials>,
    calls: Mutex<Vec<ExchangeCall>>,
}

impl FakeExchange {
    pub fn returning(session: SessionCredentials) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionExchange for FakeExchange {
    async fn get_session_token(&self, request: SessionRequest<'_>) -> Result<SessionCredentials> {
        self.calls.lock().unwrap().push(ExchangeCall {
            access_key_id: request.source.access_key_id.clone(),
            region: request.region.to_owned(),
            mfa_serial: request.mfa_serial.to_owned(),
            mfa_token: request.mfa_token.to_owned(),
            force_refresh: request.force_refresh,
        });
        self.session
            .clone()
            .ok_or_else(|| anyhow!("MultiFactorAuthentication failed with invalid MFA one time pass code"))
    }
}

#[derive(Debug, Default)]
pub struct FakeProcess {
    output: Option<String>,
    runs: AtomicUsize,
}

impl FakeProcess {
    /// Process whose stdout is `output`.
    pub fn printing(output: &str) -> Self {
        Self {
            output: Some(output.to_owned()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProcess for FakeProcess {
    async fn run(&self, command: &str) -> Result<SourceCredentials, ProcessError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.output {
            Some(output) => crate::process::parse_output(command, output),
            None => Err(ProcessError::Failed {
                command: command.to_owned(),
                status: None,
                stderr: "no such profile".into(),
            }),
        }
    }
}

pub fn session(access_key_id: &str, valid_for: Duration) -> SessionCredentials {
    SessionCredentials {
        access_key_id: access_key_id.to_owned(),
        secret_access_key: format!("{access_key_id}-secret"),
        session_token: format!("{access_key_id}-token"),
        expiration: Utc::now() + valid_for,
        region: None,
    }
}
