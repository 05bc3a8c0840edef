// ABOUTME: Scripted in-memory transport for exercising the connector.
// ABOUTME: Records every offered credential and counts dials and closed sessions.

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::keys::PrivateKey;
use sshman::ssh::{AuthReply, AuthSession, Challenge, DialSettings, Error, Result, Transport};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One credential as the fake server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Password(String),
    PublicKey,
    Interactive(Vec<String>),
}

/// What the fake server accepts.
#[derive(Debug, Default)]
struct Script {
    passwords: HashSet<String>,
    public_key: bool,
    questions: Vec<String>,
    answers: Option<Vec<String>>,
    refuse_dial: bool,
    /// Methods the server allows. `None` allows all three.
    methods: Option<Vec<String>>,
    /// Failed attempts after which the server drops the connection.
    max_failures: Option<usize>,
}

impl Script {
    fn allows(&self, method: &str) -> bool {
        self.remaining().iter().any(|m| m == method)
    }

    fn remaining(&self) -> Vec<String> {
        self.methods.clone().unwrap_or_else(|| {
            ["publickey", "password", "keyboard-interactive"]
                .iter()
                .map(|m| m.to_string())
                .collect()
        })
    }
}

#[derive(Debug, Default)]
struct Log {
    attempts: Mutex<Vec<Attempt>>,
    dials: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    script: Arc<Script>,
    log: Arc<Log>,
    delays: Mutex<VecDeque<Duration>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("script is configured before dialing")
    }

    pub fn accept_password(mut self, password: &str) -> Self {
        self.script_mut().passwords.insert(password.to_string());
        self
    }

    pub fn accept_public_key(mut self) -> Self {
        self.script_mut().public_key = true;
        self
    }

    /// Ask these keyboard-interactive questions in one round.
    pub fn questions(mut self, questions: &[&str]) -> Self {
        self.script_mut().questions = questions.iter().map(|q| q.to_string()).collect();
        self
    }

    pub fn accept_answers(mut self, answers: &[&str]) -> Self {
        self.script_mut().answers = Some(answers.iter().map(|a| a.to_string()).collect());
        self
    }

    /// Only allow these methods, as a server with the rest disabled would.
    pub fn allow_methods(mut self, methods: &[&str]) -> Self {
        self.script_mut().methods = Some(methods.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Disconnect once a session has this many failed attempts.
    pub fn max_failures(mut self, limit: usize) -> Self {
        self.script_mut().max_failures = Some(limit);
        self
    }

    pub fn refuse_dial(mut self) -> Self {
        self.script_mut().refuse_dial = true;
        self
    }

    /// Delay for each successive dial. Dials past the list are immediate.
    pub fn dial_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        *self.delays.lock() = delays.into_iter().collect();
        self
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.log.attempts.lock().clone()
    }

    pub fn password_attempts(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter_map(|a| match a {
                Attempt::Password(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn dials(&self) -> usize {
        self.log.dials.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.log.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn dial(&self, settings: &DialSettings) -> Result<FakeSession> {
        self.log.dials.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.script.refuse_dial {
            return Err(Error::Connection {
                address: settings.address.clone(),
                reason: "connection refused".to_string(),
            });
        }

        Ok(FakeSession {
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            failures: 0,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    script: Arc<Script>,
    log: Arc<Log>,
    failures: usize,
}

impl FakeSession {
    fn record(&self, attempt: Attempt) {
        self.log.attempts.lock().push(attempt);
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.script.max_failures {
            Some(limit) if self.failures >= limit => Err(Error::Connection {
                address: "fake".to_string(),
                reason: "too many authentication failures".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn verdict(&mut self, method: &str, accepted: bool) -> AuthReply {
        if accepted && self.script.allows(method) {
            return AuthReply::Accepted;
        }
        self.failures += 1;
        AuthReply::Rejected {
            remaining: self.script.remaining(),
        }
    }
}

#[async_trait]
impl AuthSession for FakeSession {
    async fn none(&mut self, _user: &str) -> Result<AuthReply> {
        self.ensure_connected()?;
        Ok(AuthReply::Rejected {
            remaining: self.script.remaining(),
        })
    }

    async fn password(&mut self, _user: &str, password: &str) -> Result<AuthReply> {
        self.ensure_connected()?;
        self.record(Attempt::Password(password.to_string()));
        tokio::task::yield_now().await;
        let accepted = self.script.passwords.contains(password);
        Ok(self.verdict("password", accepted))
    }

    async fn public_key(&mut self, _user: &str, _key: Arc<PrivateKey>) -> Result<AuthReply> {
        self.ensure_connected()?;
        self.record(Attempt::PublicKey);
        let accepted = self.script.public_key;
        Ok(self.verdict("publickey", accepted))
    }

    async fn keyboard_interactive_start(&mut self, _user: &str) -> Result<Challenge> {
        self.ensure_connected()?;
        if self.script.questions.is_empty() || !self.script.allows("keyboard-interactive") {
            self.failures += 1;
            return Ok(Challenge::Rejected {
                remaining: self.script.remaining(),
            });
        }
        Ok(Challenge::Questions(self.script.questions.clone()))
    }

    async fn keyboard_interactive_respond(&mut self, answers: Vec<String>) -> Result<Challenge> {
        self.ensure_connected()?;
        self.record(Attempt::Interactive(answers.clone()));
        let accepted = self.script.answers.as_ref() == Some(&answers);
        Ok(match self.verdict("keyboard-interactive", accepted) {
            AuthReply::Accepted => Challenge::Accepted,
            AuthReply::Rejected { remaining } => Challenge::Rejected { remaining },
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
