// ABOUTME: Connection establishment over a Transport.
// ABOUTME: Sequential mode offers the whole chain in one handshake; racing mode dials once per password.

use super::auth::{AuthStrategy, PasswordRetry};
use super::error::{Error, Result};
use super::group::TaskGroup;
use super::keyboard::Responder;
use super::transport::{AuthReply, AuthSession, Challenge, DialSettings, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Upper bound on info-request rounds in one keyboard-interactive exchange.
const MAX_INTERACTIVE_ROUNDS: usize = 32;

/// Dials a single host with a fixed set of transport settings.
pub struct Connector<T: Transport> {
    transport: Arc<T>,
    settings: DialSettings,
}

impl<T: Transport> Connector<T> {
    pub fn with_shared(transport: Arc<T>, settings: DialSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Dial once and offer `strategies` in order.
    ///
    /// No retry happens here beyond what a `PasswordRetry` strategy encodes.
    pub async fn connect(&self, user: &str, strategies: Vec<AuthStrategy>) -> Result<T::Session> {
        tracing::debug!(
            "dialing {} as {} with {} strategies",
            self.settings.address,
            user,
            strategies.len()
        );
        let mut session = self.transport.dial(&self.settings).await?;

        if let Err(e) = authenticate(&mut session, user, &self.settings.address, strategies).await {
            if let Err(close_err) = session.close().await {
                tracing::debug!("close after failed auth: {}", close_err);
            }
            return Err(e);
        }

        tracing::info!("authenticated to {} as {}", self.settings.address, user);
        Ok(session)
    }

    /// Dial once per candidate concurrently and keep the first that authenticates.
    ///
    /// Returns as soon as a winner exists; remaining attempts finish in the
    /// background and close their own sessions. Without a winner, the first
    /// recorded failure is returned once every attempt has completed.
    pub async fn fast_connect(
        &self,
        user: &str,
        candidates: &[String],
    ) -> Result<(T::Session, String)> {
        if candidates.is_empty() {
            return Err(Error::NoPasswordCandidates);
        }

        let winner = Arc::new(WinnerSlot::new());
        let mut group = TaskGroup::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let settings = self.settings.clone();
            let user = user.to_string();
            let password = candidate.clone();
            let winner = Arc::clone(&winner);

            group.go(async move {
                let mut session = transport.dial(&settings).await?;
                let strategies = vec![
                    AuthStrategy::PasswordRetry(PasswordRetry::new(vec![password.clone()])),
                    AuthStrategy::KeyboardInteractive(Responder::Password(password.clone())),
                ];

                if let Err(e) = authenticate(&mut session, &user, &settings.address, strategies).await
                {
                    tracing::debug!("candidate #{} rejected: {}", index, e);
                    if let Err(close_err) = session.close().await {
                        tracing::debug!("candidate #{} close failed: {}", index, close_err);
                    }
                    return Err(e);
                }

                match winner.offer(session, password) {
                    None => tracing::info!(
                        "candidate #{} authenticated to {}",
                        index,
                        settings.address
                    ),
                    Some(mut surplus) => {
                        tracing::debug!("candidate #{} also authenticated, discarding", index);
                        if let Err(e) = surplus.close().await {
                            tracing::debug!("candidate #{} close failed: {}", index, e);
                        }
                    }
                }
                Ok(())
            });
        }

        tokio::select! {
            _ = winner.notified() => {}
            _ = group.wait() => {}
        }

        if let Some(found) = winner.claim() {
            return Ok(found);
        }

        Err(group.take_error().unwrap_or_else(|| Error::AuthenticationFailed {
            user: user.to_string(),
            address: self.settings.address.clone(),
            reason: "no candidate authenticated".to_string(),
        }))
    }
}

/// Offer `strategies` in order on an already dialed session.
///
/// A `none` request first learns which methods the server allows. Strategies
/// whose method the server has not listed are skipped, and each rejection
/// replaces that list with the one the server sent back. A keyboard-interactive
/// strategy that cannot answer a question only fails itself; the next strategy
/// is still tried. Transport errors abort at once.
pub async fn authenticate<S: AuthSession + ?Sized>(
    session: &mut S,
    user: &str,
    address: &str,
    strategies: Vec<AuthStrategy>,
) -> Result<()> {
    let mut allowed = match session.none(user).await? {
        AuthReply::Accepted => {
            tracing::debug!("{} accepted none for {}", address, user);
            return Ok(());
        }
        AuthReply::Rejected { remaining } => remaining,
    };
    tracing::debug!("{} allows {:?}", address, allowed);

    let mut rejections = Vec::new();

    for strategy in strategies {
        let method = strategy.method();
        if !allows(&allowed, method) {
            tracing::debug!("{} does not allow {}, skipping", address, method);
            rejections.push(format!("{} not allowed", method));
            continue;
        }

        let reply = match strategy {
            AuthStrategy::PublicKey(key) => session.public_key(user, key).await?,
            AuthStrategy::PasswordRetry(mut retry) => {
                let mut reply = AuthReply::Rejected {
                    remaining: allowed.clone(),
                };
                let mut tries = 0;
                while let Some(candidate) = retry.next_candidate() {
                    tries += 1;
                    reply = session.password(user, candidate).await?;
                    match &reply {
                        AuthReply::Accepted => break,
                        // Server withdrew `password`.
                        AuthReply::Rejected { remaining } if !allows(remaining, method) => break,
                        AuthReply::Rejected { .. } => {}
                    }
                }
                if !reply.is_accepted() {
                    tracing::debug!("{} rejected {} password candidates", address, tries);
                }
                reply
            }
            AuthStrategy::KeyboardInteractive(responder) => {
                match keyboard_interactive(session, user, &responder, &allowed).await {
                    Ok(reply) => reply,
                    Err(e @ Error::QuestionNotAnswered(_)) => {
                        tracing::warn!("{} keyboard-interactive: {}", address, e);
                        rejections.push(e.to_string());
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match reply {
            AuthReply::Accepted => {
                tracing::debug!("{} accepted {} for {}", address, method, user);
                return Ok(());
            }
            AuthReply::Rejected { remaining } => {
                rejections.push(format!("{} rejected", method));
                allowed = remaining;
            }
        }
    }

    let reason = if rejections.is_empty() {
        "no authentication methods available".to_string()
    } else {
        rejections.join("; ")
    };
    Err(Error::AuthenticationFailed {
        user: user.to_string(),
        address: address.to_string(),
        reason,
    })
}

fn allows(methods: &[String], method: &str) -> bool {
    methods.iter().any(|m| m == method)
}

async fn keyboard_interactive<S: AuthSession + ?Sized>(
    session: &mut S,
    user: &str,
    responder: &Responder,
    allowed: &[String],
) -> Result<AuthReply> {
    let mut challenge = session.keyboard_interactive_start(user).await?;
    for _ in 0..MAX_INTERACTIVE_ROUNDS {
        match challenge {
            Challenge::Accepted => return Ok(AuthReply::Accepted),
            Challenge::Rejected { remaining } => return Ok(AuthReply::Rejected { remaining }),
            Challenge::Questions(questions) => {
                let answers = responder.respond(&questions)?;
                challenge = session.keyboard_interactive_respond(answers).await?;
            }
        }
    }
    Ok(match challenge {
        Challenge::Accepted => AuthReply::Accepted,
        Challenge::Rejected { remaining } => AuthReply::Rejected { remaining },
        Challenge::Questions(_) => AuthReply::Rejected {
            remaining: allowed.to_vec(),
        },
    })
}

enum SlotState<S> {
    Empty,
    Filled(S, String),
    Claimed,
}

/// Write-once holder for the racing winner.
struct WinnerSlot<S> {
    state: Mutex<SlotState<S>>,
    filled: Notify,
}

impl<S> WinnerSlot<S> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            filled: Notify::new(),
        }
    }

    /// Store the winner. Hands the session back if the slot was already taken.
    fn offer(&self, session: S, password: String) -> Option<S> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Filled(session, password);
                drop(state);
                self.filled.notify_one();
                None
            }
            SlotState::Filled(..) | SlotState::Claimed => Some(session),
        }
    }

    async fn notified(&self) {
        self.filled.notified().await
    }

    /// Take the winner out. Later offers are refused either way.
    fn claim(&self) -> Option<(S, String)> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Claimed) {
            SlotState::Filled(session, password) => Some((session, password)),
            SlotState::Empty | SlotState::Claimed => None,
        }
    }
}
