//! Requesting, showing and expiring build keys.
//!
//! Each repository gets its own little state machine:
//!
//! ```text
//!            request(new secret)        confirm
//!   Idle ─────────────────────▶ ConfirmPending ───────┐
//!    │  ▲                            │ cancel          │
//!    │  └────────────────────────────┘                 ▼
//!    │  request                                   Requesting
//!    └───────────────────────────────────────────▶  │     │
//!                                          success  │     │ failure
//!                                                   ▼     ▼
//!                          exposure window ── Disclosed  Failed ── cool-down
//!                                 │                          │
//!                                 └──────────▶ Idle ◀────────┘
//! ```
//!
//! The key itself is only held while `Disclosed`. Issuing a new request for
//! a repository throws away whatever was being shown for it. A rotation only
//! does so once confirmed; cancelling it leaves the key (and its expiry)
//! exactly as it was.

use failure::Error;
use std::collections::HashMap;
use std::time::Duration;

use crate::client::Client;
use crate::config::Timing;
use crate::errors::ProvisionError;
use crate::model::{NewKeyRequest, NewKeyResponse, RepoKey, Repository};
use crate::scheduler::{Scheduler, TimerId};
use crate::transport::Transport;

pub const ROTATION_WARNING: &str =
    "This will generate a new secret. All previously issued keys will become invalid.";
const ROTATION_NOTE: &str =
    "A new secret has been generated. All previous build keys are now invalid. ";
const USAGE_NOTE: &str = "Click the above build key to copy it, and store it as the \
                          'BUILDRONE_KEY' environment variable in Drone for the upload \
                          script to use.";
const COPIED: &str = "Copied to clipboard.";

const SETUP_LABEL: &str = "Setup";
const GENERATE_LABEL: &str = "Generate Key";
const REGENERATE_LABEL: &str = "Regenerate secret";
const SUCCESS_LABEL: &str = "Success";
const FAILED_LABEL: &str = "Failed";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ConfirmPending,
    Requesting,
    Disclosed,
    Failed,
}

/// The timers the workflow needs to hear back about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretTimer {
    Cooldown(RepoKey),
    Exposure(RepoKey),
    Toast(RepoKey),
}

/// Phase changes, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SecretEvent {
    ConfirmRequested { key: RepoKey, warning: &'static str },
    Cancelled { key: RepoKey },
    Requesting { key: RepoKey, as_new_secret: bool },
    Disclosed {
        key: RepoKey,
        secret: String,
        note: String,
    },
    /// Whatever key was on display has been taken down.
    Cleared { key: RepoKey },
    Failed { key: RepoKey, reason: String },
    /// The trigger went back to its resting label.
    Reverted { key: RepoKey, label: String },
    Copied { key: RepoKey, message: &'static str },
    ToastDismissed { key: RepoKey },
}

/// Somewhere a disclosed key can be copied to.
pub trait Clipboard {
    fn copy(&mut self, text: &str) -> Result<(), Error>;
}

/// The control which kicked off a request, as the user sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub label: String,
    pub busy: bool,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretSession {
    key: RepoKey,
    as_new_secret: bool,
    phase: Phase,
    /// Where a cancelled confirmation goes back to.
    resume: Phase,
    secret: Option<String>,
    expires_at: Option<Duration>,
    timer: Option<TimerId>,
    toast: Option<TimerId>,
    /// The trigger's label when nothing is happening.
    resting_label: String,
}

impl SecretSession {
    fn new(repo: &Repository) -> SecretSession {
        let label = if repo.secret {
            GENERATE_LABEL
        } else {
            SETUP_LABEL
        };

        SecretSession {
            key: repo.key().clone(),
            as_new_secret: false,
            phase: Phase::Idle,
            resume: Phase::Idle,
            secret: None,
            expires_at: None,
            timer: None,
            toast: None,
            resting_label: label.to_string(),
        }
    }

    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    /// What the user is looking at, even while a confirmation is pending.
    fn shown(&self) -> Phase {
        if self.phase == Phase::ConfirmPending {
            self.resume
        } else {
            self.phase
        }
    }

    /// Drop back to idle, leaving a pending confirmation in place.
    fn settle(&mut self) {
        if self.phase == Phase::ConfirmPending {
            self.resume = Phase::Idle;
        } else {
            self.phase = Phase::Idle;
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn as_new_secret(&self) -> bool {
        self.as_new_secret
    }

    /// The key, but only while it's on display.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_ref().map(|s| s.as_str())
    }

    pub fn expires_at(&self) -> Option<Duration> {
        self.expires_at
    }

    pub fn trigger(&self) -> Trigger {
        let label = match self.phase {
            Phase::Disclosed => SUCCESS_LABEL,
            Phase::Failed => FAILED_LABEL,
            _ => self.resting_label.as_str(),
        };

        Trigger {
            label: label.to_string(),
            busy: self.phase == Phase::Requesting,
            failed: self.phase == Phase::Failed,
        }
    }
}

/// A key request which has been let through and must now be sent.
#[derive(Debug, PartialEq)]
pub struct ProvisionRequest {
    key: RepoKey,
    as_new_secret: bool,
}

impl ProvisionRequest {
    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn as_new_secret(&self) -> bool {
        self.as_new_secret
    }

    pub fn path(&self) -> String {
        format!("{}/key", self.key.path())
    }
}

/// What happens after asking for a key.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Rotating the secret is destructive, so the user has to confirm first.
    AwaitingConfirmation,
    Send(ProvisionRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretProvisioningWorkflow {
    sessions: HashMap<RepoKey, SecretSession>,
    timing: Timing,
    events: Vec<SecretEvent>,
}

impl SecretProvisioningWorkflow {
    pub fn new(timing: Timing) -> SecretProvisioningWorkflow {
        SecretProvisioningWorkflow {
            sessions: HashMap::new(),
            timing,
            events: Vec::new(),
        }
    }

    pub fn session(&self, key: &RepoKey) -> Option<&SecretSession> {
        self.sessions.get(key)
    }

    pub fn phase(&self, key: &RepoKey) -> Phase {
        self.sessions
            .get(key)
            .map(SecretSession::phase)
            .unwrap_or(Phase::Idle)
    }

    pub fn secret(&self, key: &RepoKey) -> Option<&str> {
        self.sessions.get(key).and_then(SecretSession::secret)
    }

    pub fn drain_events(&mut self) -> Vec<SecretEvent> {
        self.events.drain(..).collect()
    }

    /// Ask for a key. With `as_new_secret` the repository's secret is
    /// rotated, which has to be confirmed before anything is sent.
    pub fn request<E>(
        &mut self,
        repo: &Repository,
        as_new_secret: bool,
        scheduler: &mut Scheduler<E>,
    ) -> Result<Step, ProvisionError> {
        let session = self
            .sessions
            .entry(repo.key().clone())
            .or_insert_with(|| SecretSession::new(repo));

        if session.phase == Phase::Requesting {
            return Err(ProvisionError::Busy(repo.key().clone()));
        }

        session.as_new_secret = as_new_secret;

        if as_new_secret {
            // whatever is on display stays put until the rotation is confirmed
            debug!("Waiting for confirmation before rotating {}'s secret", repo.key());
            if session.phase != Phase::ConfirmPending {
                session.resume = session.phase;
            }
            session.phase = Phase::ConfirmPending;
            self.events.push(SecretEvent::ConfirmRequested {
                key: repo.key().clone(),
                warning: ROTATION_WARNING,
            });
            Ok(Step::AwaitingConfirmation)
        } else {
            take_down(session, scheduler, &mut self.events);
            Ok(Step::Send(start_request(session, &mut self.events)))
        }
    }

    /// Go ahead with a secret rotation, taking down any key still on
    /// display.
    pub fn confirm<E>(
        &mut self,
        key: &RepoKey,
        scheduler: &mut Scheduler<E>,
    ) -> Result<ProvisionRequest, ProvisionError> {
        match self.sessions.get_mut(key) {
            Some(session) if session.phase == Phase::ConfirmPending => {
                take_down(session, scheduler, &mut self.events);
                Ok(start_request(session, &mut self.events))
            }
            _ => Err(ProvisionError::NotAwaitingConfirmation(key.clone())),
        }
    }

    /// Back out of a secret rotation. Nothing is sent and the session goes
    /// back to where it was, timers and all.
    pub fn cancel(&mut self, key: &RepoKey) -> Result<(), ProvisionError> {
        match self.sessions.get_mut(key) {
            Some(session) if session.phase == Phase::ConfirmPending => {
                debug!("Secret rotation for {} was cancelled", key);
                session.phase = session.resume;
                session.resume = Phase::Idle;
                session.as_new_secret = false;
                self.events.push(SecretEvent::Cancelled { key: key.clone() });
                Ok(())
            }
            _ => Err(ProvisionError::NotAwaitingConfirmation(key.clone())),
        }
    }

    /// Record the outcome of a key request.
    pub fn complete<E>(
        &mut self,
        request: ProvisionRequest,
        result: Result<String, ProvisionError>,
        repo: &mut Repository,
        scheduler: &mut Scheduler<E>,
    ) -> Result<(), ProvisionError>
    where
        E: From<SecretTimer>,
    {
        let key = request.key;
        let session = self
            .sessions
            .get_mut(&key)
            .ok_or_else(|| ProvisionError::UnknownRepository(key.clone()))?;

        match result {
            Ok(secret) => {
                if !repo.secret {
                    info!("{} is now configured", key);
                }
                repo.secret = true;

                let mut note = String::new();
                if request.as_new_secret {
                    note.push_str(ROTATION_NOTE);
                }
                note.push_str(USAGE_NOTE);

                let window = self.timing.exposure_window();
                session.phase = Phase::Disclosed;
                session.secret = Some(secret.clone());
                session.expires_at = Some(scheduler.now() + window);
                session.timer = Some(scheduler.schedule(
                    window,
                    SecretTimer::Exposure(key.clone()).into(),
                ));

                self.events.push(SecretEvent::Disclosed { key, secret, note });
                Ok(())
            }
            Err(e) => {
                warn!("Unable to get a key for {}, {}", key, e);

                session.phase = Phase::Failed;
                session.timer = Some(scheduler.schedule(
                    self.timing.failure_cooldown(),
                    SecretTimer::Cooldown(key.clone()).into(),
                ));

                self.events.push(SecretEvent::Failed {
                    key,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Send a key request to the server and record the outcome.
    pub fn send<T, E>(
        &mut self,
        client: &Client<T>,
        request: ProvisionRequest,
        repo: &mut Repository,
        scheduler: &mut Scheduler<E>,
    ) -> Result<(), ProvisionError>
    where
        T: Transport,
        E: From<SecretTimer>,
    {
        let result = request_key(client, &request);
        self.complete(request, result, repo, scheduler)
    }

    /// Copy the key on display to the clipboard.
    pub fn copy<C, E>(
        &mut self,
        key: &RepoKey,
        clipboard: &mut C,
        scheduler: &mut Scheduler<E>,
    ) -> Result<(), ProvisionError>
    where
        C: Clipboard + ?Sized,
        E: From<SecretTimer>,
    {
        let session = match self.sessions.get_mut(key) {
            Some(s) if s.phase == Phase::Disclosed => s,
            _ => return Err(ProvisionError::NothingDisclosed(key.clone())),
        };

        if let Some(ref secret) = session.secret {
            clipboard.copy(secret).map_err(|e| ProvisionError::Clipboard {
                reason: e.to_string(),
            })?;
        }

        if let Some(old) = session.toast.take() {
            scheduler.cancel(old);
        }
        session.toast = Some(scheduler.schedule(
            self.timing.copy_toast(),
            SecretTimer::Toast(key.clone()).into(),
        ));

        self.events.push(SecretEvent::Copied {
            key: key.clone(),
            message: COPIED,
        });
        Ok(())
    }

    /// React to one of our timers going off.
    pub fn on_timer(&mut self, id: TimerId, timer: SecretTimer) {
        match timer {
            SecretTimer::Exposure(key) => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if session.shown() == Phase::Disclosed && session.timer == Some(id) {
                        debug!("The key for {} has expired", key);
                        session.timer = None;
                        session.settle();
                        session.secret = None;
                        session.expires_at = None;
                        session.resting_label = REGENERATE_LABEL.to_string();

                        self.events.push(SecretEvent::Cleared { key: key.clone() });
                        self.events.push(SecretEvent::Reverted {
                            key,
                            label: session.resting_label.clone(),
                        });
                    }
                }
            }
            SecretTimer::Cooldown(key) => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if session.shown() == Phase::Failed && session.timer == Some(id) {
                        session.timer = None;
                        session.settle();
                        self.events.push(SecretEvent::Reverted {
                            key,
                            label: session.resting_label.clone(),
                        });
                    }
                }
            }
            SecretTimer::Toast(key) => {
                if let Some(session) = self.sessions.get_mut(&key) {
                    if session.toast == Some(id) {
                        session.toast = None;
                        self.events.push(SecretEvent::ToastDismissed { key });
                    }
                }
            }
        }
    }
}

/// Clear anything left over from a previous request.
fn take_down<E>(
    session: &mut SecretSession,
    scheduler: &mut Scheduler<E>,
    events: &mut Vec<SecretEvent>,
) {
    if let Some(timer) = session.timer.take() {
        scheduler.cancel(timer);
    }
    if let Some(toast) = session.toast.take() {
        scheduler.cancel(toast);
    }

    match session.shown() {
        Phase::Disclosed => {
            debug!("Taking down the key on display for {}", session.key);
            session.secret = None;
            session.expires_at = None;
            events.push(SecretEvent::Cleared {
                key: session.key.clone(),
            });
        }
        Phase::Failed => {
            events.push(SecretEvent::Reverted {
                key: session.key.clone(),
                label: session.resting_label.clone(),
            });
        }
        _ => {}
    }

    session.phase = Phase::Idle;
    session.resume = Phase::Idle;
}

fn start_request(session: &mut SecretSession, events: &mut Vec<SecretEvent>) -> ProvisionRequest {
    debug!(
        "Requesting a key for {} (new secret: {})",
        session.key, session.as_new_secret
    );
    session.phase = Phase::Requesting;
    events.push(SecretEvent::Requesting {
        key: session.key.clone(),
        as_new_secret: session.as_new_secret,
    });

    ProvisionRequest {
        key: session.key.clone(),
        as_new_secret: session.as_new_secret,
    }
}

fn request_key<T: Transport>(
    client: &Client<T>,
    request: &ProvisionRequest,
) -> Result<String, ProvisionError> {
    let body = serde_json::to_value(NewKeyRequest {
        new_secret: request.as_new_secret,
    })
    .map_err(|cause| ProvisionError::Decode {
        key: request.key.clone(),
        cause,
    })?;

    let response = client.post(&request.path(), body)?;

    if response.status != 200 {
        return Err(ProvisionError::Http {
            key: request.key.clone(),
            status: response.status,
        });
    }

    let resp: NewKeyResponse = response.json().map_err(|cause| ProvisionError::Decode {
        key: request.key.clone(),
        cause,
    })?;

    Ok(resp.key)
}
