//! Push-link pairing.
//!
//! The hub opens a short pairing window on `PUT ?cmd=pushLink&start`. Once the
//! physical button is pressed, `GET ?cmd=pushLink&status` answers with the
//! hub password for the `user` id that opened the window.

use std::{fmt, time::Duration};

use reqwest::Method;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{models::redact_secrets, Call, PoolSyncClient, PushLinkStatus, RawResponse};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Starting,
    Polling,
    Succeeded,
    FailedTimeout,
    FailedRejected,
}

/// Terminal outcome of a handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Succeeded {
        mac_address: Option<String>,
        password: String,
    },
    /// The hub refused to open the window, or closed it without credentials.
    Rejected { reason: String },
    TimedOut,
}

impl fmt::Debug for PairingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { mac_address, password } => f
                .debug_struct("Succeeded")
                .field("mac_address", mac_address)
                .field("password_len", &password.len())
                .finish(),
            Self::Rejected { reason } => f.debug_struct("Rejected").field("reason", reason).finish(),
            Self::TimedOut => f.write_str("TimedOut"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingResult {
    pub outcome: PairingOutcome,
    /// The `user` header value used for every handshake request. Must be
    /// persisted together with the password.
    pub user_id: String,
    /// Number of status polls issued.
    pub polls: u32,
}

impl PairingResult {
    pub fn state(&self) -> PairingState {
        match self.outcome {
            PairingOutcome::Succeeded { .. } => PairingState::Succeeded,
            PairingOutcome::Rejected { .. } => PairingState::FailedRejected,
            PairingOutcome::TimedOut => PairingState::FailedTimeout,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PairingOutcome::Succeeded { .. })
    }

    pub fn password(&self) -> Option<&str> {
        match &self.outcome {
            PairingOutcome::Succeeded { password, .. } => Some(password),
            _ => None,
        }
    }

    pub fn mac_address(&self) -> Option<&str> {
        match &self.outcome {
            PairingOutcome::Succeeded { mac_address, .. } => mac_address.as_deref(),
            _ => None,
        }
    }
}

fn enter(state: &mut PairingState, next: PairingState) {
    debug!(from = ?state, to = ?next, "push-link state change");
    *state = next;
}

impl PoolSyncClient {
    /// Run the push-link handshake to completion.
    ///
    /// When `user_id` is `None` an ephemeral UUID is generated. On success the
    /// password and user id become this client's credentials immediately.
    /// The loop never runs past `timeout`; no request is sent after it elapses.
    pub async fn pairing_handshake(
        &self,
        user_id: Option<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> PairingResult {
        let provided = user_id.filter(|u| !u.is_empty());
        let user = provided
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let deadline = Instant::now() + timeout;
        let request_timeout = self.inner.request_timeout;
        let mut state = PairingState::Starting;
        let user_kind = if provided.is_some() { "provided" } else { "ephemeral" };

        info!(
            base_url = %self.inner.base_url,
            user = user_kind,
            poll_ms = poll_interval.as_millis() as u64,
            timeout_secs = timeout.as_secs(),
            "Starting push-link"
        );

        let start = self
            .request_json(Call {
                method: Method::PUT,
                query: "cmd=pushLink&start",
                user: Some(&user),
                body: None,
                timeout: request_timeout.min(timeout),
            })
            .await;
        if start.status != 200 {
            enter(&mut state, PairingState::FailedRejected);
            let reason = format!(
                "pushLink start failed: status={}, body={}",
                start.status, start.body
            );
            warn!(reason = %reason, "push-link rejected");
            return PairingResult {
                outcome: PairingOutcome::Rejected { reason },
                user_id: user,
                polls: 0,
            };
        }

        enter(&mut state, PairingState::Polling);
        let mut polls = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                enter(&mut state, PairingState::FailedTimeout);
                info!(polls, timeout_secs = timeout.as_secs(), "push-link timed out");
                return PairingResult {
                    outcome: PairingOutcome::TimedOut,
                    user_id: user,
                    polls,
                };
            }

            polls += 1;
            let raw = self
                .request_json(Call {
                    method: Method::GET,
                    query: "cmd=pushLink&status",
                    user: Some(&user),
                    body: None,
                    timeout: request_timeout.min(deadline - now),
                })
                .await;
            self.log_poll(polls, &raw);

            let status = (raw.status == 200)
                .then(|| raw.json.as_ref().and_then(PushLinkStatus::from_json))
                .flatten();

            if let Some(status) = status {
                if let Some(password) = status.password {
                    enter(&mut state, PairingState::Succeeded);
                    if let Some(mac) = status.mac_address.as_deref() {
                        self.learn_mac(mac).await;
                    }
                    self.adopt_credentials(password.clone(), user.clone()).await;

                    if self.inner.unmask_logs {
                        info!(
                            mac = status.mac_address.as_deref().unwrap_or("?"),
                            password = %password,
                            polls,
                            "push-link succeeded"
                        );
                    } else {
                        info!(
                            mac = status.mac_address.as_deref().unwrap_or("?"),
                            password_len = password.len(),
                            polls,
                            "push-link succeeded"
                        );
                    }

                    return PairingResult {
                        outcome: PairingOutcome::Succeeded {
                            mac_address: status.mac_address,
                            password,
                        },
                        user_id: user,
                        polls,
                    };
                }

                if let Some(remaining) = status.time_remaining.filter(|r| *r <= 0) {
                    enter(&mut state, PairingState::FailedRejected);
                    info!(time_remaining = remaining, polls, "push-link window ended without password");
                    return PairingResult {
                        outcome: PairingOutcome::Rejected {
                            reason: "push-link ended without password".to_owned(),
                        },
                        user_id: user,
                        polls,
                    };
                }
            }

            time::sleep(poll_interval).await;
        }
    }

    fn log_poll(&self, poll: u32, raw: &RawResponse) {
        if self.inner.unmask_logs {
            debug!(poll, status = raw.status, body = %raw.body, "push-link poll");
            return;
        }
        match &raw.json {
            Some(json) => {
                debug!(poll, status = raw.status, body = %redact_secrets(json), "push-link poll")
            }
            None => debug!(
                poll,
                status = raw.status,
                body_len = raw.body.len(),
                "push-link poll (non-JSON body)"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
