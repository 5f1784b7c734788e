//! Credential storage and periodic token refresh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;

/// The current credentials stamped on every request
///
/// The username is fixed for the lifetime of the manipulator; the password
/// may be replaced at any time by a token refresher, concurrently with
/// readers.
pub(crate) struct CredentialStore {
    username: String,
    password: Mutex<String>,
}

impl CredentialStore {
    pub(crate) fn new(username: String, password: String) -> Self {
        Self {
            username,
            password: Mutex::new(password),
        }
    }

    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> String {
        self.password.lock().clone()
    }

    pub(crate) fn set_password(&self, password: String) {
        *self.password.lock() = password;
    }
}

/// Source of bearer tokens for authenticating against the service
///
/// Implementations typically exchange client certificates with an identity
/// provider; the manipulator only cares about the resulting string.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn issue_token(&self) -> Result<String>;
}

/// Spawn the refresh task, minting a new token every `interval`
///
/// A failed refresh keeps the previous token. Rotation does not touch live
/// sockets; the new token is presented on the next redial.
pub(crate) fn spawn_refresher(
    credentials: Arc<CredentialStore>,
    provider: Arc<dyn TokenProvider>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial token is already
        // in place, so consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("refreshing access token");
                    match provider.issue_token().await {
                        Ok(token) => credentials.set_password(token),
                        Err(e) => warn!(error = %e, "unable to refresh token, keeping previous one"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("token refresher stopped");
                        return;
                    }
                }
            }
        }
    })
}
