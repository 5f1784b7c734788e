//! Event subscription worker
//!
//! Each subscription owns its own socket to the event endpoint, with its
//! own reconnect loop. Events lost during a disconnect window are gone;
//! there is no replay.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::config::WsConfig;
use super::credentials::CredentialStore;
use super::transport;
use crate::error::DroverError;
use crate::frames::EventFrame;
use crate::manipulator::{EventHandler, RecoveryHandler, Subscription};

/// Spawn the worker for one subscription and return its handle
pub(crate) fn spawn_subscription(
    config: WsConfig,
    credentials: Arc<CredentialStore>,
    identities: HashSet<String>,
    all_namespaces: bool,
    handler: EventHandler,
    recovery: Option<RecoveryHandler>,
) -> Subscription {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut needs_recovery = false;

        loop {
            if *stop_rx.borrow() {
                return;
            }

            let token = credentials.password();
            let (_sink, mut stream) =
                match transport::dial_events(&config, &token, all_namespaces).await {
                    Ok(halves) => halves,
                    Err(e) => {
                        warn!(error = %e, "events socket unavailable, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(config.reconnect_delay) => {}
                            changed = stop_rx.changed() => {
                                if changed.is_err() || *stop_rx.borrow() {
                                    return;
                                }
                            }
                        }
                        continue;
                    }
                };

            if needs_recovery {
                needs_recovery = false;
                if let Some(recovery) = &recovery {
                    recovery();
                }
            }

            let failure = loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            return;
                        }
                    }
                    frame = transport::read_frame::<EventFrame>(&mut stream) => match frame {
                        Ok(Some(event)) => {
                            if identities.is_empty() || identities.contains(&event.identity) {
                                handler(Ok(event));
                            }
                        }
                        Ok(None) => {
                            break DroverError::CannotCommunicate(
                                "events connection closed".to_string(),
                            );
                        }
                        Err(e) => break e,
                    }
                }
            };

            if *stop_rx.borrow() {
                return;
            }

            debug!(error = %failure, "events socket died, reconnecting");
            handler(Err(failure));
            needs_recovery = true;
        }
    });

    Subscription::new(stop_tx)
}
