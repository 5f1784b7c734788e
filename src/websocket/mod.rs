//! WebSocket-backed manipulator
//!
//! A long-lived, multiplexed request/response client over a single
//! WebSocket connection, plus a parallel event-subscription channel,
//! bearer-token authentication with periodic refresh, and automatic
//! reconnection.
//!
//! # Example
//!
//! ```no_run
//! use drover::{Context, Manipulator, WebSocketManipulator, WsConfig};
//!
//! # async fn example() -> drover::Result<()> {
//! let config = WsConfig::new("https://service.example.com", "user", "secret")
//!     .namespace("/acme");
//!
//! let manipulator = WebSocketManipulator::connect(config).await?;
//! let count = manipulator
//!     .count(&Context::new(), &drover::Identity::new("thing", "things"))
//!     .await?;
//! # manipulator.stop().await;
//! # let _ = count;
//! # Ok(())
//! # }
//! ```

mod config;
mod credentials;
mod router;
mod subscribe;
mod transport;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::SinkExt;
use tokio::sync::watch;
use tracing::{info, warn};

pub use config::WsConfig;
pub use credentials::TokenProvider;

use credentials::CredentialStore;
use router::ResponseRouter;
use transport::{WsSink, WsStream};

use crate::context::Context;
use crate::error::{DroverError, Result};
use crate::frames::{decode_errors, Operation, RequestFrame, ResponseFrame};
use crate::manipulator::{
    EventHandler, EventManipulator, Identity, Manipulable, Manipulator, RecoveryHandler,
    Subscription,
};

/// A manipulator backed by the remote WebSocket API
///
/// Construction dials the request socket and performs the handshake; the
/// value only exists once the connection is up. A background receive loop
/// dispatches responses to waiting callers and reconnects on failure.
/// Cheaply cloneable; all clones share the same connection.
#[derive(Clone)]
pub struct WebSocketManipulator {
    inner: Arc<Inner>,
}

struct Inner {
    config: WsConfig,
    credentials: Arc<CredentialStore>,
    router: ResponseRouter,
    /// Write half of the request socket; `None` before a reconnect lands
    /// a new sink, and after `stop`.
    sink: tokio::sync::Mutex<Option<WsSink>>,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl WebSocketManipulator {
    /// Connect with the credentials carried in the configuration
    pub async fn connect(config: WsConfig) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::new(
            config.username.clone(),
            config.password.clone(),
        ));

        Self::boot(config, credentials).await
    }

    /// Connect with a token minted by `provider`, refreshed every
    /// `refresh_interval`
    ///
    /// The username is fixed to `Bearer`; rotation updates the token used on
    /// subsequent redials and does not touch live sockets.
    pub async fn connect_with_token_provider(
        config: WsConfig,
        provider: Arc<dyn TokenProvider>,
        refresh_interval: Duration,
    ) -> Result<Self> {
        let token = provider.issue_token().await?;
        let credentials = Arc::new(CredentialStore::new("Bearer".to_string(), token));

        let manipulator = Self::boot(config, credentials).await?;

        credentials::spawn_refresher(
            manipulator.inner.credentials.clone(),
            provider,
            refresh_interval,
            manipulator.inner.stop_tx.subscribe(),
        );

        Ok(manipulator)
    }

    async fn boot(config: WsConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let token = credentials.password();
        let (sink, stream) = transport::dial_api(&config, &token).await?;

        info!(url = %config.url, namespace = %config.namespace, "connected");

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            config,
            credentials,
            router: ResponseRouter::new(),
            sink: tokio::sync::Mutex::new(Some(sink)),
            running: AtomicBool::new(true),
            stop_tx,
        });

        tokio::spawn(receive_loop(inner.clone(), stream, stop_rx));

        Ok(Self { inner })
    }

    /// Shut the manipulator down
    ///
    /// In-flight requests fail with a communication error; background loops
    /// exit. Calling `stop` more than once is a no-op.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.stop_tx.send(true);

        let mut guard = self.inner.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.close().await;
        }

        info!("stopped");
    }

    /// Whether the manipulator has not been stopped
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn base_request(
        &self,
        operation: Operation,
        identity: &Identity,
        context: &Context,
    ) -> RequestFrame {
        let mut request = RequestFrame::new(
            operation,
            self.inner.config.namespace.clone(),
            identity.name.clone(),
            self.inner.credentials.username(),
            self.inner.credentials.password(),
        );
        request.parameters = context.query_parameters();
        request
    }

    /// Write one request and wait for its response or the timeout
    async fn send_request(&self, request: RequestFrame) -> Result<ResponseFrame> {
        let inner = &self.inner;
        let rx = inner.router.register(&request.request_id);

        {
            let mut guard = inner.sink.lock().await;
            let sink = match guard.as_mut() {
                Some(sink) => sink,
                None => {
                    inner.router.unregister(&request.request_id);
                    return Err(DroverError::CannotCommunicate(
                        "websocket not initialized".to_string(),
                    ));
                }
            };

            if let Err(e) = transport::send_frame(sink, &request).await {
                inner.router.unregister(&request.request_id);
                return Err(e);
            }
        }

        match tokio::time::timeout(inner.config.request_timeout, rx).await {
            Ok(Ok(response)) => {
                if !response.is_success() {
                    return Err(decode_errors(&response));
                }
                Ok(response)
            }
            // The waiter was dropped by a reconnect; no response will come.
            Ok(Err(_)) => Err(DroverError::CannotCommunicate(
                "connection lost while waiting for response".to_string(),
            )),
            Err(_) => {
                inner.router.unregister(&request.request_id);
                Err(DroverError::CannotCommunicate("Request timeout".to_string()))
            }
        }
    }
}

#[async_trait]
impl Manipulator for WebSocketManipulator {
    async fn retrieve_many<T: Manipulable>(
        &self,
        context: &Context,
        identity: &Identity,
        dest: &mut Vec<T>,
    ) -> Result<()> {
        let request = self.base_request(Operation::RetrieveMany, identity, context);
        let response = self.send_request(request).await?;
        *dest = response.decode()?;
        Ok(())
    }

    async fn retrieve<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter_mut() {
            let mut request = self.base_request(Operation::Retrieve, &object.identity(), context);
            request.object_id = Some(object.identifier().to_string());
            request.encode_body(object)?;

            let response = self.send_request(request).await?;
            *object = response.decode()?;
        }

        Ok(())
    }

    async fn create<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter_mut() {
            let mut request = self.base_request(Operation::Create, &object.identity(), context);
            request.encode_body(object)?;

            let response = self.send_request(request).await?;
            *object = response.decode()?;
        }

        Ok(())
    }

    async fn update<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter_mut() {
            let mut request = self.base_request(Operation::Update, &object.identity(), context);
            request.object_id = Some(object.identifier().to_string());
            request.encode_body(object)?;

            let response = self.send_request(request).await?;
            *object = response.decode()?;
        }

        Ok(())
    }

    async fn delete<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()> {
        for object in objects.iter_mut() {
            let mut request = self.base_request(Operation::Delete, &object.identity(), context);
            request.object_id = Some(object.identifier().to_string());
            request.encode_body(object)?;

            let response = self.send_request(request).await?;
            *object = response.decode()?;
        }

        Ok(())
    }

    async fn delete_many(&self, _context: &Context, _identity: &Identity) -> Result<()> {
        Err(DroverError::NotImplemented(
            "DeleteMany is not supported by the websocket manipulator".to_string(),
        ))
    }

    async fn count(&self, context: &Context, identity: &Identity) -> Result<u64> {
        let request = self.base_request(Operation::Info, identity, context);
        let response = self.send_request(request).await?;
        Ok(response.total)
    }

    async fn assign(
        &self,
        _context: &Context,
        _identity: &Identity,
        _object_ids: &[String],
    ) -> Result<()> {
        Err(DroverError::NotImplemented(
            "Assign is not supported by the websocket manipulator".to_string(),
        ))
    }

    async fn increment(
        &self,
        _context: &Context,
        _identity: &Identity,
        _counter: &str,
        _amount: i64,
    ) -> Result<()> {
        Err(DroverError::NotImplemented(
            "Increment is not supported by the websocket manipulator".to_string(),
        ))
    }
}

impl EventManipulator for WebSocketManipulator {
    fn subscribe(
        &self,
        identities: &[Identity],
        all_namespaces: bool,
        handler: EventHandler,
        recovery: Option<RecoveryHandler>,
    ) -> Result<Subscription> {
        let names: HashSet<String> = identities.iter().map(|i| i.name.clone()).collect();

        Ok(subscribe::spawn_subscription(
            self.inner.config.clone(),
            self.inner.credentials.clone(),
            names,
            all_namespaces,
            handler,
            recovery,
        ))
    }
}

/// Receive loop for the request socket
///
/// Owns the read half. Delivers responses to the router; on failure while
/// running, clears the router and redials until the connection is restored,
/// installing the new write half for senders.
async fn receive_loop(inner: Arc<Inner>, mut stream: WsStream, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let failure = tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
                continue;
            }
            frame = transport::read_frame::<ResponseFrame>(&mut stream) => match frame {
                Ok(Some(response)) => {
                    inner.router.deliver(response);
                    continue;
                }
                Ok(None) => DroverError::CannotCommunicate("connection closed by server".to_string()),
                Err(e) => e,
            }
        };

        if !inner.running.load(Ordering::SeqCst) {
            return;
        }

        warn!(error = %failure, "api socket died, reconnecting");

        stream = loop {
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }

            // Waiters registered against the dead socket can never be
            // answered; release them before redialing.
            inner.router.clear();

            let token = inner.credentials.password();
            match transport::dial_api(&inner.config, &token).await {
                Ok((sink, stream)) => {
                    if !inner.running.load(Ordering::SeqCst) {
                        return;
                    }
                    *inner.sink.lock().await = Some(sink);
                    info!("api socket restored");
                    break stream;
                }
                Err(e) => {
                    warn!(error = %e, "api socket unavailable, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        };
    }
}

impl std::fmt::Debug for WebSocketManipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketManipulator").finish_non_exhaustive()
    }
}
