//! Configuration for the WebSocket manipulator

use std::time::Duration;

/// Configuration for connecting to the remote service
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// HTTP(S) base URL of the service; rewritten to ws(s) when dialing
    pub url: String,

    /// Namespace presented on both sockets
    pub namespace: String,

    /// Username stamped on every request
    pub username: String,

    /// Initial password or token; may be rotated by a token provider
    pub password: String,

    /// PEM-encoded root CA bundle, when the system roots are not enough
    pub root_ca_pem: Option<Vec<u8>>,

    /// Whether to skip TLS certificate verification (for development)
    pub skip_tls_verify: bool,

    /// Whether to ask the request socket for responses from all namespaces
    pub receive_all: bool,

    /// How long a caller waits for a response before giving up
    pub request_timeout: Duration,

    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,
}

impl WsConfig {
    /// Create a configuration with the given endpoint and credentials
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            namespace: String::new(),
            username: username.into(),
            password: password.into(),
            root_ca_pem: None,
            skip_tls_verify: false,
            receive_all: false,
            request_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Trust the given PEM-encoded root CA bundle
    pub fn root_ca_pem(mut self, pem: Vec<u8>) -> Self {
        self.root_ca_pem = Some(pem);
        self
    }

    /// Skip TLS certificate verification (DANGEROUS - only for development)
    pub fn dangerous_skip_tls_verify(mut self) -> Self {
        self.skip_tls_verify = true;
        self
    }

    /// Receive responses from all namespaces on the request socket
    pub fn receive_all(mut self) -> Self {
        self.receive_all = true;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}
