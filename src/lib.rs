//! Drover - uniform CRUD + subscribe clients for remote object services
//!
//! A family of data-access "manipulators" sharing one contract over
//! heterogeneous backends: a multiplexed WebSocket client with automatic
//! reconnection and token refresh, and an embedded in-memory store for
//! tests and tooling, plus a page-wise retrieval helper.
//!
//! # Example
//!
//! ```no_run
//! use drover::{Context, Manipulator, WebSocketManipulator, WsConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> drover::Result<()> {
//!     let config = WsConfig::new("https://service.example.com", "user", "secret")
//!         .namespace("/acme")
//!         .request_timeout(Duration::from_secs(30));
//!
//!     let manipulator = WebSocketManipulator::connect(config).await?;
//!
//!     let total = manipulator
//!         .count(&Context::new(), &drover::Identity::new("thing", "things"))
//!         .await?;
//!     println!("{total} things");
//!
//!     manipulator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod frames;
pub mod iter;
pub mod manipulator;
pub mod memory;
pub mod websocket;

pub use context::{Context, TransactionId};
pub use error::{DroverError, Result};
pub use frames::{
    ErrorDescriptor, EventFrame, EventKind, Operation, RequestFrame, ResponseFrame,
};
pub use iter::{iter, iter_func};
pub use manipulator::{
    EventHandler, EventManipulator, Identity, Manipulable, Manipulator, RecoveryHandler,
    Subscription, TransactionalManipulator,
};
pub use memory::MemoryManipulator;
pub use websocket::{TokenProvider, WebSocketManipulator, WsConfig};
