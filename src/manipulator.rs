//! The manipulator contract shared by every backend

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use crate::context::{Context, TransactionId};
use crate::error::Result;
use crate::frames::EventFrame;

/// Classification of an entity kind, analogous to a table or collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Singular name used on the wire and in events
    pub name: String,
    /// Plural category used as the storage bucket
    pub category: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }
}

/// An object a manipulator can move in and out of a backend
///
/// Marshaling is delegated to serde; a manipulable only has to know its
/// identity and carry its identifier.
pub trait Manipulable: Serialize + DeserializeOwned + Send + Sync {
    fn identity(&self) -> Identity;
    fn identifier(&self) -> &str;
    fn set_identifier(&mut self, id: String);
}

/// Handler invoked for every received event, or with the receive error that
/// interrupted the stream
pub type EventHandler = Arc<dyn Fn(Result<EventFrame>) + Send + Sync>;

/// Handler invoked once after each successful reconnection of a subscription
pub type RecoveryHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle for an active subscription
///
/// Dropping the handle does not stop the subscription; call
/// [`Subscription::unsubscribe`].
pub struct Subscription {
    stop: watch::Sender<bool>,
}

impl Subscription {
    pub(crate) fn new(stop: watch::Sender<bool>) -> Self {
        Self { stop }
    }

    /// Stop the subscription and close its socket
    pub fn unsubscribe(self) {
        let _ = self.stop.send(true);
    }
}

/// Uniform CRUD surface over some backend
#[async_trait]
pub trait Manipulator: Send + Sync {
    /// Retrieve all objects of the given identity into `dest`
    async fn retrieve_many<T: Manipulable>(
        &self,
        context: &Context,
        identity: &Identity,
        dest: &mut Vec<T>,
    ) -> Result<()>;

    /// Retrieve each object by its identifier, replacing its contents
    async fn retrieve<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()>;

    /// Create each object; identifiers are assigned by the backend
    async fn create<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()>;

    /// Update each object in place
    async fn update<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()>;

    /// Delete each object by its identifier
    async fn delete<T: Manipulable>(&self, context: &Context, objects: &mut [T]) -> Result<()>;

    /// Delete every object of the given identity
    async fn delete_many(&self, context: &Context, identity: &Identity) -> Result<()>;

    /// Count the objects of the given identity
    async fn count(&self, context: &Context, identity: &Identity) -> Result<u64>;

    /// Assign the given objects as the relations of a parent object
    async fn assign(
        &self,
        context: &Context,
        identity: &Identity,
        object_ids: &[String],
    ) -> Result<()>;

    /// Atomically add `amount` to a counter of the given identity
    async fn increment(
        &self,
        context: &Context,
        identity: &Identity,
        counter: &str,
        amount: i64,
    ) -> Result<()>;
}

/// A manipulator that can also push entity events to the caller
pub trait EventManipulator: Manipulator {
    /// Start receiving events for the given identities (empty = all)
    ///
    /// `handler` is invoked in arrival order with `Ok(event)` for each event
    /// passing the identity filter, and with `Err(error)` when the stream is
    /// interrupted. After an interruption the worker reconnects on its own;
    /// `recovery` is invoked exactly once per successful reconnection.
    fn subscribe(
        &self,
        identities: &[Identity],
        all_namespaces: bool,
        handler: EventHandler,
        recovery: Option<RecoveryHandler>,
    ) -> Result<Subscription>;
}

/// A manipulator whose write operations can be grouped into transactions
/// identified by [`Context::transaction_id`]
pub trait TransactionalManipulator: Manipulator {
    /// Apply all operations buffered under the given transaction ID
    fn commit(&self, id: &TransactionId) -> Result<()>;

    /// Discard all operations buffered under the given transaction ID,
    /// returning whether such a transaction existed
    fn abort(&self, id: &TransactionId) -> bool;
}
