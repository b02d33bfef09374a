//! Core trait abstractions for the standby election.
//!
//! This module defines the capability set the election consumes from a
//! coordination service:
//!
//! - [`CoordinationClient`]: callback-style node operations plus session
//!   and connection-state access

use std::{pin::Pin, time::Duration};

use crate::types::{ClientError, ConnectionState, NodeEvent, NodeStat};

/// Completion callback for a single client operation.
///
/// Invoked exactly once with either the value or the error.
pub type Callback<T> = Box<dyn FnOnce(Result<T, ClientError>) + Send + 'static>;

/// One-shot watcher invoked at most once with a node notification.
pub type Watcher = Box<dyn FnOnce(NodeEvent) + Send + 'static>;

/// A stream of connection-state changes.
///
/// This is a boxed stream to allow for different implementations.
pub type StateStream = Pin<Box<dyn futures::Stream<Item = ConnectionState> + Send>>;

/// Abstraction over a ZooKeeper-like coordination-service client.
///
/// Implementations only need to expose the primitives the service already
/// guarantees: atomic sequential naming, ephemeral lifetime tied to the
/// session, and one-shot watches. Callbacks may run on any thread, but the
/// client must not invoke the callbacks of one call more than once.
///
/// # Example
///
/// ```ignore
/// use standby::{Callback, CoordinationClient};
///
/// #[derive(Clone)]
/// struct ZkClient { inner: Arc<zk::Client> }
///
/// impl CoordinationClient for ZkClient {
///     fn create_ephemeral_sequential(&self, path: &str, callback: Callback<String>) {
///         let inner = Arc::clone(&self.inner);
///         let path = path.to_string();
///         tokio::spawn(async move {
///             let result = inner.create(&path, CreateMode::EphemeralSequential).await;
///             callback(result.map_err(into_client_error))
///         });
///     }
///     // ...
/// }
/// ```
pub trait CoordinationClient: Clone + Send + Sync + 'static {
    /// Creates an ephemeral, sequential node whose name starts with `path`.
    ///
    /// The callback receives the full path including the sequence suffix.
    fn create_ephemeral_sequential(&self, path: &str, callback: Callback<String>);

    /// Lists the names (not full paths) of the children of `path`.
    ///
    /// The order of the returned names is unspecified.
    fn get_children(&self, path: &str, callback: Callback<Vec<String>>);

    /// Checks whether `path` exists and leaves a one-shot watch on it.
    ///
    /// The callback receives `None` if the node does not exist.
    fn exists(&self, path: &str, watcher: Watcher, callback: Callback<Option<NodeStat>>);

    /// Deletes the node at `path`.
    fn delete(&self, path: &str, callback: Callback<()>);

    /// Returns the session timeout negotiated with the service.
    fn session_timeout(&self) -> Duration;

    /// Returns the current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Subscribes to connection-state changes.
    ///
    /// Returns a stream that emits every transition observed after the call.
    fn subscribe_state(&self) -> StateStream;
}
