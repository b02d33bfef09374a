//! Async adapter over a callback-style [`CoordinationClient`].
//!
//! Every operation settles exactly once into a `Result`, so the election
//! logic never touches raw callbacks.

use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    traits::{Callback, CoordinationClient},
    types::{ClientError, ElectionError, NodeEvent, NodeStat},
};

/// Outcome of arming a deletion watch.
#[derive(Debug)]
pub enum Armed {
    /// The node exists and the watch is armed.
    Watching(DeletionWatch),
    /// The node no longer existed when the watch was armed.
    Gone,
}

/// A single armed watch.
///
/// Dropping it disarms the watch locally: a notification that arrives
/// afterwards is discarded.
#[derive(Debug)]
pub struct DeletionWatch {
    path: String,
    stat: NodeStat,
    rx: oneshot::Receiver<NodeEvent>,
}

impl DeletionWatch {
    /// Path of the watched node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Node metadata observed when the watch was armed.
    pub const fn stat(&self) -> NodeStat {
        self.stat
    }

    /// Waits for the watch to fire.
    ///
    /// Returns `None` if the client dropped the watcher without firing it.
    pub async fn fired(&mut self) -> Option<NodeEvent> {
        (&mut self.rx).await.ok()
    }
}

/// Wraps a [`CoordinationClient`] into single-shot async operations.
#[derive(Clone)]
pub struct AsyncAdapter<C> {
    client: C,
}

impl<C: CoordinationClient> std::fmt::Debug for AsyncAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncAdapter").finish_non_exhaustive()
    }
}

impl<C: CoordinationClient> AsyncAdapter<C> {
    /// Creates a new adapter.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns a reference to the wrapped client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Creates an ephemeral sequential candidacy node named `prefix` under `root`.
    ///
    /// Returns the full path of the created node.
    pub async fn create_candidacy(
        &self,
        root: &str,
        prefix: &str,
    ) -> Result<String, ElectionError> {
        let path = format!("{}/{prefix}", root.trim_end_matches('/'));
        settle(|callback| self.client.create_ephemeral_sequential(&path, callback))
            .await
            .map_err(|source| ElectionError::Create { root: root.to_string(), source })
    }

    /// Lists the children of `root` in the order the client returned them.
    pub async fn list_children(&self, root: &str) -> Result<Vec<String>, ElectionError> {
        settle(|callback| self.client.get_children(root, callback))
            .await
            .map_err(|source| ElectionError::List { root: root.to_string(), source })
    }

    /// Arms a one-shot watch on `path`.
    ///
    /// A node that is already gone is reported as [`Armed::Gone`] rather than
    /// as an error, so the caller can re-evaluate immediately.
    pub async fn watch_deletion(&self, path: &str) -> Result<Armed, ElectionError> {
        let (tx, rx) = oneshot::channel();
        let watcher = Box::new(move |event: NodeEvent| {
            if tx.send(event).is_err() {
                debug!("discarding notification for a disarmed watch");
            }
        });

        let stat = settle(|callback| self.client.exists(path, watcher, callback))
            .await
            .map_err(|source| ElectionError::WatchArm { path: path.to_string(), source })?;

        Ok(match stat {
            Some(stat) => Armed::Watching(DeletionWatch { path: path.to_string(), stat, rx }),
            None => Armed::Gone,
        })
    }

    /// Deletes a candidacy node.
    pub async fn delete_candidacy(&self, path: &str) -> Result<(), ClientError> {
        settle(|callback| self.client.delete(path, callback)).await
    }
}

/// Issues a callback-style call and waits for its single result.
async fn settle<T, F>(call: F) -> Result<T, ClientError>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>),
{
    let (tx, rx) = oneshot::channel();
    call(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    rx.await
        .unwrap_or_else(|_| Err(ClientError::Other("client dropped the callback".to_string())))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{MemoryService, Operation};

    fn setup() -> (MemoryService, AsyncAdapter<crate::memory::MemorySession>) {
        let service = MemoryService::new();
        service.ensure_path("/election").unwrap();
        let session = service.session(Duration::from_secs(3));
        (service, AsyncAdapter::new(session))
    }

    #[tokio::test]
    async fn test_create_candidacy() {
        let (_service, adapter) = setup();
        let path = adapter.create_candidacy("/election", "guid-n_").await.unwrap();
        assert_eq!(path, "/election/guid-n_0000000000");

        let path = adapter.create_candidacy("/election/", "guid-n_").await.unwrap();
        assert_eq!(path, "/election/guid-n_0000000001");
    }

    #[tokio::test]
    async fn test_create_without_root() {
        let (_service, adapter) = setup();
        let err = adapter.create_candidacy("/missing", "guid-n_").await.unwrap_err();
        assert_eq!(
            err,
            ElectionError::Create {
                root: "/missing".to_string(),
                source: ClientError::NoNode("/missing".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_list_children_error() {
        let (service, adapter) = setup();
        service.fail_next(Operation::GetChildren, ClientError::ConnectionLoss);
        let err = adapter.list_children("/election").await.unwrap_err();
        assert!(matches!(err, ElectionError::List { source: ClientError::ConnectionLoss, .. }));

        // One-shot: the next call succeeds.
        assert!(adapter.list_children("/election").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_missing_node_is_gone() {
        let (_service, adapter) = setup();
        let armed = adapter.watch_deletion("/election/guid-n_0000000009").await.unwrap();
        assert!(matches!(armed, Armed::Gone));
    }

    #[tokio::test]
    async fn test_watch_fires_on_delete() {
        let (_service, adapter) = setup();
        let path = adapter.create_candidacy("/election", "guid-n_").await.unwrap();

        let Armed::Watching(mut watch) = adapter.watch_deletion(&path).await.unwrap() else {
            panic!("expected an armed watch");
        };
        assert_eq!(watch.path(), path);

        adapter.delete_candidacy(&path).await.unwrap();
        assert_eq!(watch.fired().await, Some(NodeEvent::Deleted { path }));
    }

    #[tokio::test]
    async fn test_watch_arm_error() {
        let (service, adapter) = setup();
        service.fail_next(Operation::Exists, ClientError::SessionExpired);
        let err = adapter.watch_deletion("/election/guid-n_0000000001").await.unwrap_err();
        assert!(matches!(err, ElectionError::WatchArm { source: ClientError::SessionExpired, .. }));
    }

    #[tokio::test]
    async fn test_dropped_callback_settles_as_error() {
        let result: Result<(), ClientError> = settle(|callback| drop(callback)).await;
        assert!(matches!(result, Err(ClientError::Other(_))));
    }
}
