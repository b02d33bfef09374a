//! In-memory coordination service.
//!
//! [`MemoryService`] holds a node tree shared by any number of
//! [`MemorySession`]s, each of which implements [`CoordinationClient`].
//! Useful for testing or for simulating a cluster inside one process.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::stream;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    traits::{Callback, CoordinationClient, StateStream, Watcher},
    types::{ClientError, ConnectionState, NodeEvent, NodeStat},
};

/// Session identifier. Zero marks persistent nodes.
pub type SessionId = u64;

/// Client operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Sequential node creation.
    Create,
    /// Children listing.
    GetChildren,
    /// Existence check with watch.
    Exists,
    /// Node deletion.
    Delete,
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    owner: SessionId,
    version: u32,
    next_sequence: u64,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<Watcher>>,
    failures: HashMap<Operation, ClientError>,
    next_session: SessionId,
}

/// Pending watch notifications, fired once the tree lock is released.
type Fired = Vec<(Watcher, NodeEvent)>;

impl Tree {
    fn parent(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        }
    }

    fn take_watches(&mut self, path: &str, event: &NodeEvent, fired: &mut Fired) {
        if let Some(watchers) = self.watches.remove(path) {
            fired.extend(watchers.into_iter().map(|w| (w, event.clone())));
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create_sequential(&mut self, owner: SessionId, path: &str) -> Result<String, ClientError> {
        let parent = Self::parent(path);
        let node =
            self.nodes.get_mut(parent).ok_or_else(|| ClientError::NoNode(parent.to_string()))?;
        let sequence = node.next_sequence;
        node.next_sequence += 1;

        let full = format!("{path}{sequence:010}");
        self.nodes.insert(full.clone(), Node { owner, ..Node::default() });
        Ok(full)
    }

    fn delete(&mut self, path: &str, fired: &mut Fired) -> Result<(), ClientError> {
        if !self.nodes.contains_key(path) {
            return Err(ClientError::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(ClientError::Other(format!("node {path} is not empty")));
        }
        self.nodes.remove(path);
        self.take_watches(path, &NodeEvent::Deleted { path: path.to_string() }, fired);
        Ok(())
    }
}

/// A shared in-memory node tree.
#[derive(Clone)]
pub struct MemoryService {
    tree: Arc<Mutex<Tree>>,
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService").field("nodes", &self.lock().nodes.len()).finish()
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    /// Creates an empty service containing only the root node.
    pub fn new() -> Self {
        let mut tree = Tree { next_session: 1, ..Tree::default() };
        tree.nodes.insert("/".to_string(), Node::default());
        Self { tree: Arc::new(Mutex::new(tree)) }
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a persistent node at `path` and any missing parents.
    ///
    /// # Errors
    ///
    /// Fails if `path` is not absolute.
    pub fn ensure_path(&self, path: &str) -> Result<(), ClientError> {
        if !path.starts_with('/') {
            return Err(ClientError::Other(format!("path {path} is not absolute")));
        }
        let mut tree = self.lock();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            tree.nodes.entry(current.clone()).or_default();
        }
        Ok(())
    }

    /// Returns the child names of `path`, sorted.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.lock().children(path)
    }

    /// Returns true if a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    /// Deletes a node on behalf of an outside actor, firing its watches.
    pub fn remove(&self, path: &str) -> Result<(), ClientError> {
        let mut fired = Fired::new();
        let result = self.lock().delete(path, &mut fired);
        fire(fired);
        result
    }

    /// Bumps the version of a node, firing a data-change notification.
    pub fn touch(&self, path: &str) -> Result<(), ClientError> {
        let mut fired = Fired::new();
        let result = {
            let mut tree = self.lock();
            let Some(node) = tree.nodes.get_mut(path) else {
                return Err(ClientError::NoNode(path.to_string()));
            };
            node.version += 1;
            tree.take_watches(path, &NodeEvent::DataChanged { path: path.to_string() }, &mut fired);
            Ok(())
        };
        fire(fired);
        result
    }

    /// Makes the next call of `operation` fail with `error`, once.
    pub fn fail_next(&self, operation: Operation, error: ClientError) {
        self.lock().failures.insert(operation, error);
    }

    /// Opens a new connected session.
    pub fn session(&self, timeout: Duration) -> MemorySession {
        let id = {
            let mut tree = self.lock();
            let id = tree.next_session;
            tree.next_session += 1;
            id
        };
        let (state_tx, _) = broadcast::channel(16);
        debug!(session = id, "opened session");
        MemorySession {
            service: self.clone(),
            id,
            timeout,
            state: Arc::new(Mutex::new(ConnectionState::Connected)),
            state_tx,
        }
    }

    fn take_failure(&self, operation: Operation) -> Option<ClientError> {
        self.lock().failures.remove(&operation)
    }

    fn drop_ephemerals(&self, owner: SessionId) -> usize {
        let mut fired = Fired::new();
        let removed = {
            let mut tree = self.lock();
            let owned: Vec<String> = tree
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == owner)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &owned {
                tree.nodes.remove(path);
                tree.take_watches(path, &NodeEvent::Deleted { path: path.clone() }, &mut fired);
            }
            owned.len()
        };
        fire(fired);
        removed
    }
}

fn fire(fired: Fired) {
    for (watcher, event) in fired {
        watcher(event);
    }
}

/// A client session on a [`MemoryService`].
///
/// Clones share the same session.
#[derive(Clone)]
pub struct MemorySession {
    service: MemoryService,
    id: SessionId,
    timeout: Duration,
    state: Arc<Mutex<ConnectionState>>,
    state_tx: broadcast::Sender<ConnectionState>,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl MemorySession {
    /// Returns the session identifier.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Simulates a lost connection. The session and its nodes stay alive.
    pub fn disconnect(&self) {
        self.transition(|current| current.is_connected().then_some(ConnectionState::Disconnected));
    }

    /// Restores a lost connection. Has no effect on an expired session.
    pub fn reconnect(&self) {
        self.transition(|current| {
            (current == ConnectionState::Disconnected).then_some(ConnectionState::Connected)
        });
    }

    /// Expires the session, deleting every ephemeral node it owns.
    pub fn expire(&self) {
        if self.transition(|current| {
            (current != ConnectionState::Expired).then_some(ConnectionState::Expired)
        }) {
            let removed = self.service.drop_ephemerals(self.id);
            info!(session = self.id, removed, "session expired");
        }
    }

    fn transition(&self, next: impl FnOnce(ConnectionState) -> Option<ConnectionState>) -> bool {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            next(*state).map(|new| {
                *state = new;
                new
            })
        };
        match changed {
            Some(state) => {
                debug!(session = self.id, %state, "connection state changed");
                if self.state_tx.send(state).is_err() {
                    debug!(session = self.id, "no connection state subscribers");
                }
                true
            }
            None => false,
        }
    }

    fn check(&self, operation: Operation) -> Result<(), ClientError> {
        match self.connection_state() {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected => return Err(ClientError::ConnectionLoss),
            ConnectionState::Expired => return Err(ClientError::SessionExpired),
        }
        self.service.take_failure(operation).map_or(Ok(()), Err)
    }
}

impl CoordinationClient for MemorySession {
    fn create_ephemeral_sequential(&self, path: &str, callback: Callback<String>) {
        let result = self
            .check(Operation::Create)
            .and_then(|()| self.service.lock().create_sequential(self.id, path));
        callback(result);
    }

    fn get_children(&self, path: &str, callback: Callback<Vec<String>>) {
        let result = self.check(Operation::GetChildren).and_then(|()| {
            let tree = self.service.lock();
            if tree.nodes.contains_key(path) {
                Ok(tree.children(path))
            } else {
                Err(ClientError::NoNode(path.to_string()))
            }
        });
        callback(result);
    }

    fn exists(&self, path: &str, watcher: Watcher, callback: Callback<Option<NodeStat>>) {
        let result = self.check(Operation::Exists).map(|()| {
            let mut tree = self.service.lock();
            let stat = tree
                .nodes
                .get(path)
                .map(|node| NodeStat { ephemeral_owner: node.owner, version: node.version });
            // Missing nodes are not watched; callers re-evaluate instead.
            if stat.is_some() {
                tree.watches.entry(path.to_string()).or_default().push(watcher);
            }
            stat
        });
        callback(result);
    }

    fn delete(&self, path: &str, callback: Callback<()>) {
        let mut fired = Fired::new();
        let result = self
            .check(Operation::Delete)
            .and_then(|()| self.service.lock().delete(path, &mut fired));
        fire(fired);
        callback(result);
    }

    fn session_timeout(&self) -> Duration {
        self.timeout
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe_state(&self) -> StateStream {
        let rx = self.state_tx.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(state) => return Some((state, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "connection state subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}
