//! Core types for the standby election.
//!
//! This module contains error types, connection and election state, and
//! other shared types used throughout the crate.

use std::{fmt, time::Duration};

/// Rank of a candidacy node.
///
/// Ranks are the numeric suffixes the coordination service appends to
/// sequential nodes. They are unique among siblings and strictly increasing
/// in creation order.
pub type Rank = u64;

/// Connection state of a coordination-service session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The session is connected.
    Connected,
    /// The connection was lost; the session may still be alive server-side.
    Disconnected,
    /// The session expired and every ephemeral node it owned is gone.
    Expired,
}

impl ConnectionState {
    /// Returns true if the session is currently connected.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Notification delivered by a one-shot existence watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The watched node was deleted.
    Deleted {
        /// Full path of the deleted node.
        path: String,
    },
    /// The watched node was created.
    Created {
        /// Full path of the created node.
        path: String,
    },
    /// The watched node's data changed.
    DataChanged {
        /// Full path of the changed node.
        path: String,
    },
}

impl NodeEvent {
    /// Returns the path the event refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::Deleted { path } | Self::Created { path } | Self::DataChanged { path } => path,
        }
    }

    /// Returns true for deletion notifications.
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

/// Metadata returned when a node exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStat {
    /// Session owning the node, zero for persistent nodes.
    pub ephemeral_owner: u64,
    /// Data version of the node.
    pub version: u32,
}

/// Observable state of a running election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Creating the candidacy node.
    Joining,
    /// Candidacy node created, ranking against siblings.
    Candidate,
    /// Waiting for the predecessor with the given rank to disappear.
    Watching {
        /// Rank of the watched predecessor.
        predecessor: Rank,
    },
    /// This process is the leader.
    Leader,
    /// The election finished, either by stop, failure, or lost leadership.
    Stopped,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joining => f.write_str("joining"),
            Self::Candidate => f.write_str("candidate"),
            Self::Watching { predecessor } => write!(f, "watching({predecessor})"),
            Self::Leader => f.write_str("leader"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Election progress report.
///
/// Fatal errors and forced loss of leadership share the [`Failed`] variant,
/// so a caller only has to watch one channel.
///
/// [`Failed`]: ElectionEvent::Failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    /// The candidacy node was created.
    Joined {
        /// Full path of the candidacy node.
        path: String,
        /// Rank parsed from the path.
        rank: Rank,
    },
    /// A deletion watch was armed on a predecessor.
    Watching {
        /// Own rank.
        rank: Rank,
        /// Rank of the watched predecessor.
        predecessor: Rank,
    },
    /// This process became the leader.
    Elected {
        /// Own rank.
        rank: Rank,
    },
    /// The election ended with an error or leadership was relinquished.
    Failed(ElectionError),
    /// The election was stopped by the caller.
    Stopped,
}

impl fmt::Display for ElectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { path, rank } => write!(f, "Joined {{ path: {path}, rank: {rank} }}"),
            Self::Watching { rank, predecessor } => {
                write!(f, "Watching {{ rank: {rank}, predecessor: {predecessor} }}")
            }
            Self::Elected { rank } => write!(f, "Elected {{ rank: {rank} }}"),
            Self::Failed(err) => write!(f, "Failed {{ {err} }}"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Errors reported by a coordination-service client for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The node (or its parent) does not exist.
    #[error("no node: {0}")]
    NoNode(String),

    /// The node already exists.
    #[error("node exists: {0}")]
    NodeExists(String),

    /// The connection is currently lost.
    #[error("connection loss")]
    ConnectionLoss,

    /// The session expired or was closed.
    #[error("session expired")]
    SessionExpired,

    /// Client-specific failure.
    #[error("client error: {0}")]
    Other(String),
}

/// Errors that end an election attempt or a leadership tenure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElectionError {
    /// The candidacy node could not be created.
    #[error("failed to create candidacy node under {root}: {source}")]
    Create {
        /// Election root path.
        root: String,
        /// Underlying client error.
        source: ClientError,
    },

    /// Listing the election root failed.
    #[error("failed to list children of {root}: {source}")]
    List {
        /// Election root path.
        root: String,
        /// Underlying client error.
        source: ClientError,
    },

    /// A deletion watch could not be armed.
    #[error("failed to arm watch on {path}: {source}")]
    WatchArm {
        /// Path of the predecessor.
        path: String,
        /// Underlying client error.
        source: ClientError,
    },

    /// A sibling name does not end in a sequence number.
    #[error("protocol violation: node {name:?} has no numeric sequence suffix")]
    ProtocolViolation {
        /// Offending node name.
        name: String,
    },

    /// Own candidacy node is missing from the sibling listing.
    #[error("candidacy node {path} vanished")]
    CandidacyVanished {
        /// Path of the candidacy node.
        path: String,
    },

    /// The session expired.
    #[error("coordination session lost")]
    SessionLost,

    /// The connection stayed down for longer than the grace period.
    #[error("disconnected for longer than the {grace:?} grace period")]
    DisconnectThreshold {
        /// The grace period that elapsed.
        grace: Duration,
    },

    /// The threshold fraction is not a positive finite number.
    #[error("invalid threshold fraction: {0}")]
    InvalidThreshold(String),
}

impl ElectionError {
    /// Returns true if this error means an established leader had to step
    /// down, as opposed to an election attempt failing.
    pub const fn is_leadership_loss(&self) -> bool {
        matches!(self, Self::SessionLost | Self::DisconnectThreshold { .. })
    }
}
