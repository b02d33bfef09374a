//! Disconnect-threshold watchdog.
//!
//! A [`Watchdog`] lives for exactly one leadership [`Tenure`]. Every
//! `disconnected` notification arms a one-shot check `grace` later; if the
//! session is still not connected when a check fires, leadership is lost.
//! An `expired` notification ends the tenure immediately.

use std::{collections::VecDeque, fmt, future, time::Duration};

use futures::StreamExt;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::{
    traits::{CoordinationClient, StateStream},
    types::{ConnectionState, ElectionError, Rank},
};

/// Action run when a leadership tenure ends.
pub type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// A leadership tenure and its optional cleanup action.
///
/// The cleanup runs exactly once: on [`Tenure::relinquish`], or on drop if
/// the tenure was never relinquished explicitly.
pub struct Tenure {
    rank: Rank,
    cleanup: Option<Cleanup>,
}

impl fmt::Debug for Tenure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenure")
            .field("rank", &self.rank)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

impl Tenure {
    /// Starts a tenure by invoking the caller's election callback.
    pub fn begin<F>(rank: Rank, on_elected: &mut F) -> Self
    where
        F: FnMut(Rank) -> Option<Cleanup>,
    {
        let cleanup = on_elected(rank);
        Self { rank, cleanup }
    }

    /// Rank this tenure was won with.
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    /// Ends the tenure, running the cleanup action if there is one.
    pub fn relinquish(mut self) {
        self.run_cleanup();
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            info!(rank = self.rank, "running leadership cleanup");
            cleanup();
        }
    }
}

impl Drop for Tenure {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

/// Watches connection state on behalf of the current leader.
pub struct Watchdog<C> {
    client: C,
    states: StateStream,
    grace: Duration,
    checks: VecDeque<Instant>,
}

impl<C: CoordinationClient> fmt::Debug for Watchdog<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("grace", &self.grace)
            .field("pending_checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}

impl<C: CoordinationClient> Watchdog<C> {
    /// Subscribes to the client's connection state.
    ///
    /// If the session is already disconnected a check is armed right away.
    pub fn arm(client: C, grace: Duration) -> Self {
        let states = client.subscribe_state();
        let mut checks = VecDeque::new();
        if client.connection_state() == ConnectionState::Disconnected {
            checks.push_back(Instant::now() + grace);
        }
        Self { client, states, grace, checks }
    }

    /// Grace period granted after each disconnect.
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Runs until leadership must be relinquished and returns the reason.
    pub async fn run(mut self) -> ElectionError {
        if self.client.connection_state() == ConnectionState::Expired {
            warn!("session already expired at start of tenure");
            return ElectionError::SessionLost;
        }

        loop {
            let next_check = self.checks.front().copied();
            tokio::select! {
                state = self.states.next() => match state {
                    Some(ConnectionState::Disconnected) => {
                        warn!(
                            grace_ms = self.grace.as_millis() as u64,
                            "received disconnected event, checking again after grace period"
                        );
                        self.checks.push_back(Instant::now() + self.grace);
                    }
                    Some(ConnectionState::Connected) => debug!("connection restored"),
                    Some(ConnectionState::Expired) => {
                        warn!("session expired, relinquishing leadership");
                        return ElectionError::SessionLost;
                    }
                    None => {
                        warn!("connection state stream closed, relinquishing leadership");
                        return ElectionError::SessionLost;
                    }
                },
                () = sleep_until(next_check) => {
                    self.checks.pop_front();
                    let state = self.client.connection_state();
                    debug!(%state, "connection state after the last disconnect");
                    match state {
                        ConnectionState::Connected => {
                            info!("reconnected before threshold was reached");
                        }
                        ConnectionState::Disconnected => {
                            warn!("disconnect threshold reached, relinquishing leadership");
                            return ElectionError::DisconnectThreshold { grace: self.grace };
                        }
                        ConnectionState::Expired => return ElectionError::SessionLost,
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
