//! In-process cluster simulation.
//!
//! Every simulated process owns one [`MemorySession`] at a time and runs the
//! election on it. When an election ends with a failure the process behaves
//! like a restarted one: it drops its session and rejoins with a fresh one,
//! up to `max_rejoins` times. A chaos task periodically expires or
//! temporarily disconnects the current leader.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use standby::{Cleanup, ElectionEvent, MemoryService, MemorySession, Rank, elect_leader};
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Registry entry for one simulated process.
#[derive(Debug, Clone)]
struct Member {
    session: MemorySession,
    leader: bool,
}

/// Shared view of every simulated process.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    members: Arc<RwLock<BTreeMap<usize, Member>>>,
}

impl Registry {
    async fn join(&self, process: usize, session: MemorySession) {
        self.members.write().await.insert(process, Member { session, leader: false });
    }

    async fn set_leader(&self, process: usize, leader: bool) {
        if let Some(member) = self.members.write().await.get_mut(&process) {
            member.leader = leader;
        }
    }

    async fn leave(&self, process: usize) {
        self.members.write().await.remove(&process);
    }

    /// Returns the session of the current leader, if any.
    pub async fn leader(&self) -> Option<(usize, MemorySession)> {
        self.members
            .read()
            .await
            .iter()
            .find(|(_, member)| member.leader)
            .map(|(process, member)| (*process, member.session.clone()))
    }
}

/// A simulated cluster sharing one [`MemoryService`].
#[derive(Debug, Clone)]
pub struct Cluster {
    service: MemoryService,
    config: Config,
    registry: Registry,
}

impl Cluster {
    /// Creates a cluster; the election root must already exist.
    pub fn new(service: MemoryService, config: Config) -> Self {
        Self { service, config, registry: Registry::default() }
    }

    /// Spawns every process plus the chaos task.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<_> = (0..self.config.candidates)
            .map(|process| tokio::spawn(self.clone().run_process(process, shutdown.clone())))
            .collect();
        tasks.push(tokio::spawn(self.clone().chaos(shutdown)));
        tasks
    }

    async fn run_process(self, process: usize, mut shutdown: watch::Receiver<bool>) {
        for attempt in 0..=self.config.max_rejoins {
            let session = self.service.session(self.config.session_timeout());
            self.registry.join(process, session.clone()).await;
            info!(process, attempt, session = session.id(), "joining election");

            let on_elected = move |rank: Rank| {
                info!(process, rank, "acting as leader");
                Some(Box::new(move || info!(process, rank, "stopping leader work")) as Cleanup)
            };
            let mut handle = match elect_leader(session.clone(), self.config.election(), on_elected)
            {
                Ok(handle) => handle,
                Err(e) => {
                    error!(process, error = %e, "cannot join election");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        handle.stop().await;
                        session.expire();
                        self.registry.leave(process).await;
                        return;
                    }
                    event = handle.next_event() => match event {
                        Some(ElectionEvent::Elected { rank }) => {
                            info!(process, rank, "elected");
                            self.registry.set_leader(process, true).await;
                        }
                        Some(ElectionEvent::Failed(e)) => {
                            warn!(process, error = %e, "election ended");
                            self.registry.set_leader(process, false).await;
                        }
                        Some(event) => debug!(process, %event, "election event"),
                        None => break,
                    }
                }
            }

            // Restart with a fresh session, as a crashed process would.
            session.expire();
            self.registry.leave(process).await;
        }
        warn!(process, rejoins = self.config.max_rejoins, "giving up after repeated failures");
    }

    async fn chaos(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.chaos_interval_ms);
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        let disconnect = Duration::from_millis(self.config.disconnect_ms);
        let mut round: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }

            let Some((process, session)) = self.registry.leader().await else {
                debug!("no leader to disturb");
                continue;
            };

            round += 1;
            if round % 2 == 1 {
                info!(process, session = session.id(), "expiring leader session");
                session.expire();
            } else {
                info!(
                    process,
                    session = session.id(),
                    disconnect_ms = self.config.disconnect_ms,
                    "disconnecting leader"
                );
                session.disconnect();
                tokio::spawn(async move {
                    tokio::time::sleep(disconnect).await;
                    session.reconnect();
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cluster_elects_and_fails_over() {
        let config = Config { candidates: 2, chaos_interval_ms: 60_000, ..Config::default() };
        let service = MemoryService::new();
        service.ensure_path(&config.election_path).unwrap();
        let cluster = Cluster::new(service.clone(), config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = cluster.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (first, session) = cluster.registry.leader().await.unwrap();

        session.expire();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (second, _) = cluster.registry.leader().await.unwrap();
        assert_ne!(first, second);

        shutdown_tx.send_replace(true);
        for task in tasks {
            task.await.unwrap();
        }
        assert!(service.children("/election").is_empty());
    }
}
