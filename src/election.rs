//! Sequential-node leader election.
//!
//! [`elect_leader`] is the main entry point. It spawns a single task that
//! drives the election for one candidacy node:
//!
//! 1. create an ephemeral sequential node under the election root
//! 2. list the siblings and rank them numerically
//! 3. lead if no sibling ranks lower, otherwise watch the closest lower one
//! 4. when the watch fires, list again from scratch and repeat step 3
//!
//! Only one watch is armed at a time. The task is the only consumer of
//! notifications, so steps never interleave.

use std::time::Duration;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    adapter::{Armed, AsyncAdapter},
    codec::{self, Candidate},
    traits::CoordinationClient,
    types::{ClientError, ElectionError, ElectionEvent, ElectionState, Rank},
    watchdog::{Cleanup, Tenure, Watchdog},
};

/// Configuration for an election.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionConfig {
    /// Persistent node under which candidacy nodes are created.
    pub election_path: String,
    /// Name prefix of candidacy nodes. Must end with the sequence separator.
    pub node_prefix: String,
    /// Fraction of the session timeout a leader may stay disconnected.
    ///
    /// Values above `1.0` are allowed: the process then keeps acting as
    /// leader past the point where the service would expire its session.
    pub threshold: f64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_path: "/election".to_string(),
            node_prefix: "guid-n_".to_string(),
            threshold: 1.0,
        }
    }
}

impl ElectionConfig {
    /// Creates a configuration for `election_path` with the default prefix.
    pub fn new(election_path: impl Into<String>, threshold: f64) -> Self {
        Self { election_path: election_path.into(), threshold, ..Self::default() }
    }

    /// Computes the disconnect grace period, `session_timeout * threshold`,
    /// rounded to the millisecond.
    ///
    /// # Errors
    ///
    /// Returns [`ElectionError::InvalidThreshold`] unless the threshold is a
    /// positive finite number small enough to form a [`Duration`].
    pub fn grace_period(&self, session_timeout: Duration) -> Result<Duration, ElectionError> {
        let grace_ms = (session_timeout.as_millis() as f64 * self.threshold).round();
        if !(self.threshold.is_finite() && self.threshold > 0.0 && grace_ms < u64::MAX as f64) {
            return Err(ElectionError::InvalidThreshold(self.threshold.to_string()));
        }
        if self.threshold > 1.0 {
            info!(
                threshold = self.threshold,
                "threshold > 1, the process stays active even after session timeout"
            );
        }
        Ok(Duration::from_millis(grace_ms as u64))
    }
}

/// Result of ranking the own candidacy against its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    /// No sibling ranks lower.
    Lead,
    /// The sibling with the largest rank below the own rank.
    Watch(Candidate),
}

/// Ranks `own` against the current child listing of `root`.
///
/// Watching the closest lower rank means each deletion wakes at most one
/// process.
pub(crate) fn decide(
    own: &Candidate,
    root: &str,
    children: &[String],
) -> Result<Decision, ElectionError> {
    let siblings = codec::ranked(children)?;
    if !siblings.iter().any(|c| c.name == own.name) {
        return Err(ElectionError::CandidacyVanished { path: own.path(root) });
    }
    Ok(siblings
        .into_iter()
        .take_while(|c| c.rank < own.rank)
        .last()
        .map_or(Decision::Lead, Decision::Watch))
}

/// Handle to a running election.
///
/// Dropping the handle stops the election the same way [`stop`] does, but
/// without waiting for it to finish.
///
/// [`stop`]: ElectionHandle::stop
#[derive(Debug)]
pub struct ElectionHandle {
    state: watch::Receiver<ElectionState>,
    events: mpsc::UnboundedReceiver<ElectionEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ElectionHandle {
    /// Returns the current election state.
    pub fn state(&self) -> ElectionState {
        *self.state.borrow()
    }

    /// Returns whether this process is currently the leader.
    pub fn is_leader(&self) -> bool {
        self.state() == ElectionState::Leader
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ElectionState> {
        self.state.clone()
    }

    /// Waits for the next election event.
    ///
    /// Returns `None` once the election task has finished and every event
    /// was consumed.
    pub async fn next_event(&mut self) -> Option<ElectionEvent> {
        self.events.recv().await
    }

    /// Stops the election and waits for it to wind down.
    ///
    /// A leader runs its cleanup action first. The candidacy node is then
    /// deleted on a best-effort basis while connected, waiting at most one
    /// session timeout; session closure removes it otherwise.
    /// Notifications arriving after the stop are ignored.
    pub async fn stop(self) {
        let Self { stop, task, .. } = self;
        stop.send_replace(true);
        if let Err(e) = task.await {
            warn!(error = %e, "election task did not finish cleanly");
        }
    }
}

/// Joins the election under `config.election_path`.
///
/// `on_elected` is invoked with the own rank the moment this process becomes
/// leader, and may return a cleanup action for when leadership is later
/// relinquished. Progress and failures are reported
/// through [`ElectionHandle::next_event`]. There is no automatic retry: after
/// [`ElectionEvent::Failed`] the caller may join again with a fresh call.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`ElectionError::InvalidThreshold`] if the configured threshold
/// cannot produce a grace period.
pub fn elect_leader<C, F>(
    client: C,
    config: ElectionConfig,
    on_elected: F,
) -> Result<ElectionHandle, ElectionError>
where
    C: CoordinationClient,
    F: FnMut(Rank) -> Option<Cleanup> + Send + 'static,
{
    let grace = config.grace_period(client.session_timeout())?;
    let (state_tx, state) = watch::channel(ElectionState::Joining);
    let (events_tx, events) = mpsc::unbounded_channel();
    let (stop, stop_rx) = watch::channel(false);

    debug!(
        root = %config.election_path,
        grace_ms = grace.as_millis() as u64,
        "joining leader election"
    );

    let coordinator = Coordinator {
        adapter: AsyncAdapter::new(client),
        config,
        grace,
        on_elected,
        state: state_tx,
        events: events_tx,
        candidacy: None,
    };
    let task = tokio::spawn(coordinator.run(stop_rx));

    Ok(ElectionHandle { state, events, stop, task })
}

enum Exit {
    Stopped,
    Failed(ElectionError),
}

/// Election state owned by the election task.
struct Coordinator<C, F> {
    adapter: AsyncAdapter<C>,
    config: ElectionConfig,
    grace: Duration,
    on_elected: F,
    state: watch::Sender<ElectionState>,
    events: mpsc::UnboundedSender<ElectionEvent>,
    /// Full path of the own candidacy node, once created.
    candidacy: Option<String>,
}

impl<C, F> Coordinator<C, F>
where
    C: CoordinationClient,
    F: FnMut(Rank) -> Option<Cleanup> + Send + 'static,
{
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        // Dropping the campaign future drops any armed watch with it.
        let elected = tokio::select! {
            biased;
            () = stopped(&mut stop) => Err(Exit::Stopped),
            result = self.campaign() => result.map_err(Exit::Failed),
        };

        let exit = match elected {
            Ok(rank) => self.lead(rank, &mut stop).await,
            Err(exit) => exit,
        };
        self.finish(exit).await;
    }

    /// Joins and waits until no sibling ranks lower.
    async fn campaign(&mut self) -> Result<Rank, ElectionError> {
        let root = self.config.election_path.clone();

        let path = self.adapter.create_candidacy(&root, &self.config.node_prefix).await?;
        self.candidacy = Some(path.clone());
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let own = Candidate::parse(name)?;

        info!(%path, rank = own.rank, "created candidacy node");
        self.emit(ElectionEvent::Joined { path, rank: own.rank });
        self.set_state(ElectionState::Candidate);

        loop {
            let children = self.adapter.list_children(&root).await?;
            debug!(rank = own.rank, siblings = children.len(), "ranking against siblings");

            let predecessor = match decide(&own, &root, &children)? {
                Decision::Lead => return Ok(own.rank),
                Decision::Watch(predecessor) => predecessor,
            };

            let mut watch = match self.adapter.watch_deletion(&predecessor.path(&root)).await? {
                Armed::Watching(watch) => watch,
                Armed::Gone => {
                    debug!(
                        rank = own.rank,
                        predecessor = predecessor.rank,
                        "predecessor already gone, re-evaluating"
                    );
                    continue;
                }
            };

            let stat = watch.stat();
            info!(
                rank = own.rank,
                predecessor = predecessor.rank,
                owner = stat.ephemeral_owner,
                version = stat.version,
                "watching predecessor"
            );
            self.set_state(ElectionState::Watching { predecessor: predecessor.rank });
            self.emit(ElectionEvent::Watching { rank: own.rank, predecessor: predecessor.rank });

            match watch.fired().await {
                Some(event) if event.is_deleted() => {
                    debug!(
                        rank = own.rank,
                        predecessor = predecessor.rank,
                        "received delete event"
                    );
                }
                Some(event) => {
                    debug!(rank = own.rank, ?event, "predecessor changed, re-arming");
                }
                None => {
                    return Err(ElectionError::WatchArm {
                        path: watch.path().to_string(),
                        source: ClientError::Other("watch dropped before firing".to_string()),
                    });
                }
            }
        }
    }

    /// Holds leadership until stopped or the watchdog gives up.
    async fn lead(&mut self, rank: Rank, stop: &mut watch::Receiver<bool>) -> Exit {
        info!(rank, "no smaller sequence, elected as the leader");
        // Subscribe before the callback so no disconnect is missed.
        let watchdog = Watchdog::arm(self.adapter.client().clone(), self.grace);
        debug!(rank, grace_ms = watchdog.grace().as_millis() as u64, "armed disconnect watchdog");

        self.set_state(ElectionState::Leader);
        let tenure = Tenure::begin(rank, &mut self.on_elected);
        self.emit(ElectionEvent::Elected { rank });

        let exit = tokio::select! {
            biased;
            () = stopped(stop) => Exit::Stopped,
            reason = watchdog.run() => Exit::Failed(reason),
        };
        info!(rank = tenure.rank(), "leadership tenure ended");
        tenure.relinquish();
        exit
    }

    async fn finish(&mut self, exit: Exit) {
        self.set_state(ElectionState::Stopped);

        // Report before touching the client: a disconnected client may hold
        // the delete until it reconnects.
        match exit {
            Exit::Stopped => {
                info!("election stopped");
                self.emit(ElectionEvent::Stopped);
            }
            Exit::Failed(err) => {
                warn!(error = %err, "election ended");
                self.emit(ElectionEvent::Failed(err));
            }
        }

        if let Some(path) = self.candidacy.take() {
            delete_candidacy(&self.adapter, path).await;
        }
    }

    fn set_state(&self, state: ElectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ElectionEvent) {
        if self.events.send(event).is_err() {
            debug!("no election event subscribers");
        }
    }
}

/// Best-effort removal of the own node; session cleanup covers every miss.
async fn delete_candidacy<C: CoordinationClient>(adapter: &AsyncAdapter<C>, path: String) {
    let client = adapter.client();
    let state = client.connection_state();
    if !state.is_connected() {
        debug!(%path, %state, "leaving candidacy node to session cleanup");
        return;
    }

    let deadline = client.session_timeout();
    match time::timeout(deadline, adapter.delete_candidacy(&path)).await {
        Ok(Ok(())) => debug!(%path, "deleted candidacy node"),
        Ok(Err(e)) => debug!(%path, error = %e, "leaving candidacy node to session cleanup"),
        Err(_) => debug!(%path, "delete timed out, leaving candidacy node to session cleanup"),
    }
}

/// Resolves once a stop was requested or the handle was dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
