//! The timer-driven poll loop.
//!
//! A background task owns the last successful snapshot and runs at most
//! one cycle at a time: a tick or a manual refresh arriving while a cycle
//! is in flight is dropped, not queued. A cycle is assemble, then diff
//! against the retained snapshot, then dispatch. Only the loop task
//! mutates the retained snapshot and the badge, after the cycle's task
//! has settled.

use crate::assembler::SnapshotAssembler;
use crate::diff::{ChangeEvent, diff};
use crate::errors::ApiError;
use crate::logger;
use crate::notification::NotificationDispatcher;
use crate::snapshot::PollSnapshot;
use crate::watch_state::WatchState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::Instrument;
use tracing as log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyFetching,
}

/// What subscribers of [`PollHandle::subscribe_events`] receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Non-empty list of changes found by a cycle.
    Changes(Vec<ChangeEvent>),
    /// The server rejected the credential; it has been cleared.
    LoggedOut,
}

#[derive(Debug)]
enum PollCommand {
    Refresh(oneshot::Sender<TriggerOutcome>),
    Stop,
}

/// How a cycle task ended.
#[derive(Debug)]
enum CycleOutcome {
    /// Not logged in; nothing was fetched.
    Skipped,
    /// The project directory could not be fetched.
    Aborted(ApiError),
    Unauthorized,
    Assembled(PollSnapshot),
}

pub struct Poller {
    state: Arc<WatchState>,
    assembler: Arc<SnapshotAssembler>,
    dispatcher: NotificationDispatcher,
    interval: Duration,
}

/// Handle to a running poll loop.
pub struct PollHandle {
    commands: mpsc::Sender<PollCommand>,
    state: watch::Receiver<PollState>,
    snapshots: watch::Receiver<Option<Arc<PollSnapshot>>>,
    events: broadcast::Sender<PollEvent>,
    task: JoinHandle<()>,
}

struct Channels {
    state: watch::Sender<PollState>,
    snapshots: watch::Sender<Option<Arc<PollSnapshot>>>,
    events: broadcast::Sender<PollEvent>,
}

impl Poller {
    pub fn new(
        state: Arc<WatchState>,
        assembler: SnapshotAssembler,
        dispatcher: NotificationDispatcher,
        interval: Duration,
    ) -> Self {
        Poller {
            state,
            assembler: Arc::new(assembler),
            dispatcher,
            interval,
        }
    }

    /// Spawns the loop. The first cycle starts right away.
    pub fn start(self) -> PollHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(32);
        let channels = Channels {
            state: state_tx,
            snapshots: snapshot_tx,
            events: events_tx.clone(),
        };

        let task = tokio::spawn(self.run(command_rx, channels));
        PollHandle {
            commands: command_tx,
            state: state_rx,
            snapshots: snapshot_rx,
            events: events_tx,
            task,
        }
    }

    async fn run(self, mut commands: mpsc::Receiver<PollCommand>, channels: Channels) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<CycleOutcome>> = None;
        let mut retained: Option<Arc<PollSnapshot>> = None;

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(PollCommand::Refresh(reply)) => {
                        let outcome = if in_flight.is_some() {
                            log::debug!("refresh requested while fetching, ignoring");
                            TriggerOutcome::AlreadyFetching
                        } else {
                            in_flight = Some(self.begin(true, &channels));
                            TriggerOutcome::Started
                        };
                        let _ = reply.send(outcome);
                    }
                    Some(PollCommand::Stop) | None => break,
                },
                _ = interval.tick() => {
                    if in_flight.is_some() {
                        log::trace!("tick while fetching, dropped");
                    } else {
                        in_flight = Some(self.begin(false, &channels));
                    }
                }
                settled = settle(&mut in_flight) => {
                    in_flight = None;
                    self.complete(settled, &mut retained, &channels);
                    channels.state.send_replace(PollState::Idle);
                }
            }
        }

        if let Some(cycle) = in_flight.take() {
            log::debug!("cancelling in-flight poll cycle");
            cycle.abort();
        }
        channels.state.send_replace(PollState::Stopped);
        log::info!("poll loop stopped");
    }

    fn begin(&self, refresh_directory: bool, channels: &Channels) -> JoinHandle<CycleOutcome> {
        channels.state.send_replace(PollState::Fetching);
        let state = self.state.clone();
        let assembler = self.assembler.clone();
        tokio::spawn(cycle(state, assembler, refresh_directory).instrument(logger::cycle_span()))
    }

    fn complete(
        &self,
        settled: Result<CycleOutcome, JoinError>,
        retained: &mut Option<Arc<PollSnapshot>>,
        channels: &Channels,
    ) {
        let outcome = match settled {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("poll cycle did not finish: {e}");
                return;
            }
        };

        match outcome {
            CycleOutcome::Skipped => {}
            CycleOutcome::Aborted(e) => {
                log::warn!("poll cycle aborted, keeping previous snapshot: {e}");
            }
            CycleOutcome::Unauthorized => {
                log::warn!("credential rejected, logging out");
                if let Err(e) = self.state.logout() {
                    log::error!("failed to persist logout: {e:?}");
                }
                self.assembler.invalidate();
                *retained = None;
                channels.snapshots.send_replace(None);
                let _ = channels.events.send(PollEvent::LoggedOut);
            }
            CycleOutcome::Assembled(snapshot) => {
                self.state.set_badge_count(snapshot.total_count());
                let events = diff(retained.as_deref(), &snapshot);
                self.dispatcher.dispatch(&events);

                let snapshot = Arc::new(snapshot);
                *retained = Some(snapshot.clone());
                channels.snapshots.send_replace(Some(snapshot));
                if !events.is_empty() {
                    let _ = channels.events.send(PollEvent::Changes(events));
                }
            }
        }
    }
}

/// Resolves when the in-flight cycle settles; never resolves without one.
async fn settle(in_flight: &mut Option<JoinHandle<CycleOutcome>>) -> Result<CycleOutcome, JoinError> {
    match in_flight {
        Some(cycle) => cycle.await,
        None => std::future::pending().await,
    }
}

async fn cycle(
    state: Arc<WatchState>,
    assembler: Arc<SnapshotAssembler>,
    refresh_directory: bool,
) -> CycleOutcome {
    match state.refresh() {
        Ok(true) => {
            // The account may have changed along with the settings.
            assembler.invalidate();
        }
        Ok(false) => {}
        Err(e) => log::warn!("keeping current settings: {e:#}"),
    }
    let Some(credential) = state.credential() else {
        log::debug!("not logged in, skipping poll cycle");
        return CycleOutcome::Skipped;
    };
    let watched = state.watched_project_ids();
    log::debug!("polling {} watched projects", watched.len());

    match assembler
        .assemble(&watched, &credential, refresh_directory)
        .await
    {
        Ok(assembly) if assembly.unauthorized => CycleOutcome::Unauthorized,
        Ok(assembly) => CycleOutcome::Assembled(assembly.snapshot),
        Err(ApiError::Unauthorized) => CycleOutcome::Unauthorized,
        Err(e) => CycleOutcome::Aborted(e),
    }
}

impl PollHandle {
    /// Starts a cycle now unless one is already running.
    pub async fn trigger_refresh_now(&self) -> anyhow::Result<TriggerOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(PollCommand::Refresh(reply))
            .await
            .map_err(|_| anyhow::anyhow!("poll loop is not running"))?;
        Ok(outcome.await?)
    }

    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.clone()
    }

    /// The latest successful snapshot; `None` before the first one and
    /// after a forced logout.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Option<Arc<PollSnapshot>>> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    /// Stops the loop, cancelling a cycle in flight. Its partial results
    /// are discarded.
    pub async fn stop(self) {
        let _ = self.commands.send(PollCommand::Stop).await;
        if let Err(e) = self.task.await {
            log::error!("poll loop ended abnormally: {e}");
        }
    }
}
