//! A single room: membership, counter, and the timer task that drives it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use roomcast_protocol::{MemberId, RoomEvent, RoomId};
use roomcast_tick::TickScheduler;
use roomcast_transport::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::broadcast::{Member, broadcast};
use crate::config::{RoomConfig, TimerState};
use crate::error::RoomError;

// ---------------------------------------------------------------------------
// RoomSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a room, as reported by the monitoring endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub connections: usize,
    pub counter: u64,
    pub started: bool,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Handle to a running timer task. Each activation gets its own stop
/// channel, so a stale task can never be revived by a later start.
struct RoomTimer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RoomTimer {
    /// Flags the task to stop and waits for it to exit.
    async fn join(self, room_id: &RoomId) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(room_id = %room_id, error = %e, "room timer panicked");
            }
        }
    }
}

/// Timer taken out of a retired room, still to be awaited by the caller
/// once it has released its own locks.
pub(crate) struct Retired {
    timer: Option<RoomTimer>,
}

impl Retired {
    pub(crate) async fn finish(self, room_id: &RoomId) {
        if let Some(timer) = self.timer {
            timer.join(room_id).await;
        }
    }
}

struct RoomState<C: Connection> {
    members: HashMap<MemberId, Member<C>>,
    counter: u64,
    timer: Option<RoomTimer>,
    retired: bool,
}

impl<C: Connection> RoomState<C> {
    /// Takes the timer out and flags it to stop. The counter resets
    /// whether or not a timer was running.
    fn deactivate(&mut self) -> Option<RoomTimer> {
        let timer = self.timer.take();
        if let Some(timer) = &timer {
            timer.stop.send_replace(true);
        }
        self.counter = 0;
        timer
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// One room. Always handled through an `Arc` so the timer task can hold a
/// weak reference back to it.
///
/// The timer runs exactly while the room has members: the first join starts
/// it and the last leave stops it. Both transitions happen under the room's
/// write lock, and the counter is reset on each of them.
pub struct Room<C: Connection> {
    id: RoomId,
    config: RoomConfig,
    state: RwLock<RoomState<C>>,
}

impl<C: Connection> Room<C> {
    pub fn new(id: RoomId, config: RoomConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            state: RwLock::new(RoomState {
                members: HashMap::new(),
                counter: 0,
                timer: None,
                retired: false,
            }),
        })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Adds a member and announces it to everyone in the room, the new
    /// member included. Starts the timer if the room was empty.
    ///
    /// Returns the member count after insertion. Re-using a `member_id`
    /// replaces the previous entry.
    pub async fn add_connection(
        self: &Arc<Self>,
        member_id: MemberId,
        member: Member<C>,
    ) -> Result<usize, RoomError> {
        let mut state = self.state.write().await;
        if state.retired {
            return Err(RoomError::Retired(self.id.clone()));
        }

        let user_id = member.user_id().clone();
        if state.members.insert(member_id.clone(), member).is_some() {
            tracing::warn!(
                room_id = %self.id,
                member_id = %member_id,
                "member id already present, replaced"
            );
        }
        let total = state.members.len();

        tracing::info!(
            room_id = %self.id,
            member_id = %member_id,
            user_id = %user_id,
            members = total,
            "member joined"
        );

        let event = RoomEvent::user_join(user_id, self.id.clone(), total);
        let report = broadcast(&self.id, &state.members, &event).await;
        tracing::trace!(room_id = %self.id, ?report, "user_join delivered");

        if state.timer.is_none() {
            state.counter = 0;
            state.timer = Some(self.spawn_timer());
            tracing::info!(room_id = %self.id, "room timer started");
        }

        Ok(total)
    }

    /// Removes a member and announces the departure to whoever remains.
    /// Stops the timer when the last member leaves.
    ///
    /// Unknown ids are a no-op and return `None`.
    pub async fn remove_connection(&self, member_id: &MemberId) -> Option<Member<C>> {
        let (member, timer) = {
            let mut state = self.state.write().await;
            let member = state.members.remove(member_id)?;
            let total = state.members.len();

            tracing::info!(
                room_id = %self.id,
                member_id = %member_id,
                user_id = %member.user_id(),
                members = total,
                "member left"
            );

            let event = RoomEvent::user_leave(member.user_id().clone(), self.id.clone(), total);
            let report = broadcast(&self.id, &state.members, &event).await;
            tracing::trace!(room_id = %self.id, ?report, "user_leave delivered");

            let timer = if total == 0 { state.deactivate() } else { None };
            (member, timer)
        };

        if let Some(timer) = timer {
            timer.join(&self.id).await;
            tracing::info!(room_id = %self.id, "room timer stopped");
        }

        Some(member)
    }

    /// Stops the timer if the room has no members. Returns `true` if a
    /// running timer was stopped by this call.
    ///
    /// Safe to call repeatedly and concurrently; only one caller observes
    /// the running timer.
    pub async fn stop_timer(&self) -> bool {
        let timer = {
            let mut state = self.state.write().await;
            if !state.members.is_empty() {
                tracing::debug!(room_id = %self.id, "room occupied, timer left running");
                return false;
            }
            state.deactivate()
        };

        match timer {
            Some(timer) => {
                timer.join(&self.id).await;
                tracing::info!(room_id = %self.id, "room timer stopped");
                true
            }
            None => false,
        }
    }

    /// Marks the room retired if it is empty, so no later join can land in
    /// it. The caller must await the returned handle after dropping any
    /// locks it holds.
    pub(crate) async fn retire_if_empty(&self) -> Option<Retired> {
        let mut state = self.state.write().await;
        if !state.members.is_empty() {
            return None;
        }
        state.retired = true;
        Some(Retired {
            timer: state.deactivate(),
        })
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.members.is_empty()
    }

    pub async fn counter(&self) -> u64 {
        self.state.read().await.counter
    }

    pub async fn timer_state(&self) -> TimerState {
        if self.state.read().await.timer.is_some() {
            TimerState::Active
        } else {
            TimerState::Inactive
        }
    }

    /// `true` once the manager has detached this room.
    pub async fn is_retired(&self) -> bool {
        self.state.read().await.retired
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.state.read().await;
        RoomSnapshot {
            connections: state.members.len(),
            counter: state.counter,
            started: state.timer.is_some(),
        }
    }

    /// Snapshot unless the room has been retired.
    pub(crate) async fn live_snapshot(&self) -> Option<RoomSnapshot> {
        let state = self.state.read().await;
        if state.retired {
            return None;
        }
        Some(RoomSnapshot {
            connections: state.members.len(),
            counter: state.counter,
            started: state.timer.is_some(),
        })
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    fn spawn_timer(self: &Arc<Self>) -> RoomTimer {
        let (stop, stop_rx) = watch::channel(false);
        let scheduler = TickScheduler::new(self.config.tick.clone());
        let task = tokio::spawn(run_timer(Arc::downgrade(self), stop_rx, scheduler));
        RoomTimer { stop, task }
    }

    /// Bumps the counter and copies out the current recipients.
    ///
    /// Returns `None` if this timer was stopped while waiting for the lock,
    /// so a stale tick never touches a counter that has been reset.
    async fn advance_counter(
        &self,
        stop: &watch::Receiver<bool>,
    ) -> Option<(u64, HashMap<MemberId, Member<C>>)> {
        let count = {
            let mut state = self.state.write().await;
            let stopped = *stop.borrow();
            if stopped {
                return None;
            }
            state.counter += 1;
            state.counter
        };

        let recipients = self.state.read().await.members.clone();

        Some((count, recipients))
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Counter loop for one timer activation.
///
/// The stop flag is checked before every tick and races the broadcast, so
/// once it is set no further `counter_update` is started.
async fn run_timer<C: Connection>(
    room: Weak<Room<C>>,
    mut stop: watch::Receiver<bool>,
    mut scheduler: TickScheduler,
) {
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            _ = scheduler.wait_for_tick() => {}
        }

        let Some(room) = room.upgrade() else {
            break;
        };
        let Some((count, recipients)) = room.advance_counter(&stop).await else {
            break;
        };

        let event = RoomEvent::counter_update(count, room.id.clone());
        tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            report = broadcast(&room.id, &recipients, &event) => {
                tracing::trace!(room_id = %room.id, count, ?report, "counter_update delivered");
            }
        }
    }

    let metrics = scheduler.metrics();
    tracing::debug!(
        ticks = metrics.total_ticks,
        overruns = metrics.total_overruns,
        skipped = metrics.total_skipped,
        "room timer exited"
    );
}
