//! Deferred teleport scheduler.
//!
//! A teleport with a positive delay is queued on a single scheduler task that owns the
//! countdowns; a teleport without delay runs on the caller's thread. Each teleport has a
//! state cell that starts `Pending` and moves exactly once to a terminal state by
//! compare-and-swap, so a cancel racing the countdown is resolved in one place: whichever
//! side swaps first wins and the other does nothing.
//!
//! Each actor has at most one pending teleport. Scheduling another one for the same actor
//! (delayed or not) supersedes the pending one, which then never fires.
//!
//! Before every executed move the actor's current state is written to the
//! [`LastPositionLog`] so `back` can return there.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::teleport::locations::LastPositionLog;
use crate::teleport::types::{ActorId, ActorState, BlockPos, Destination, DimensionId};

/// World-mutation collaborator.
///
/// Deferred teleports call into this from the scheduler task, not from the game thread.
/// Implementations that must mutate world state on an authoritative thread are expected to
/// hand the move off to it (for example by queueing it for the next tick).
pub trait World: Send + Sync {
    /// Current state of a connected, living actor; `None` once it has left or died.
    fn actor_state(&self, actor: ActorId) -> Option<ActorState>;

    fn move_actor(&self, actor: ActorId, destination: &Destination);

    /// Spawn block and dimension of the default world.
    fn spawn_point(&self) -> (BlockPos, DimensionId);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TeleportStatus {
    Pending,
    /// The actor was moved.
    Completed,
    /// Revoked through its handle or by [`TeleportScheduler::cancel_actor`].
    Cancelled,
    /// Replaced by a newer teleport for the same actor.
    Superseded,
    /// The actor was gone when the countdown elapsed.
    Discarded,
}

impl TeleportStatus {
    fn as_u8(self) -> u8 {
        match self {
            TeleportStatus::Pending => 0,
            TeleportStatus::Completed => 1,
            TeleportStatus::Cancelled => 2,
            TeleportStatus::Superseded => 3,
            TeleportStatus::Discarded => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TeleportStatus::Completed,
            2 => TeleportStatus::Cancelled,
            3 => TeleportStatus::Superseded,
            4 => TeleportStatus::Discarded,
            _ => TeleportStatus::Pending,
        }
    }
}

#[derive(Debug)]
struct TeleportSlot {
    id: u64,
    actor: ActorId,
    due: Instant,
    state: AtomicU8,
}

impl TeleportSlot {
    fn status(&self) -> TeleportStatus {
        TeleportStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Leave `Pending` for `to`. Fails if another transition already happened.
    fn settle(&self, to: TeleportStatus) -> bool {
        self.state
            .compare_exchange(
                TeleportStatus::Pending.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Revocable handle to one scheduled teleport.
#[derive(Clone)]
pub struct TeleportHandle {
    inner: Arc<Inner>,
    slot: Arc<TeleportSlot>,
}

impl std::fmt::Debug for TeleportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeleportHandle")
            .field("id", &self.slot.id)
            .field("actor", &self.slot.actor)
            .field("status", &self.slot.status())
            .finish()
    }
}

impl TeleportHandle {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn actor(&self) -> ActorId {
        self.slot.actor
    }

    pub fn status(&self) -> TeleportStatus {
        self.slot.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == TeleportStatus::Pending
    }

    /// Time left on the countdown; zero once due or settled.
    pub fn remaining(&self) -> Duration {
        if self.is_pending() {
            self.slot.due.saturating_duration_since(Instant::now())
        } else {
            Duration::ZERO
        }
    }

    /// Revoke the teleport. Returns false if it already fired or was revoked.
    pub fn cancel(&self) -> bool {
        let cancelled = self.slot.settle(TeleportStatus::Cancelled);
        if cancelled {
            self.inner.release_slot(&self.slot);
            debug!("Teleport #{} for {} cancelled", self.slot.id, self.slot.actor);
        }
        cancelled
    }
}

#[derive(Debug)]
struct DeferredTeleport {
    slot: Arc<TeleportSlot>,
    destination: Destination,
}

enum SchedulerCommand {
    Enqueue(DeferredTeleport),
    Snapshot(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Deferred teleports still counting down.
    pub queued: usize,
    pub scheduled_total: u64,
    pub completed_total: u64,
    pub revoked_total: u64,
    pub discarded_total: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    revoked: AtomicU64,
    discarded: AtomicU64,
}

struct Inner {
    world: Arc<dyn World>,
    last_positions: Arc<LastPositionLog>,
    slots: Mutex<HashMap<ActorId, Arc<TeleportSlot>>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl Inner {
    /// Register a new pending slot for `actor`, superseding any older one.
    fn claim_slot(&self, actor: ActorId, due: Instant) -> Arc<TeleportSlot> {
        let slot = Arc::new(TeleportSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            actor,
            due,
            state: AtomicU8::new(TeleportStatus::Pending.as_u8()),
        });
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slots.insert(actor, Arc::clone(&slot)) {
            if previous.settle(TeleportStatus::Superseded) {
                debug!(
                    "Teleport #{} for {} superseded by #{}",
                    previous.id, actor, slot.id
                );
            }
        }
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        slot
    }

    fn release_slot(&self, slot: &Arc<TeleportSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&slot.actor)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&slot.actor);
        }
    }

    /// Re-validate the actor and move it, unless the slot was settled elsewhere first.
    fn fire(&self, slot: &Arc<TeleportSlot>, destination: &Destination) {
        let origin = self.world.actor_state(slot.actor);
        let outcome = if origin.is_some() {
            TeleportStatus::Completed
        } else {
            TeleportStatus::Discarded
        };
        if !slot.settle(outcome) {
            self.counters.revoked.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.release_slot(slot);

        match origin {
            Some(origin) => {
                self.last_positions.record(slot.actor, origin.into());
                self.world.move_actor(slot.actor, destination);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Teleported {} to {:.1}, {:.1}, {:.1} in {}",
                    slot.actor,
                    destination.position.x,
                    destination.position.y,
                    destination.position.z,
                    destination.dimension
                );
            }
            None => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!("Teleport #{} dropped: {} is gone", slot.id, slot.actor);
            }
        }
    }

    fn stats(&self, queued: usize) -> SchedulerStats {
        SchedulerStats {
            queued,
            scheduled_total: self.counters.scheduled.load(Ordering::Relaxed),
            completed_total: self.counters.completed.load(Ordering::Relaxed),
            revoked_total: self.counters.revoked.load(Ordering::Relaxed),
            discarded_total: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable front end of the scheduler task.
#[derive(Clone)]
pub struct TeleportScheduler {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl TeleportScheduler {
    /// Spawn the scheduler task on the current tokio runtime.
    pub fn start(world: Arc<dyn World>, last_positions: Arc<LastPositionLog>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<SchedulerCommand>();
        let inner = Arc::new(Inner {
            world,
            last_positions,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            counters: Counters::default(),
        });
        tokio::spawn(run_scheduler(Arc::clone(&inner), rx));
        Self { inner, tx }
    }

    /// Teleport `actor` to `destination` after `delay_seconds`.
    ///
    /// A delay of zero or less moves the actor before returning. Otherwise the countdown
    /// starts and the returned handle can revoke it.
    pub fn schedule(
        &self,
        actor: ActorId,
        destination: Destination,
        delay_seconds: i64,
    ) -> TeleportHandle {
        if delay_seconds <= 0 {
            let slot = self.inner.claim_slot(actor, Instant::now());
            self.inner.fire(&slot, &destination);
            return TeleportHandle {
                inner: Arc::clone(&self.inner),
                slot,
            };
        }

        let due = deadline_after(delay_seconds as u64);
        let slot = self.inner.claim_slot(actor, due);
        debug!(
            "Teleport #{} for {} scheduled in {}s",
            slot.id, actor, delay_seconds
        );
        let queued = DeferredTeleport {
            slot: Arc::clone(&slot),
            destination,
        };
        if self.tx.send(SchedulerCommand::Enqueue(queued)).is_err() {
            warn!("Teleport scheduler stopped; dropping teleport for {}", actor);
            if slot.settle(TeleportStatus::Cancelled) {
                self.inner.counters.revoked.fetch_add(1, Ordering::Relaxed);
            }
            self.inner.release_slot(&slot);
        }
        TeleportHandle {
            inner: Arc::clone(&self.inner),
            slot,
        }
    }

    /// Cancel the actor's pending teleport, e.g. because it moved or disconnected.
    pub fn cancel_actor(&self, actor: ActorId) -> bool {
        let slot = {
            let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.remove(&actor)
        };
        match slot {
            Some(slot) => TeleportHandle {
                inner: Arc::clone(&self.inner),
                slot,
            }
            .cancel(),
            None => false,
        }
    }

    pub fn has_pending(&self, actor: ActorId) -> bool {
        let slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(&actor)
            .is_some_and(|slot| slot.status() == TeleportStatus::Pending)
    }

    pub async fn snapshot(&self) -> Option<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Stop the task. Teleports still counting down are cancelled.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(SchedulerCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

/// Deadlines past what `Instant` can represent are clamped to roughly thirty years out.
fn deadline_after(seconds: u64) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    let now = Instant::now();
    now.checked_add(Duration::from_secs(seconds))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending::<()>().await,
    }
}

async fn run_scheduler(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
    let mut queue: Vec<DeferredTeleport> = Vec::new();
    loop {
        let next_due = queue.iter().map(|t| t.slot.due).min();
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(SchedulerCommand::Enqueue(teleport)) => queue.push(teleport),
                Some(SchedulerCommand::Snapshot(resp)) => {
                    let queued = queue.iter().filter(|t| t.slot.status() == TeleportStatus::Pending).count();
                    let _ = resp.send(inner.stats(queued));
                }
                Some(SchedulerCommand::Shutdown(done)) => {
                    for teleport in queue.drain(..) {
                        if teleport.slot.settle(TeleportStatus::Cancelled) {
                            inner.counters.revoked.fetch_add(1, Ordering::Relaxed);
                        }
                        inner.release_slot(&teleport.slot);
                    }
                    let _ = done.send(());
                    break;
                }
                None => break,
            },
            _ = sleep_until_due(next_due) => {}
        }

        // Revoked teleports leave the queue without waiting for their deadline.
        queue.retain(|teleport| {
            let pending = teleport.slot.status() == TeleportStatus::Pending;
            if !pending {
                inner.counters.revoked.fetch_add(1, Ordering::Relaxed);
                inner.release_slot(&teleport.slot);
            }
            pending
        });

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|teleport| teleport.slot.due <= now);
        queue = waiting;
        for teleport in due {
            inner.fire(&teleport.slot, &teleport.destination);
        }
    }
    debug!("teleport scheduler loop terminated");
}
