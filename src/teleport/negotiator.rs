//! Peer teleport requests ("tpa" / "tpahere").
//!
//! Every responder owns one slot. A proposal fills it (replacing whatever was pending and
//! restarting the timeout); accept, deny and expiry empty it. The slot table sits behind a
//! single mutex and every slot carries a generation number, so when a timer wakes up at
//! the same moment a responder answers, whichever takes the lock first settles the request
//! and the other finds the generation gone and does nothing.
//!
//! Expiry is reported as a [`PeerEvent`] on the channel returned by
//! [`PeerRequestNegotiator::new`]; resolution is reported by the return value of
//! [`PeerRequestNegotiator::resolve`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::teleport::scheduler::World;
use crate::teleport::types::{ActorId, PeerRequest, TeleportMode};

/// Something that happened to a pending request without anyone asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The timeout elapsed before the responder answered.
    Expired(PeerRequest),
}

/// A request settled by its responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request: PeerRequest,
    /// Actor that moves if the request was accepted.
    pub mover: ActorId,
    /// Actor whose location is the destination.
    pub anchor: ActorId,
}

impl From<PeerRequest> for Resolution {
    fn from(request: PeerRequest) -> Self {
        Self {
            mover: request.mover(),
            anchor: request.anchor(),
            request,
        }
    }
}

struct PendingSlot {
    request: PeerRequest,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    world: Arc<dyn World>,
    pending: Mutex<HashMap<ActorId, PendingSlot>>,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Inner {
    fn expire(&self, responder: ActorId, generation: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let current = pending
            .get(&responder)
            .is_some_and(|slot| slot.generation == generation);
        if !current {
            return;
        }
        if let Some(slot) = pending.remove(&responder) {
            debug!(
                "Peer request {} -> {} expired",
                slot.request.requester, responder
            );
            if self.events.send(PeerEvent::Expired(slot.request)).is_err() {
                warn!("Peer event receiver dropped; expiry for {} lost", responder);
            }
        }
    }
}

#[derive(Clone)]
pub struct PeerRequestNegotiator {
    inner: Arc<Inner>,
}

impl PeerRequestNegotiator {
    /// Create a negotiator and the channel its expiry events arrive on.
    pub fn new(world: Arc<dyn World>) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            world,
            pending: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            events,
        });
        (Self { inner }, rx)
    }

    /// Open a request from `requester` to `responder`, replacing any request pending for
    /// `responder`. The replaced request is dropped silently; it never expires.
    ///
    /// Returns false without side effects if the responder is not a connected actor or is
    /// the requester itself. Must be called inside a tokio runtime.
    pub fn propose(
        &self,
        requester: ActorId,
        responder: ActorId,
        mode: TeleportMode,
        timeout_seconds: i64,
    ) -> bool {
        if requester == responder {
            debug!("Rejecting peer request from {} to itself", requester);
            return false;
        }
        if self.inner.world.actor_state(responder).is_none() {
            debug!("Rejecting peer request to absent actor {}", responder);
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let request = PeerRequest {
            requester,
            responder,
            mode,
            created_at: Utc::now(),
        };
        let timeout = Duration::from_secs(timeout_seconds.max(0) as u64);

        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.expire(responder, generation);
        });
        let slot = PendingSlot {
            request,
            generation,
            timer,
        };
        if let Some(previous) = pending.insert(responder, slot) {
            previous.timer.abort();
            debug!(
                "Peer request {} -> {} replaced by one from {}",
                previous.request.requester, responder, requester
            );
        }
        debug!(
            "Peer request {} -> {} ({:?}) open for {}s",
            requester, responder, mode, timeout_seconds
        );
        true
    }

    /// Settle the request pending for `responder`.
    ///
    /// With `requester` set, only a request from that actor matches. On a match the slot is
    /// emptied, its timer is cancelled and the request is returned; otherwise nothing
    /// changes. Accept and deny both go through here; what to do with the result is up to
    /// the caller.
    pub fn resolve(&self, responder: ActorId, requester: Option<ActorId>) -> Option<Resolution> {
        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let matches = pending.get(&responder).is_some_and(|slot| {
            requester.map_or(true, |wanted| slot.request.requester == wanted)
        });
        if !matches {
            return None;
        }
        let slot = pending.remove(&responder)?;
        slot.timer.abort();
        debug!(
            "Peer request {} -> {} resolved",
            slot.request.requester, responder
        );
        Some(slot.request.into())
    }

    /// Drop every request the actor takes part in, e.g. on disconnect. No events are sent.
    pub fn forget_actor(&self, actor: ActorId) -> usize {
        let mut pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let before = pending.len();
        pending.retain(|responder, slot| {
            let involved = *responder == actor || slot.request.requester == actor;
            if involved {
                slot.timer.abort();
            }
            !involved
        });
        before - pending.len()
    }

    /// Whether `responder` has a request waiting for an answer.
    pub fn is_pending_for(&self, responder: ActorId) -> bool {
        let pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.contains_key(&responder)
    }

    /// The request waiting on `responder`, if any.
    pub fn pending_for(&self, responder: ActorId) -> Option<PeerRequest> {
        let pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(&responder).map(|slot| slot.request.clone())
    }

    /// Requester of the request waiting on `responder`; feeds argument suggestions.
    pub fn pending_requester(&self, responder: ActorId) -> Option<ActorId> {
        self.pending_for(responder).map(|request| request.requester)
    }

    pub fn pending_count(&self) -> usize {
        let pending = self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teleport::types::{ActorState, BlockPos, Destination, DimensionId, Facing, Vec3};
    use std::collections::HashSet;

    #[derive(Default)]
    struct Lobby {
        online: Mutex<HashSet<ActorId>>,
    }

    impl Lobby {
        fn join(&self) -> ActorId {
            let actor = ActorId::new();
            self.online.lock().unwrap().insert(actor);
            actor
        }
    }

    impl World for Lobby {
        fn actor_state(&self, actor: ActorId) -> Option<ActorState> {
            self.online.lock().unwrap().contains(&actor).then(|| ActorState {
                position: Vec3::default(),
                dimension: DimensionId::overworld(),
                facing: Facing::default(),
            })
        }

        fn move_actor(&self, _actor: ActorId, _destination: &Destination) {}

        fn spawn_point(&self) -> (BlockPos, DimensionId) {
            (BlockPos::new(0, 64, 0), DimensionId::overworld())
        }
    }

    fn setup() -> (PeerRequestNegotiator, mpsc::UnboundedReceiver<PeerEvent>, Arc<Lobby>) {
        let lobby = Arc::new(Lobby::default());
        let (negotiator, events) = PeerRequestNegotiator::new(lobby.clone());
        (negotiator, events, lobby)
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_expires_once() {
        let (negotiator, mut events, lobby) = setup();
        let p = lobby.join();
        let q = lobby.join();

        assert!(negotiator.propose(p, q, TeleportMode::ToTarget, 30));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(events.try_recv().is_err());
        assert!(negotiator.is_pending_for(q));

        tokio::time::sleep(Duration::from_secs(2)).await;
        match events.try_recv() {
            Ok(PeerEvent::Expired(request)) => {
                assert_eq!(request.requester, p);
                assert_eq!(request.responder, q);
            }
            other => panic!("expected expiry, got {:?}", other),
        }
        assert!(events.try_recv().is_err());
        assert!(negotiator.resolve(q, None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_proposal_replaces_pending_one() {
        let (negotiator, mut events, lobby) = setup();
        let first = lobby.join();
        let second = lobby.join();
        let q = lobby.join();

        assert!(negotiator.propose(first, q, TeleportMode::ToTarget, 30));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(negotiator.propose(second, q, TeleportMode::ToRequester, 30));
        assert_eq!(negotiator.pending_count(), 1);
        assert_eq!(negotiator.pending_requester(q), Some(second));

        // The first timer would have fired at 30s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(events.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(16)).await;
        match events.try_recv() {
            Ok(PeerEvent::Expired(request)) => assert_eq!(request.requester, second),
            other => panic!("expected expiry of second request, got {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_honours_requester_filter() {
        let (negotiator, mut events, lobby) = setup();
        let p = lobby.join();
        let q = lobby.join();
        let stranger = lobby.join();

        assert!(negotiator.propose(p, q, TeleportMode::ToRequester, 30));
        assert!(negotiator.resolve(q, Some(stranger)).is_none());
        assert!(negotiator.is_pending_for(q));

        let resolution = negotiator.resolve(q, Some(p)).expect("resolved");
        assert_eq!(resolution.mover, q);
        assert_eq!(resolution.anchor, p);
        assert!(!negotiator.is_pending_for(q));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_proposals_change_nothing() {
        let (negotiator, _events, lobby) = setup();
        let p = lobby.join();
        let offline = ActorId::new();

        assert!(!negotiator.propose(p, p, TeleportMode::ToTarget, 30));
        assert!(!negotiator.propose(p, offline, TeleportMode::ToTarget, 30));
        assert_eq!(negotiator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_at_expiry_instant_settles_once() {
        let (negotiator, mut events, lobby) = setup();
        let p = lobby.join();
        let q = lobby.join();

        assert!(negotiator.propose(p, q, TeleportMode::ToTarget, 30));
        tokio::time::sleep(Duration::from_secs(30)).await;
        let resolved = negotiator.resolve(q, None).is_some();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut expired = 0;
        while let Ok(PeerEvent::Expired(_)) = events.try_recv() {
            expired += 1;
        }
        assert_eq!(resolved as usize + expired, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolve_and_timeout_never_double_fire() {
        let (negotiator, mut events, lobby) = setup();
        let q = lobby.join();
        let mut resolved = HashSet::new();
        let mut requesters = Vec::new();

        for _ in 0..200 {
            let p = lobby.join();
            requesters.push(p);
            assert!(negotiator.propose(p, q, TeleportMode::ToTarget, 0));
            tokio::task::yield_now().await;
            if let Some(resolution) = negotiator.resolve(q, Some(p)) {
                resolved.insert(resolution.request.requester);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut expired = HashSet::new();
        while let Ok(PeerEvent::Expired(request)) = events.try_recv() {
            assert!(expired.insert(request.requester), "expired twice");
        }
        for p in requesters {
            assert!(
                resolved.contains(&p) ^ expired.contains(&p),
                "request from {} settled {} times",
                p,
                resolved.contains(&p) as u8 + expired.contains(&p) as u8
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forget_actor_drops_both_directions() {
        let (negotiator, mut events, lobby) = setup();
        let a = lobby.join();
        let b = lobby.join();
        let c = lobby.join();

        assert!(negotiator.propose(a, b, TeleportMode::ToTarget, 30));
        assert!(negotiator.propose(c, a, TeleportMode::ToTarget, 30));
        assert_eq!(negotiator.forget_actor(a), 2);
        assert_eq!(negotiator.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(events.try_recv().is_err());
    }
}
