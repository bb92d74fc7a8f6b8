//! Test doubles for the host collaborators and a throwaway sled store.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use warpgate::teleport::{
    ActorId, ActorState, BlockPos, Destination, DimensionId, Facing, LocationStore, Notifier,
    Permissions, SledLocationBackend, Vec3, World,
};

/// In-memory world: actors are "online" while they have a state entry.
#[derive(Default)]
pub struct FakeWorld {
    actors: Mutex<HashMap<ActorId, ActorState>>,
    moves: Mutex<Vec<(ActorId, Destination)>>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, actor: ActorId, x: f64, y: f64, z: f64) {
        self.actors.lock().unwrap().insert(
            actor,
            ActorState {
                position: Vec3::new(x, y, z),
                dimension: DimensionId::overworld(),
                facing: Facing::new(90.0, 0.0),
            },
        );
    }

    pub fn leave(&self, actor: ActorId) {
        self.actors.lock().unwrap().remove(&actor);
    }

    pub fn position(&self, actor: ActorId) -> Option<Vec3> {
        self.actors.lock().unwrap().get(&actor).map(|s| s.position)
    }

    pub fn moves(&self) -> Vec<(ActorId, Destination)> {
        self.moves.lock().unwrap().clone()
    }

    pub fn moves_of(&self, actor: ActorId) -> usize {
        self.moves
            .lock()
            .unwrap()
            .iter()
            .filter(|(moved, _)| *moved == actor)
            .count()
    }
}

impl World for FakeWorld {
    fn actor_state(&self, actor: ActorId) -> Option<ActorState> {
        self.actors.lock().unwrap().get(&actor).cloned()
    }

    fn move_actor(&self, actor: ActorId, destination: &Destination) {
        if let Some(state) = self.actors.lock().unwrap().get_mut(&actor) {
            state.position = destination.position;
            state.dimension = destination.dimension.clone();
            if let Some(facing) = destination.facing {
                state.facing = facing;
            }
        }
        self.moves
            .lock()
            .unwrap()
            .push((actor, destination.clone()));
    }

    fn spawn_point(&self) -> (BlockPos, DimensionId) {
        (BlockPos::new(0, 64, 0), DimensionId::overworld())
    }
}

/// World whose moves only land on the next `tick`, like a host that must apply them on
/// its own game thread. Reads go straight to the wrapped world.
pub struct TickWorld {
    world: Arc<FakeWorld>,
    queued: Mutex<Vec<(ActorId, Destination)>>,
}

impl TickWorld {
    pub fn new(world: Arc<FakeWorld>) -> Arc<Self> {
        Arc::new(Self {
            world,
            queued: Mutex::new(Vec::new()),
        })
    }

    pub fn queued(&self) -> usize {
        self.queued.lock().unwrap().len()
    }

    /// Apply every queued move in arrival order. Returns how many were applied.
    pub fn tick(&self) -> usize {
        let drained: Vec<_> = self.queued.lock().unwrap().drain(..).collect();
        for (actor, destination) in &drained {
            self.world.move_actor(*actor, destination);
        }
        drained.len()
    }
}

impl World for TickWorld {
    fn actor_state(&self, actor: ActorId) -> Option<ActorState> {
        self.world.actor_state(actor)
    }

    fn move_actor(&self, actor: ActorId, destination: &Destination) {
        self.queued
            .lock()
            .unwrap()
            .push((actor, destination.clone()));
    }

    fn spawn_point(&self) -> (BlockPos, DimensionId) {
        self.world.spawn_point()
    }
}

#[derive(Default)]
pub struct FakePermissions {
    overrides: Mutex<HashMap<(ActorId, String), i64>>,
    levels: Mutex<HashMap<ActorId, u8>>,
}

impl FakePermissions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant(&self, actor: ActorId, key: &str, value: i64) {
        self.overrides
            .lock()
            .unwrap()
            .insert((actor, key.to_string()), value);
    }

    pub fn set_level(&self, actor: ActorId, level: u8) {
        self.levels.lock().unwrap().insert(actor, level);
    }
}

impl Permissions for FakePermissions {
    fn resolve_override(&self, actor: ActorId, key: &str, default: i64) -> i64 {
        self.overrides
            .lock()
            .unwrap()
            .get(&(actor, key.to_string()))
            .copied()
            .unwrap_or(default)
    }

    fn permission_level(&self, actor: ActorId) -> u8 {
        self.levels.lock().unwrap().get(&actor).copied().unwrap_or(0)
    }
}

/// Records every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ActorId, String)>>,
    names: Mutex<HashMap<ActorId, String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn name(&self, actor: ActorId, name: &str) {
        self.names.lock().unwrap().insert(actor, name.to_string());
    }

    pub fn messages_for(&self, actor: ActorId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == actor)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last_for(&self, actor: ActorId) -> Option<String> {
        self.messages_for(actor).pop()
    }
}

impl Notifier for RecordingNotifier {
    fn send_message(&self, actor: ActorId, text: &str) {
        self.sent.lock().unwrap().push((actor, text.to_string()));
    }

    fn display_name(&self, actor: ActorId) -> String {
        self.names
            .lock()
            .unwrap()
            .get(&actor)
            .cloned()
            .unwrap_or_else(|| actor.to_string())
    }
}

/// Fresh sled-backed store in a temp dir. Keep the `TempDir` alive for the test's duration.
pub fn temp_store() -> (Arc<LocationStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store_at(&dir);
    (store, dir)
}

pub fn open_store_at(dir: &TempDir) -> Arc<LocationStore> {
    let backend = SledLocationBackend::open(dir.path().join("teleport")).expect("backend");
    Arc::new(LocationStore::open(Box::new(backend)).expect("store"))
}
