use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const LOCATION_SCHEMA_VERSION: u8 = 1;

/// Home name used when a command omits one.
pub const DEFAULT_HOME_NAME: &str = "home";

/// Identifier of a connected actor (a player in the usual deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Dimension identifier, e.g. `minecraft:overworld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionId(pub String);

impl DimensionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn overworld() -> Self {
        Self::new("minecraft:overworld")
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Integer block coordinates, as stored for homes and warps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing a precise position (floor on every axis).
    pub fn containing(pos: Vec3) -> Self {
        Self {
            x: pos.x.floor() as i32,
            y: pos.y.floor() as i32,
            z: pos.z.floor() as i32,
        }
    }

    /// Centre of the block; teleports land here so the actor is not clipped into a wall.
    pub fn center(&self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Look direction in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Facing {
    pub yaw: f32,
    pub pitch: f32,
}

impl Facing {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }
}

/// A named location. Homes carry an owner, warps do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub owner: Option<ActorId>,
    pub name: String,
    pub position: BlockPos,
    pub dimension: DimensionId,
}

impl NamedLocation {
    pub fn home(
        owner: ActorId,
        name: impl Into<String>,
        position: BlockPos,
        dimension: DimensionId,
    ) -> Self {
        Self {
            owner: Some(owner),
            name: name.into(),
            position,
            dimension,
        }
    }

    pub fn warp(name: impl Into<String>, position: BlockPos, dimension: DimensionId) -> Self {
        Self {
            owner: None,
            name: name.into(),
            position,
            dimension,
        }
    }

    /// Where an actor lands when teleporting here.
    pub fn destination(&self) -> Destination {
        Destination {
            position: self.position.center(),
            dimension: self.dimension.clone(),
            facing: None,
        }
    }
}

/// Where an actor stood immediately before its last teleport.
#[derive(Debug, Clone, PartialEq)]
pub struct LastPosition {
    pub position: Vec3,
    pub dimension: DimensionId,
    pub facing: Facing,
}

impl LastPosition {
    pub fn destination(&self) -> Destination {
        Destination {
            position: self.position,
            dimension: self.dimension.clone(),
            facing: Some(self.facing),
        }
    }
}

/// Live state of a connected actor as reported by the world.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorState {
    pub position: Vec3,
    pub dimension: DimensionId,
    pub facing: Facing,
}

impl ActorState {
    pub fn destination(&self) -> Destination {
        Destination {
            position: self.position,
            dimension: self.dimension.clone(),
            facing: Some(self.facing),
        }
    }
}

impl From<ActorState> for LastPosition {
    fn from(state: ActorState) -> Self {
        Self {
            position: state.position,
            dimension: state.dimension,
            facing: state.facing,
        }
    }
}

/// Target of a teleport. `facing: None` keeps the actor's current look direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub position: Vec3,
    pub dimension: DimensionId,
    pub facing: Option<Facing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeleportMode {
    /// Requester moves to the responder ("tpa").
    ToTarget,
    /// Responder moves to the requester ("tpahere").
    ToRequester,
}

/// A pending proposal between two actors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub requester: ActorId,
    pub responder: ActorId,
    pub mode: TeleportMode,
    pub created_at: DateTime<Utc>,
}

impl PeerRequest {
    /// The actor that will be moved if the request is accepted.
    pub fn mover(&self) -> ActorId {
        match self.mode {
            TeleportMode::ToTarget => self.requester,
            TeleportMode::ToRequester => self.responder,
        }
    }

    /// The actor whose location is the destination.
    pub fn anchor(&self) -> ActorId {
        match self.mode {
            TeleportMode::ToTarget => self.responder,
            TeleportMode::ToRequester => self.requester,
        }
    }
}
