//! Teleport core: deferred teleports, peer teleport requests and the
//! write-through cache of homes, warps and last positions.
//!
//! The pieces are independent of any game engine. The host supplies a
//! [`World`] to read and move actors, plus [`Permissions`] and [`Notifier`]
//! for the command layer.

pub mod commands;
pub mod errors;
pub mod locations;
pub mod negotiator;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use commands::{Notifier, Permissions, TeleportCommand, TeleportService};
pub use errors::TeleportError;
pub use locations::{LastPositionLog, LocationStore};
pub use negotiator::{PeerEvent, PeerRequestNegotiator, Resolution};
pub use scheduler::{SchedulerStats, TeleportHandle, TeleportScheduler, TeleportStatus, World};
pub use storage::{LocationBackend, LocationTable, SledLocationBackend};
pub use types::{
    ActorId, ActorState, BlockPos, Destination, DimensionId, Facing, LastPosition,
    NamedLocation, PeerRequest, TeleportMode, Vec3, DEFAULT_HOME_NAME,
};
