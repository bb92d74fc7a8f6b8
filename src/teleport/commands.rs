//! Teleport command parsing and the service that ties the core together.
//!
//! Commands are parsed from chat-style text (`home base`, `tpa Steve`, ...) and executed
//! against the location store, the scheduler and the negotiator. Permission overrides are
//! resolved here, before the core is called; the core itself never talks to players.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;

use crate::config::TeleportConfig;
use crate::logutil::escape_log;
use crate::teleport::errors::TeleportError;
use crate::teleport::locations::LocationStore;
use crate::teleport::negotiator::{PeerEvent, PeerRequestNegotiator};
use crate::teleport::scheduler::{TeleportScheduler, World};
use crate::teleport::types::{
    ActorId, BlockPos, NamedLocation, PeerRequest, TeleportMode, DEFAULT_HOME_NAME,
};

pub const PERM_HOME_LIMIT: &str = "teleport.home.limit.[int]";
pub const PERM_HOME_DELAY: &str = "teleport.home.timeout.[int]";
pub const PERM_BACK_DELAY: &str = "teleport.back.timeout.[int]";
pub const PERM_SPAWN_DELAY: &str = "teleport.spawn.timeout.[int]";
pub const PERM_TPA_DELAY: &str = "teleport.tpa.timeout.[int]";

/// Operator level required to create or delete warps.
pub const WARP_ADMIN_LEVEL: u8 = 4;

/// Permission collaborator.
pub trait Permissions: Send + Sync {
    /// Integer override of `key` for `actor`, or `default` when none is granted.
    fn resolve_override(&self, actor: ActorId, key: &str, default: i64) -> i64;

    /// Operator level of `actor` (0 for ordinary players).
    fn permission_level(&self, actor: ActorId) -> u8;
}

/// Notification collaborator.
pub trait Notifier: Send + Sync {
    fn send_message(&self, actor: ActorId, text: &str);

    /// Name shown to other players; defaults to the raw id.
    fn display_name(&self, actor: ActorId) -> String {
        actor.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeleportCommand {
    Home(Option<String>),      // HOME [name]
    ListHomes,                 // HOME LIST
    SetHome(Option<String>),   // SETHOME [name], HOME SET [name]
    DelHome(Option<String>),   // DELHOME [name]
    Warp(String),              // WARP name
    ListWarps,                 // WARP LIST
    SetWarp(String),           // SETWARP name, WARP SET name
    DelWarp(String),           // DELWARP name
    Back,                      // BACK
    Spawn,                     // SPAWN
    Tpa(ActorId),              // TPA player
    TpaHere(ActorId),          // TPAHERE player
    TpAccept(Option<ActorId>), // TPACCEPT [player]
    TpDeny(Option<ActorId>),   // TPDENY [player]
}

impl TeleportCommand {
    /// Parse one command line. Names are the rest of the line; player arguments go
    /// through `lookup`. Returns `None` for anything unrecognised or incomplete.
    pub fn parse(input: &str, lookup: impl Fn(&str) -> Option<ActorId>) -> Option<Self> {
        let input = input.trim().trim_start_matches('/');
        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };
        let name = || (!rest.is_empty()).then(|| rest.to_string());

        match verb.to_ascii_lowercase().as_str() {
            "home" => {
                let (sub, tail) = match rest.split_once(char::is_whitespace) {
                    Some((sub, tail)) => (sub, tail.trim()),
                    None => (rest, ""),
                };
                match sub.to_ascii_lowercase().as_str() {
                    "list" if tail.is_empty() => Some(Self::ListHomes),
                    "set" => Some(Self::SetHome((!tail.is_empty()).then(|| tail.to_string()))),
                    _ => Some(Self::Home(name())),
                }
            }
            "sethome" => Some(Self::SetHome(name())),
            "delhome" => Some(Self::DelHome(name())),
            "warp" => {
                let (sub, tail) = match rest.split_once(char::is_whitespace) {
                    Some((sub, tail)) => (sub, tail.trim()),
                    None => (rest, ""),
                };
                match sub.to_ascii_lowercase().as_str() {
                    "" => None,
                    "list" if tail.is_empty() => Some(Self::ListWarps),
                    "set" if !tail.is_empty() => Some(Self::SetWarp(tail.to_string())),
                    _ => Some(Self::Warp(rest.to_string())),
                }
            }
            "setwarp" => name().map(Self::SetWarp),
            "delwarp" => name().map(Self::DelWarp),
            "back" => Some(Self::Back),
            "spawn" => Some(Self::Spawn),
            "tpa" => lookup(rest).map(Self::Tpa),
            "tpahere" => lookup(rest).map(Self::TpaHere),
            "tpaccept" if rest.is_empty() => Some(Self::TpAccept(None)),
            "tpaccept" => lookup(rest).map(|p| Self::TpAccept(Some(p))),
            "tpdeny" if rest.is_empty() => Some(Self::TpDeny(None)),
            "tpdeny" => lookup(rest).map(|p| Self::TpDeny(Some(p))),
            _ => None,
        }
    }
}

/// Everything a teleport command needs, behind one handle.
pub struct TeleportService {
    config: TeleportConfig,
    locations: Arc<LocationStore>,
    scheduler: TeleportScheduler,
    negotiator: PeerRequestNegotiator,
    world: Arc<dyn World>,
    permissions: Arc<dyn Permissions>,
    notifier: Arc<dyn Notifier>,
}

impl TeleportService {
    /// Start the scheduler and negotiator. Expiry events arrive on the returned receiver;
    /// feed them to [`TeleportService::handle_event`] or [`TeleportService::pump_events`].
    pub fn start(
        config: TeleportConfig,
        locations: Arc<LocationStore>,
        world: Arc<dyn World>,
        permissions: Arc<dyn Permissions>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let scheduler = TeleportScheduler::start(Arc::clone(&world), locations.last_positions());
        let (negotiator, events) = PeerRequestNegotiator::new(Arc::clone(&world));
        let service = Self {
            config,
            locations,
            scheduler,
            negotiator,
            world,
            permissions,
            notifier,
        };
        (service, events)
    }

    pub fn locations(&self) -> &LocationStore {
        &self.locations
    }

    pub fn scheduler(&self) -> &TeleportScheduler {
        &self.scheduler
    }

    pub fn negotiator(&self) -> &PeerRequestNegotiator {
        &self.negotiator
    }

    fn tell(&self, actor: ActorId, text: &str) {
        self.notifier.send_message(actor, text);
    }

    fn delay_for(&self, actor: ActorId, key: &str) -> i64 {
        self.permissions
            .resolve_override(actor, key, self.config.teleport_delay)
    }

    fn announce_delay(&self, actor: ActorId, delay: i64) {
        if delay > 0 {
            self.tell(actor, &format!("Teleporting in {} seconds...", delay));
        }
    }

    /// Run a parsed command for `actor`.
    ///
    /// `Ok(false)` means the command was refused and the actor has been told why. Storage
    /// faults come back as `Err` and are not reported to the actor.
    pub fn execute(&self, actor: ActorId, command: TeleportCommand) -> Result<bool, TeleportError> {
        debug!("Teleport command from {}: {:?}", actor, command);
        match command {
            TeleportCommand::Home(name) => Ok(self.home(actor, &home_name(name))),
            TeleportCommand::ListHomes => Ok(self.list_homes(actor)),
            TeleportCommand::SetHome(name) => self.set_home(actor, &home_name(name)),
            TeleportCommand::DelHome(name) => self.del_home(actor, &home_name(name)),
            TeleportCommand::Warp(name) => Ok(self.warp(actor, &name)),
            TeleportCommand::ListWarps => Ok(self.list_warps(actor)),
            TeleportCommand::SetWarp(name) => self.set_warp(actor, &name),
            TeleportCommand::DelWarp(name) => self.del_warp(actor, &name),
            TeleportCommand::Back => Ok(self.back(actor)),
            TeleportCommand::Spawn => Ok(self.spawn(actor)),
            TeleportCommand::Tpa(target) => Ok(self.request(actor, target, TeleportMode::ToTarget)),
            TeleportCommand::TpaHere(target) => {
                Ok(self.request(actor, target, TeleportMode::ToRequester))
            }
            TeleportCommand::TpAccept(from) => Ok(self.accept(actor, from)),
            TeleportCommand::TpDeny(from) => Ok(self.deny(actor, from)),
        }
    }

    fn home(&self, actor: ActorId, name: &str) -> bool {
        let Some(home) = self.locations.get_home(actor, name) else {
            self.tell(actor, &format!("No such home: '{}'", name));
            return false;
        };
        let delay = self.delay_for(actor, PERM_HOME_DELAY);
        self.scheduler.schedule(actor, home.destination(), delay);
        self.announce_delay(actor, delay);
        true
    }

    fn list_homes(&self, actor: ActorId) -> bool {
        let mut text = String::from("Homes:");
        for name in self.locations.list_homes(actor).keys() {
            text.push_str("\n - ");
            text.push_str(name);
        }
        self.tell(actor, &text);
        true
    }

    fn set_home(&self, actor: ActorId, name: &str) -> Result<bool, TeleportError> {
        let state = self
            .world
            .actor_state(actor)
            .ok_or(TeleportError::InvalidActor(actor))?;
        let limit = self
            .permissions
            .resolve_override(actor, PERM_HOME_LIMIT, self.config.max_homes as i64)
            .max(0) as usize;
        let home = NamedLocation::home(
            actor,
            name,
            BlockPos::containing(state.position),
            state.dimension,
        );
        match self.locations.set_home(home, limit) {
            Ok(()) => {
                info!("{} set home '{}'", actor, escape_log(name));
                self.tell(actor, &format!("Home '{}' set", name));
                Ok(true)
            }
            Err(TeleportError::LimitExceeded { .. }) => {
                self.tell(actor, "Exceeded home limit!");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn del_home(&self, actor: ActorId, name: &str) -> Result<bool, TeleportError> {
        if self.locations.delete_home(actor, name)? {
            self.tell(actor, &format!("Home '{}' deleted", name));
            Ok(true)
        } else {
            self.tell(actor, &format!("No such home: '{}'", name));
            Ok(false)
        }
    }

    fn warp(&self, actor: ActorId, name: &str) -> bool {
        let Some(warp) = self.locations.get_warp(name) else {
            self.tell(actor, &format!("No such warp: '{}'", name));
            return false;
        };
        let delay = self.config.teleport_delay;
        self.scheduler.schedule(actor, warp.destination(), delay);
        self.announce_delay(actor, delay);
        true
    }

    fn list_warps(&self, actor: ActorId) -> bool {
        let mut text = String::from("Warps:");
        for name in self.locations.list_warps().keys() {
            text.push_str("\n - ");
            text.push_str(name);
        }
        self.tell(actor, &text);
        true
    }

    fn is_warp_admin(&self, actor: ActorId) -> bool {
        if self.permissions.permission_level(actor) >= WARP_ADMIN_LEVEL {
            return true;
        }
        self.tell(actor, "You do not have permission to manage warps");
        false
    }

    fn set_warp(&self, actor: ActorId, name: &str) -> Result<bool, TeleportError> {
        if !self.is_warp_admin(actor) {
            return Ok(false);
        }
        let state = self
            .world
            .actor_state(actor)
            .ok_or(TeleportError::InvalidActor(actor))?;
        let warp = NamedLocation::warp(name, BlockPos::containing(state.position), state.dimension);
        if self.locations.create_warp(warp)? {
            info!("{} created warp '{}'", actor, escape_log(name));
            self.tell(actor, &format!("Warp '{}' set", name));
            Ok(true)
        } else {
            self.tell(actor, &format!("Warp '{}' already exists", name));
            Ok(false)
        }
    }

    fn del_warp(&self, actor: ActorId, name: &str) -> Result<bool, TeleportError> {
        if !self.is_warp_admin(actor) {
            return Ok(false);
        }
        if self.locations.delete_warp(name)? {
            info!("{} deleted warp '{}'", actor, escape_log(name));
            self.tell(actor, &format!("Warp '{}' deleted", name));
            Ok(true)
        } else {
            self.tell(actor, &format!("No such warp: '{}'", name));
            Ok(false)
        }
    }

    fn back(&self, actor: ActorId) -> bool {
        let Some(last) = self.locations.consume_last_position(actor) else {
            self.tell(actor, "No known last location");
            return false;
        };
        self.tell(actor, "Teleporting to previous location");
        let delay = self.delay_for(actor, PERM_BACK_DELAY);
        self.announce_delay(actor, delay);
        self.scheduler.schedule(actor, last.destination(), delay);
        true
    }

    fn spawn(&self, actor: ActorId) -> bool {
        let (spawn, dimension) = self.world.spawn_point();
        let destination = NamedLocation::warp("spawn", spawn, dimension).destination();
        let delay = self.delay_for(actor, PERM_SPAWN_DELAY);
        self.scheduler.schedule(actor, destination, delay);
        self.announce_delay(actor, delay);
        true
    }

    fn request(&self, actor: ActorId, target: ActorId, mode: TeleportMode) -> bool {
        let timeout = self.config.tpa_timeout;
        if !self.negotiator.propose(actor, target, mode, timeout) {
            self.tell(actor, "Please specify a user");
            return false;
        }
        self.tell(actor, "Requested TPA");

        let name = self.notifier.display_name(actor);
        let ask = match mode {
            TeleportMode::ToTarget => "has requested to teleport to you",
            TeleportMode::ToRequester => "has requested you teleport to them",
        };
        self.tell(
            target,
            &format!(
                "{} {}. To accept, type /tpaccept {}, to deny, type /tpdeny {}. \
                 This request will time out in {} seconds.",
                name, ask, name, name, timeout
            ),
        );
        true
    }

    fn accept(&self, actor: ActorId, from: Option<ActorId>) -> bool {
        let Some(resolution) = self.negotiator.resolve(actor, from) else {
            self.tell(actor, "No pending teleport request");
            return false;
        };
        let requester = resolution.request.requester;
        let Some(anchor) = self.world.actor_state(resolution.anchor) else {
            self.tell(actor, "That teleport can no longer happen");
            return false;
        };
        let delay = self.delay_for(actor, PERM_TPA_DELAY);
        let mut destination = anchor.destination();
        destination.facing = None;
        self.scheduler.schedule(resolution.mover, destination, delay);
        self.tell(requester, "TPA accepted");
        self.announce_delay(resolution.mover, delay);
        true
    }

    fn deny(&self, actor: ActorId, from: Option<ActorId>) -> bool {
        let Some(resolution) = self.negotiator.resolve(actor, from) else {
            self.tell(actor, "No pending teleport request");
            return false;
        };
        self.tell(resolution.request.requester, "TPA denied");
        true
    }

    pub fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Expired(PeerRequest { requester, .. }) => {
                self.tell(requester, "TPA timed out");
            }
        }
    }

    /// Deliver expiry events until the negotiator is dropped.
    pub async fn pump_events(&self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
    }

    /// Cancel the actor's pending teleport because it moved. Returns true if one was
    /// cancelled.
    pub fn handle_actor_moved(&self, actor: ActorId) -> bool {
        let cancelled = self.scheduler.cancel_actor(actor);
        if cancelled {
            self.tell(actor, "Teleport cancelled");
        }
        cancelled
    }

    /// Forget everything pending for an actor that left the server.
    pub fn handle_disconnect(&self, actor: ActorId) {
        self.scheduler.cancel_actor(actor);
        let dropped = self.negotiator.forget_actor(actor);
        debug!("{} disconnected; dropped {} peer requests", actor, dropped);
    }

    /// Home names of `actor` starting with `prefix`.
    pub fn suggest_homes(&self, actor: ActorId, prefix: &str) -> Vec<String> {
        matching(self.locations.list_homes(actor).into_keys(), prefix)
    }

    /// Warp names starting with `prefix`.
    pub fn suggest_warps(&self, prefix: &str) -> Vec<String> {
        matching(self.locations.list_warps().into_keys(), prefix)
    }

    /// Names that `actor` can pass to tpaccept / tpdeny.
    pub fn suggest_requesters(&self, actor: ActorId) -> Vec<String> {
        self.negotiator
            .pending_requester(actor)
            .map(|requester| self.notifier.display_name(requester))
            .into_iter()
            .collect()
    }
}

fn home_name(name: Option<String>) -> String {
    name.unwrap_or_else(|| DEFAULT_HOME_NAME.to_string())
}

fn matching(names: impl Iterator<Item = String>, prefix: &str) -> Vec<String> {
    let prefix = prefix.to_lowercase();
    names
        .filter(|name| name.to_lowercase().starts_with(&prefix))
        .collect()
}
