//! Write-through cache for homes, warps and last positions.
//!
//! The durable table is loaded once when the store opens; afterwards every read is served
//! from memory and every write goes to the backend first, then to the cache. A write holds
//! the cache's write lock for its whole duration, so concurrent writers to the same key
//! are serialized and the cache always agrees with storage on which write won. If the
//! backend fails the cache is left untouched and the error is returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info, warn};

use crate::logutil::escape_log;
use crate::teleport::errors::TeleportError;
use crate::teleport::storage::{LocationBackend, LocationTable};
use crate::teleport::types::{ActorId, LastPosition, NamedLocation};

type HomeMap = HashMap<ActorId, HashMap<String, NamedLocation>>;

/// Per-owner "where was I before teleporting" slots. Memory only; lost on restart.
#[derive(Debug, Default)]
pub struct LastPositionLog {
    entries: Mutex<HashMap<ActorId, LastPosition>>,
}

impl LastPositionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the owner's last position.
    pub fn record(&self, owner: ActorId, position: LastPosition) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(owner, position);
    }

    /// Take the owner's last position, leaving the slot empty.
    pub fn consume(&self, owner: ActorId) -> Option<LastPosition> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&owner)
    }

    pub fn contains(&self, owner: ActorId) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&owner)
    }
}

/// Cached view of the location tables.
pub struct LocationStore {
    backend: Box<dyn LocationBackend>,
    homes: RwLock<HomeMap>,
    warps: RwLock<HashMap<String, NamedLocation>>,
    last_positions: Arc<LastPositionLog>,
}

impl LocationStore {
    /// Load both tables from `backend` and build the cache.
    pub fn open(backend: Box<dyn LocationBackend>) -> Result<Self, TeleportError> {
        let mut homes: HomeMap = HashMap::new();
        let mut home_rows = 0usize;
        for home in backend.select_all(LocationTable::Homes)? {
            let Some(owner) = home.owner else {
                warn!("Skipping home row without owner: {}", escape_log(&home.name));
                continue;
            };
            homes.entry(owner).or_default().insert(home.name.clone(), home);
            home_rows += 1;
        }

        let warps: HashMap<String, NamedLocation> = backend
            .select_all(LocationTable::Warps)?
            .into_iter()
            .map(|warp| (warp.name.clone(), warp))
            .collect();

        info!(
            "Loaded {} homes for {} owners and {} warps",
            home_rows,
            homes.len(),
            warps.len()
        );

        Ok(Self {
            backend,
            homes: RwLock::new(homes),
            warps: RwLock::new(warps),
            last_positions: Arc::new(LastPositionLog::new()),
        })
    }

    /// Shared handle to the last-position log, for the teleport scheduler.
    pub fn last_positions(&self) -> Arc<LastPositionLog> {
        Arc::clone(&self.last_positions)
    }

    pub fn get_home(&self, owner: ActorId, name: &str) -> Option<NamedLocation> {
        let homes = self.homes.read().unwrap_or_else(PoisonError::into_inner);
        homes.get(&owner).and_then(|owned| owned.get(name)).cloned()
    }

    /// All homes of `owner`, sorted by name.
    pub fn list_homes(&self, owner: ActorId) -> BTreeMap<String, NamedLocation> {
        let homes = self.homes.read().unwrap_or_else(PoisonError::into_inner);
        homes
            .get(&owner)
            .map(|owned| {
                owned
                    .iter()
                    .map(|(name, home)| (name.clone(), home.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn home_count(&self, owner: ActorId) -> usize {
        let homes = self.homes.read().unwrap_or_else(PoisonError::into_inner);
        homes.get(&owner).map_or(0, HashMap::len)
    }

    /// `(owners, homes)` across the whole cache.
    pub fn home_totals(&self) -> (usize, usize) {
        let homes = self.homes.read().unwrap_or_else(PoisonError::into_inner);
        let total = homes.values().map(HashMap::len).sum();
        (homes.len(), total)
    }

    /// Create or overwrite a home. A new name is refused once the owner holds `limit` homes;
    /// overwriting an existing name never counts against the limit.
    pub fn set_home(&self, location: NamedLocation, limit: usize) -> Result<(), TeleportError> {
        let Some(owner) = location.owner else {
            return Err(TeleportError::NotAHome(location.name));
        };

        let mut homes = self.homes.write().unwrap_or_else(PoisonError::into_inner);
        let owned = homes.get(&owner);
        let exists = owned.is_some_and(|owned| owned.contains_key(&location.name));
        let count = owned.map_or(0, HashMap::len);

        if exists {
            self.backend.replace(LocationTable::Homes, &location)?;
        } else {
            if count >= limit {
                debug!(
                    "Home limit reached for {}: {}/{}, refusing '{}'",
                    owner,
                    count,
                    limit,
                    escape_log(&location.name)
                );
                return Err(TeleportError::LimitExceeded { limit });
            }
            self.backend.insert(LocationTable::Homes, &location)?;
        }

        debug!(
            "Home '{}' of {} set at {} in {}",
            escape_log(&location.name),
            owner,
            location.position,
            location.dimension
        );
        homes
            .entry(owner)
            .or_default()
            .insert(location.name.clone(), location);
        Ok(())
    }

    /// Delete a home. Returns `Ok(false)` with no side effect if it does not exist.
    pub fn delete_home(&self, owner: ActorId, name: &str) -> Result<bool, TeleportError> {
        let mut homes = self.homes.write().unwrap_or_else(PoisonError::into_inner);
        let exists = homes
            .get(&owner)
            .is_some_and(|owned| owned.contains_key(name));
        if !exists {
            return Ok(false);
        }

        self.backend.delete(LocationTable::Homes, Some(owner), name)?;

        if let Some(owned) = homes.get_mut(&owner) {
            owned.remove(name);
            if owned.is_empty() {
                homes.remove(&owner);
            }
        }
        debug!("Home '{}' of {} deleted", escape_log(name), owner);
        Ok(true)
    }

    pub fn get_warp(&self, name: &str) -> Option<NamedLocation> {
        let warps = self.warps.read().unwrap_or_else(PoisonError::into_inner);
        warps.get(name).cloned()
    }

    /// All warps, sorted by name.
    pub fn list_warps(&self) -> BTreeMap<String, NamedLocation> {
        let warps = self.warps.read().unwrap_or_else(PoisonError::into_inner);
        warps
            .iter()
            .map(|(name, warp)| (name.clone(), warp.clone()))
            .collect()
    }

    /// Create or overwrite a warp.
    pub fn set_warp(&self, location: NamedLocation) -> Result<(), TeleportError> {
        let location = NamedLocation {
            owner: None,
            ..location
        };
        let mut warps = self.warps.write().unwrap_or_else(PoisonError::into_inner);
        if warps.contains_key(&location.name) {
            self.backend.replace(LocationTable::Warps, &location)?;
        } else {
            self.backend.insert(LocationTable::Warps, &location)?;
        }
        debug!(
            "Warp '{}' set at {} in {}",
            escape_log(&location.name),
            location.position,
            location.dimension
        );
        warps.insert(location.name.clone(), location);
        Ok(())
    }

    /// Create a warp only if the name is free. Returns `Ok(false)` if it already exists.
    pub fn create_warp(&self, location: NamedLocation) -> Result<bool, TeleportError> {
        let location = NamedLocation {
            owner: None,
            ..location
        };
        let mut warps = self.warps.write().unwrap_or_else(PoisonError::into_inner);
        if warps.contains_key(&location.name) {
            return Ok(false);
        }
        self.backend.insert(LocationTable::Warps, &location)?;
        debug!("Warp '{}' created", escape_log(&location.name));
        warps.insert(location.name.clone(), location);
        Ok(true)
    }

    /// Delete a warp. Returns `Ok(false)` with no side effect if it does not exist.
    pub fn delete_warp(&self, name: &str) -> Result<bool, TeleportError> {
        let mut warps = self.warps.write().unwrap_or_else(PoisonError::into_inner);
        if !warps.contains_key(name) {
            return Ok(false);
        }
        self.backend.delete(LocationTable::Warps, None, name)?;
        warps.remove(name);
        debug!("Warp '{}' deleted", escape_log(name));
        Ok(true)
    }

    pub fn record_last_position(&self, owner: ActorId, position: LastPosition) {
        self.last_positions.record(owner, position);
    }

    pub fn consume_last_position(&self, owner: ActorId) -> Option<LastPosition> {
        self.last_positions.consume(owner)
    }
}
