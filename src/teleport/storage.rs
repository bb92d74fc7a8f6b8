//! Durable storage for homes and warps.
//!
//! [`LocationBackend`] is the row-oriented contract the location cache writes through;
//! [`SledLocationBackend`] implements it on an embedded sled database. Rows are bincode
//! encoded and versioned so a schema change is detected instead of silently misread.
//!
//! A write counts only once it is flushed. If the flush fails the tree change is undone
//! before the error is returned, so a failed call leaves the table as it was.

use std::path::Path;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult};
use sled::IVec;

use crate::teleport::errors::TeleportError;
use crate::teleport::types::{ActorId, NamedLocation, LOCATION_SCHEMA_VERSION};

const TREE_LOCATIONS: &str = "teleport_locations";

/// Logical tables held by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationTable {
    Homes,
    Warps,
}

impl LocationTable {
    fn prefix(self) -> &'static str {
        match self {
            LocationTable::Homes => "homes:",
            LocationTable::Warps => "warps:",
        }
    }

    fn entity(self) -> &'static str {
        match self {
            LocationTable::Homes => "home",
            LocationTable::Warps => "warp",
        }
    }
}

/// Durable-store collaborator. Each call is its own transaction.
pub trait LocationBackend: Send + Sync {
    /// Insert a row. An existing row under the same key is overwritten.
    fn insert(&self, table: LocationTable, location: &NamedLocation) -> Result<(), TeleportError>;

    /// Delete the row for `(owner, name)` and insert `location` as one atomic unit.
    fn replace(&self, table: LocationTable, location: &NamedLocation)
        -> Result<(), TeleportError>;

    /// Delete the row for `(owner, name)`. Returns whether a row was present.
    fn delete(
        &self,
        table: LocationTable,
        owner: Option<ActorId>,
        name: &str,
    ) -> Result<bool, TeleportError>;

    fn select_all(&self, table: LocationTable) -> Result<Vec<NamedLocation>, TeleportError>;
}

#[derive(Serialize, Deserialize)]
struct LocationRow {
    schema_version: u8,
    location: NamedLocation,
}

/// Sled-backed persistence for named locations.
pub struct SledLocationBackend {
    _db: sled::Db,
    locations: sled::Tree,
    #[cfg(test)]
    fail_flush: Arc<AtomicBool>,
}

impl SledLocationBackend {
    /// Open (or create) the location database rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TeleportError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let locations = db.open_tree(TREE_LOCATIONS)?;
        debug!("Opened location store at {}", path_ref.display());
        Ok(Self {
            _db: db,
            locations,
            #[cfg(test)]
            fail_flush: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Switch that makes every following flush fail.
    #[cfg(test)]
    pub(crate) fn flush_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_flush)
    }

    fn flush(&self) -> sled::Result<usize> {
        #[cfg(test)]
        {
            if self.fail_flush.load(Ordering::SeqCst) {
                return Err(sled::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected flush failure",
                )));
            }
        }
        self.locations.flush()
    }

    /// Flush a change to `key`. On failure put back `previous` (the value before the
    /// change) and return the flush error.
    fn commit(&self, key: &[u8], previous: Option<IVec>) -> Result<(), TeleportError> {
        let err = match self.flush() {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        let restored = match previous {
            Some(value) => self.locations.insert(key, value).map(|_| ()),
            None => self.locations.remove(key).map(|_| ()),
        };
        if let Err(undo) = restored {
            warn!(
                "Could not undo unflushed write to {}: {}",
                String::from_utf8_lossy(key),
                undo
            );
        }
        Err(err.into())
    }

    fn key(
        table: LocationTable,
        owner: Option<ActorId>,
        name: &str,
    ) -> Result<Vec<u8>, TeleportError> {
        let key = match (table, owner) {
            (LocationTable::Homes, Some(owner)) => format!("{}{}:{}", table.prefix(), owner, name),
            (LocationTable::Homes, None) => return Err(TeleportError::NotAHome(name.to_string())),
            (LocationTable::Warps, _) => format!("{}{}", table.prefix(), name),
        };
        Ok(key.into_bytes())
    }

    fn serialize(location: &NamedLocation) -> Result<Vec<u8>, TeleportError> {
        let row = LocationRow {
            schema_version: LOCATION_SCHEMA_VERSION,
            location: location.clone(),
        };
        Ok(bincode::serialize(&row)?)
    }

    fn deserialize(table: LocationTable, bytes: IVec) -> Result<NamedLocation, TeleportError> {
        let row: LocationRow = bincode::deserialize(&bytes)?;
        if row.schema_version != LOCATION_SCHEMA_VERSION {
            return Err(TeleportError::SchemaMismatch {
                entity: table.entity(),
                expected: LOCATION_SCHEMA_VERSION,
                found: row.schema_version,
            });
        }
        Ok(row.location)
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: LocationTable) -> usize {
        self.locations.scan_prefix(table.prefix().as_bytes()).count()
    }
}

impl LocationBackend for SledLocationBackend {
    fn insert(&self, table: LocationTable, location: &NamedLocation) -> Result<(), TeleportError> {
        let key = Self::key(table, location.owner, &location.name)?;
        let bytes = Self::serialize(location)?;
        let previous = self.locations.insert(key.as_slice(), bytes)?;
        self.commit(&key, previous)
    }

    fn replace(
        &self,
        table: LocationTable,
        location: &NamedLocation,
    ) -> Result<(), TeleportError> {
        let key = Self::key(table, location.owner, &location.name)?;
        let bytes = Self::serialize(location)?;
        let result: TransactionResult<Option<IVec>, ()> = self.locations.transaction(|tx| {
            let previous = tx.remove(key.as_slice())?;
            tx.insert(key.as_slice(), bytes.as_slice())?;
            Ok(previous)
        });
        let previous = match result {
            Ok(previous) => previous,
            Err(TransactionError::Storage(err)) => return Err(err.into()),
            Err(TransactionError::Abort(())) => {
                return Err(TeleportError::Storage(format!(
                    "replace of {} aborted",
                    table.entity()
                )))
            }
        };
        self.commit(&key, previous)
    }

    fn delete(
        &self,
        table: LocationTable,
        owner: Option<ActorId>,
        name: &str,
    ) -> Result<bool, TeleportError> {
        let key = Self::key(table, owner, name)?;
        let removed = self.locations.remove(key.as_slice())?;
        let present = removed.is_some();
        self.commit(&key, removed)?;
        Ok(present)
    }

    fn select_all(&self, table: LocationTable) -> Result<Vec<NamedLocation>, TeleportError> {
        self.locations
            .scan_prefix(table.prefix().as_bytes())
            .map(|entry| {
                entry
                    .map_err(TeleportError::from)
                    .and_then(|(_key, value)| Self::deserialize(table, value))
            })
            .collect()
    }
}
