//! # Warpgate - homes, warps and deferred teleports
//!
//! Warpgate is the teleport layer of a multiplayer game server, kept independent of
//! any particular engine. It provides:
//!
//! - **Deferred teleports**: a countdown per actor that fires on a background Tokio task,
//!   can be cancelled, and is superseded by a newer teleport for the same actor.
//! - **Peer teleport requests**: "may I teleport to you" / "please teleport to me" with
//!   exactly-once accept, deny or timeout.
//! - **Location cache**: homes and warps persisted in sled with a write-through in-memory
//!   cache, plus a per-actor "previous position" slot for `back`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warpgate::config::Config;
//! use warpgate::teleport::{LocationStore, SledLocationBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let backend = SledLocationBackend::open(config.db_path())?;
//!     let store = Arc::new(LocationStore::open(Box::new(backend))?);
//!     println!("{} warps", store.list_warps().len());
//!     // Hand `store` plus your World, Permissions and Notifier to TeleportService::start.
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`teleport`] - the scheduler, the peer-request negotiator, the location store and
//!   the command facade
//! - [`config`] - TOML configuration
//! - [`logutil`] - log sanitizing helpers

pub mod config;
pub mod logutil;
pub mod teleport;
