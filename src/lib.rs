//! # pawtrack
//!
//! A local-first pet care tracker. Pets, events, contacts, care items and
//! daily tracking stamps live in a local SQLite database; every change is
//! also recorded in a durable outbox (the sync queue) and replayed against
//! a remote record API when connectivity allows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  write  ┌──────────────┐
//! │   Record     │────────▶│ Local Store  │◀──────────┐
//! │  Services    │         └──────────────┘           │ patch
//! │              │ enqueue ┌──────────────┐  drain ┌──┴───────────┐  HTTPS  ┌─────────┐
//! │              │────────▶│  Sync Queue  │───────▶│    Sync      │────────▶│ Remote  │
//! └──────────────┘         └──────────────┘        │  Processor   │ (proxy) │   API   │
//!                                                  └──────────────┘         └─────────┘
//! ```
//!
//! Local writes never wait for the network. The processor applies queued
//! operations one at a time, in order, with rate-limit backoff; failures
//! stay queued for the next drain.
//!
//! ## Quick Start
//!
//! ```bash
//! paw init                          # create database
//! paw pet add "Fido" --species dog  # local write + queued create
//! paw status                        # pending operations
//! paw sync                          # push to the remote service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite record store |
//! | [`sqlite_queue`] | SQLite sync queue |
//! | [`error`] | Error taxonomy |
//! | [`gateway`] | Remote API calls, classification, rate-limit backoff |
//! | [`processor`] | Queue drain |
//! | [`services`] | Create/update/delete with enqueue, filtered reads, toggles |
//! | [`status`] | `paw status` and `paw queue` output |
//! | [`locks`] | Per-record async locks |
//! | [`debounce`] | Keyed debouncer |
//! | [`trigger`] | Debounced and periodic drains |
//! | [`engine`] | Wiring |
//! | [`logging`] | tracing subscriber setup |
//!
//! Entity types, the store and queue traits, and their in-memory backends
//! live in `pawtrack-core` and are re-exported here.

pub mod config;
pub mod db;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod processor;
pub mod services;
pub mod sqlite_queue;
pub mod sqlite_store;
pub mod status;
#[cfg(test)]
pub(crate) mod testing;
pub mod trigger;

pub use pawtrack_core::{models, queue, store};
