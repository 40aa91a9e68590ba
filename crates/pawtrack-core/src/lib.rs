//! # pawtrack core
//!
//! Shared, WASM-safe logic for pawtrack: record models, the local
//! record store abstraction, and the durable sync queue ("outbox").
//!
//! This crate contains no tokio, sqlx, reqwest, or other native-only
//! dependencies. Backends that need them live in the `pawtrack` crate.

pub mod models;
pub mod queue;
pub mod store;
