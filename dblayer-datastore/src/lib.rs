//! Transactional entity-store backend for dblayer.
//!
//! This crate implements [`DatabaseBackend`](dblayer_core::backend::DatabaseBackend) on
//! top of a hierarchical entity store with optimistic transactions. Tables map to kinds
//! and items map to entities named after their key.
//!
//! # Features
//!
//! - **Transactional mutations** - Every write is a read-modify-write inside one transaction
//! - **In-process conditions** - Conditions are evaluated against the transactionally read entity
//! - **Retry on contention** - Aborted commits are retried with a fixed delay
//! - **Cursor pagination** - Page tokens wrap the store's native query cursors
//! - **Emulator** - [`DatastoreEmulator`] runs the same protocol in memory
//!
//! # Quick Start
//!
//! ```ignore
//! use dblayer::prelude::*;
//! use dblayer::datastore::{DatastoreEmulator, DatastoreServiceBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = DatastoreServiceBuilder::default()
//!         .with_client(DatastoreEmulator::new())
//!         .build()
//!         .await?;
//!     let store = DatabaseStore::new(backend);
//!
//!     store
//!         .table("users")
//!         .put(&ItemKey::new("id", "alice"), &serde_json::json!({ "age": 30 }), false)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as dblayer_datastore;

pub mod client;
pub mod convert;
pub mod emulator;
pub mod entity;
pub mod service;

pub use client::{DatastoreClient, DatastoreError, KindQuery, Mutation, QueryBatch, TransactionId};
pub use emulator::DatastoreEmulator;
pub use entity::{Entity, EntityKey, EntityValue};
pub use service::{DatastoreService, DatastoreServiceBuilder};
