//! Main dblayer crate providing a unified interface over item databases.
//!
//! This crate is the primary entry point for users of the dblayer framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! access to the provider backends.
//!
//! # Features
//!
//! - **Provider-agnostic items** - JSON documents addressed by a named key
//! - **Conditional writes** - Every mutation can be gated on a condition tree
//! - **Atomic mutations** - Array appends/removals and counter increments on nested paths
//! - **Paginated scans** - Opaque page tokens, with optional filters
//! - **Retry on contention** - Lost races are retried with a fixed backoff
//!
//! # Quick Start
//!
//! ```ignore
//! use dblayer::{prelude::*, datastore::{DatastoreEmulator, DatastoreService}};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> DatabaseResult<()> {
//!     let store = DatabaseStore::new(DatastoreService::new(DatastoreEmulator::new()));
//!     let tickets = store.table("tickets");
//!     let key = ItemKey::new("id", "t-1");
//!
//!     tickets
//!         .put_item(
//!             &key,
//!             json!({ "status": "open" }).as_object().cloned().unwrap_or_default(),
//!             ReturnItemBehavior::DoNotReturn,
//!             false,
//!         )
//!         .await?;
//!
//!     tickets
//!         .increment_attribute(&key, "stats.views", 1.0, ConditionCoupling::Empty)
//!         .await?;
//!
//!     // Only closed tickets may be deleted.
//!     let deleted = tickets
//!         .delete_item(
//!             &key,
//!             ReturnItemBehavior::ReturnOldValues,
//!             Condition::attribute_equals("status", "closed"),
//!         )
//!         .await;
//!     assert!(matches!(deleted, Err(DatabaseError::PreconditionFailed(_))));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! A store can be bound to a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! Once the token is cancelled every pending and future operation of that store returns
//! [`DatabaseError::Cancelled`](error::DatabaseError::Cancelled).
//!
//! ```ignore
//! let token = CancellationToken::new();
//! let scoped = store.with_cancellation(token.clone());
//! token.cancel();
//! assert!(scoped.get_table_names().await.is_err());
//! ```
//!
//! # Backends
//!
//! - [`datastore`] - Transactional backend over a Datastore-style entity client
//! - `dynamodb` - DynamoDB backend with condition-expression pushdown (requires the
//!   `dynamodb` feature)

pub mod prelude;

pub use dblayer_core::{
    backend, cache, condition, document, error, evaluator, hooks, key, mutation, options, page,
    path, primitive, retry, store, table,
};

/// Datastore backend implementations.
pub mod datastore {
    pub use dblayer_datastore::{
        DatastoreClient, DatastoreEmulator, DatastoreError, DatastoreService,
        DatastoreServiceBuilder, Entity, EntityKey, EntityValue,
    };
}

/// DynamoDB backend implementations.
///
/// This module is only available when the `dynamodb` feature is enabled.
#[cfg(feature = "dynamodb")]
pub mod dynamodb {
    pub use dblayer_dynamodb::{
        DynamoDbCredentials, DynamoDbService, DynamoDbServiceBuilder, TableCreation,
    };
}
