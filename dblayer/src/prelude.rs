//! Convenient re-exports of commonly used types from dblayer.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use dblayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - The store, table handles and options
//! - Backend traits and builders
//! - Keys, primitives and conditions
//! - Error types

pub use dblayer_core::{
    backend::{DatabaseBackend, DatabaseBackendBuilder, ReturnItemBehavior},
    condition::{ComparisonOp, Condition, ConditionCoupling, ConditionVisitor},
    document::{Document, from_document, to_document},
    error::{DatabaseError, DatabaseResult},
    hooks::{ItemHooks, SharedHooks},
    key::ItemKey,
    options::DatabaseOptions,
    page::{Page, PageToken},
    primitive::{Primitive, PrimitiveKind},
    retry::RetryPolicy,
    store::DatabaseStore,
    table::Table,
};
pub use tokio_util::sync::CancellationToken;
