//! A provider-agnostic item database abstraction layer.
//!
//! This crate is the core of the dblayer project and provides:
//!
//! - **Primitive values** ([`primitive`]) - The closed set of scalar kinds and their wire encoding
//! - **Conditions** ([`condition`]) - Attribute conditions, boolean trees and the visitor used to compile or evaluate them
//! - **Attribute paths** ([`path`]) - Dotted path parsing and nested-document navigation
//! - **Documents** ([`document`]) - The JSON item model shared by every backend
//! - **Evaluation** ([`evaluator`]) - In-process condition evaluation
//! - **Mutations** ([`mutation`]) - Array and counter edits applied to documents
//! - **Backend abstraction** ([`backend`]) - The contract every provider adapter implements
//! - **Database store** ([`store`], [`table`]) - Input checks, post-processing and cancellation on top of a backend
//! - **Options** ([`options`]) - Post-processing of returned documents
//! - **Retry** ([`retry`]) - Retry-on-contention state machine
//! - **Handle cache** ([`cache`]) - The loaded-table-handle cache
//! - **Hooks** ([`hooks`]) - Post-insert and post-drop side effects
//! - **Error handling** ([`error`]) - Status-coded errors and result types
//!
//! # Example
//!
//! ```ignore
//! use dblayer_core::{condition::Condition, key::ItemKey, store::DatabaseStore};
//!
//! let store = DatabaseStore::new(backend);
//! let key = ItemKey::new("id", "ticket-1");
//!
//! store
//!     .delete_item(
//!         "tickets",
//!         &key,
//!         ReturnItemBehavior::ReturnOldValues,
//!         Condition::attribute_equals("status", "closed"),
//!     )
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as dblayer_core;

pub mod backend;
pub mod cache;
pub mod condition;
pub mod document;
pub mod error;
pub mod evaluator;
pub mod hooks;
pub mod key;
pub mod mutation;
pub mod options;
pub mod page;
pub mod path;
pub mod primitive;
pub mod retry;
pub mod store;
pub mod table;
