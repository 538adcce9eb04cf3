//! DynamoDB backend implementation for dblayer.
//!
//! This crate provides a [`DatabaseBackend`](dblayer_core::backend::DatabaseBackend)
//! implementation that pushes conditions down to the service as condition expressions,
//! so single-item writes are atomic without transactions.
//!
//! To use this backend, include the `dynamodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! dblayer = { version = "x.y.z", features = ["dynamodb"] }
//! ```
//!
//! # Features
//!
//! - **Conditional writes** - Conditions compile to DynamoDB condition expressions
//! - **Nested mutations** - Appends and increments create missing parent maps atomically
//! - **Lazy tables** - Tables are created on first write with an on-demand billing mode
//! - **Paginated scans** - Page tokens carry the service's last evaluated key
//!
//! # Example
//!
//! ```ignore
//! use dblayer::{backend::DatabaseBackendBuilder, dynamodb::DynamoDbService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DynamoDbService::builder()
//!         .with_region("us-east-1")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as dblayer_dynamodb;

pub mod convert;
pub mod error;
pub mod expression;
pub mod service;
pub mod table;

pub use expression::{ExpressionBuilder, ExpressionInput};
pub use service::{DynamoDbCredentials, DynamoDbService, DynamoDbServiceBuilder};
pub use table::{TableCreation, TableHandle};
