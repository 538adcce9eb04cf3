//! The narrow client interface the adapter consumes.
//!
//! A [`DatastoreClient`] offers transactional lookups and commits, kind queries with
//! cursors and kind listing. Credentials and connection setup belong to whoever builds
//! the client.

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

use crate::entity::{Entity, EntityKey};

/// Errors reported by a datastore client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatastoreError {
    /// The transaction lost a race with a concurrent writer.
    #[error("Aborted: {0}")]
    Aborted(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Internal: {0}")]
    Internal(String),
}

impl DatastoreError {
    /// Whether the whole read-modify-write should be retried.
    pub fn is_contention(&self) -> bool {
        matches!(self, DatastoreError::Aborted(_) | DatastoreError::Unavailable(_))
    }
}

/// Identifies an open transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub String);

/// A write applied by [`DatastoreClient::commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Fails with `AlreadyExists` if the entity exists.
    Insert(Entity),
    Upsert(Entity),
    /// Fails with `NotFound` if the entity is absent.
    Update(Entity),
    Delete(EntityKey),
}

/// A query over every entity of one kind, ordered by key name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KindQuery {
    pub kind: String,
    pub limit: Option<usize>,
    /// Resume after the position encoded by a previous batch's `end_cursor`.
    pub start_cursor: Option<Vec<u8>>,
    pub keys_only: bool,
}

impl KindQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_start_cursor(mut self, cursor: Option<Vec<u8>>) -> Self {
        self.start_cursor = cursor;
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// One batch of query results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryBatch {
    pub entities: Vec<Entity>,
    /// Position after the last returned entity.
    pub end_cursor: Option<Vec<u8>>,
    /// Whether entities remain past `end_cursor`.
    pub more_results: bool,
}

#[async_trait]
pub trait DatastoreClient: Send + Sync + Debug {
    async fn begin_transaction(&self) -> Result<TransactionId, DatastoreError>;

    /// Looks up entities by key. Only found entities are returned, in no particular order.
    ///
    /// Lookups inside a transaction register the observed versions, which are checked on
    /// commit.
    async fn lookup(
        &self,
        keys: &[EntityKey],
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<Entity>, DatastoreError>;

    /// Applies mutations atomically. Without a transaction the mutations are applied
    /// blindly.
    async fn commit(
        &self,
        transaction: Option<TransactionId>,
        mutations: Vec<Mutation>,
    ) -> Result<(), DatastoreError>;

    async fn rollback(&self, transaction: TransactionId) -> Result<(), DatastoreError>;

    async fn run_query(&self, query: KindQuery) -> Result<QueryBatch, DatastoreError>;

    /// Lists every kind holding at least one entity, system kinds included.
    async fn list_kinds(&self) -> Result<Vec<String>, DatastoreError>;
}
