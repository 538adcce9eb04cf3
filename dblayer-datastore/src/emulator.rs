//! An in-process [`DatastoreClient`] for tests and local development.
//!
//! The emulator keeps every kind in memory behind an async-aware read-write lock and
//! implements optimistic transactions: versions observed by transactional lookups are
//! checked on commit, and a commit that finds a changed entity fails with `Aborted`.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    client::{DatastoreClient, DatastoreError, KindQuery, Mutation, QueryBatch, TransactionId},
    entity::{Entity, EntityKey},
};

#[derive(Debug, Clone)]
struct StoredEntity {
    entity: Entity,
    version: u64,
}

type KindMap = BTreeMap<String, StoredEntity>;

#[derive(Debug, Default)]
struct EmulatorState {
    kinds: BTreeMap<String, KindMap>,
    /// Read sets: the version each transaction observed per key (0 = absent).
    transactions: HashMap<TransactionId, HashMap<EntityKey, u64>>,
    next_version: u64,
    commit_failures: Vec<DatastoreError>,
}

impl EmulatorState {
    fn version_of(&self, key: &EntityKey) -> u64 {
        self.kinds
            .get(&key.kind)
            .and_then(|kind| kind.get(&key.name))
            .map_or(0, |stored| stored.version)
    }

    fn exists(&self, key: &EntityKey) -> bool {
        self.version_of(key) != 0
    }

    fn check(&self, mutation: &Mutation) -> Result<(), DatastoreError> {
        match mutation {
            Mutation::Insert(entity) => {
                let key = entity_key(entity)?;
                if self.exists(key) {
                    return Err(DatastoreError::AlreadyExists(format!("entity {key} already exists")));
                }
            }
            Mutation::Update(entity) => {
                let key = entity_key(entity)?;
                if !self.exists(key) {
                    return Err(DatastoreError::NotFound(format!("entity {key} does not exist")));
                }
            }
            Mutation::Upsert(entity) => {
                entity_key(entity)?;
            }
            Mutation::Delete(_) => {}
        }
        Ok(())
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Insert(entity) | Mutation::Update(entity) | Mutation::Upsert(entity) => {
                let Some(key) = entity.key.clone() else {
                    return;
                };
                self.next_version += 1;
                let version = self.next_version;
                self.kinds
                    .entry(key.kind)
                    .or_default()
                    .insert(key.name, StoredEntity { entity, version });
            }
            Mutation::Delete(key) => {
                if let Some(kind) = self.kinds.get_mut(&key.kind) {
                    kind.remove(&key.name);
                    if kind.is_empty() {
                        self.kinds.remove(&key.kind);
                    }
                }
            }
        }
    }
}

fn entity_key(entity: &Entity) -> Result<&EntityKey, DatastoreError> {
    entity
        .key
        .as_ref()
        .ok_or_else(|| DatastoreError::InvalidArgument("entity has no key".to_string()))
}

/// In-memory datastore with optimistic transactions and fault injection.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct DatastoreEmulator {
    state: Arc<RwLock<EmulatorState>>,
}

impl DatastoreEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with `error` without applying anything.
    pub async fn fail_next_commits(&self, count: usize, error: DatastoreError) {
        let mut state = self.state.write().await;
        state.commit_failures = vec![error; count];
    }

    /// Number of stored entities of a kind.
    pub async fn entity_count(&self, kind: &str) -> usize {
        self.state
            .read()
            .await
            .kinds
            .get(kind)
            .map_or(0, BTreeMap::len)
    }

    /// Stores an entity directly, outside any transaction.
    pub async fn seed(&self, entity: Entity) -> Result<(), DatastoreError> {
        let mut state = self.state.write().await;
        let mutation = Mutation::Upsert(entity);
        state.check(&mutation)?;
        state.apply(mutation);
        Ok(())
    }
}

#[async_trait]
impl DatastoreClient for DatastoreEmulator {
    async fn begin_transaction(&self) -> Result<TransactionId, DatastoreError> {
        let id = TransactionId(Uuid::new_v4().to_string());
        self.state
            .write()
            .await
            .transactions
            .insert(id.clone(), HashMap::new());
        Ok(id)
    }

    async fn lookup(
        &self,
        keys: &[EntityKey],
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<Entity>, DatastoreError> {
        let mut state = self.state.write().await;

        if let Some(transaction) = transaction {
            let versions = keys
                .iter()
                .map(|key| (key.clone(), state.version_of(key)))
                .collect::<Vec<_>>();
            let read_set = state
                .transactions
                .get_mut(transaction)
                .ok_or_else(|| {
                    DatastoreError::InvalidArgument(format!("unknown transaction {}", transaction.0))
                })?;
            for (key, version) in versions {
                read_set.entry(key).or_insert(version);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| {
                state
                    .kinds
                    .get(&key.kind)
                    .and_then(|kind| kind.get(&key.name))
                    .map(|stored| stored.entity.clone())
            })
            .collect())
    }

    async fn commit(
        &self,
        transaction: Option<TransactionId>,
        mutations: Vec<Mutation>,
    ) -> Result<(), DatastoreError> {
        let mut state = self.state.write().await;

        let read_set = match &transaction {
            Some(id) => Some(state.transactions.remove(id).ok_or_else(|| {
                DatastoreError::InvalidArgument(format!("unknown transaction {}", id.0))
            })?),
            None => None,
        };

        if let Some(error) = state.commit_failures.pop() {
            debug!(%error, "injected commit failure");
            return Err(error);
        }

        if let Some(read_set) = read_set {
            if let Some((key, _)) = read_set
                .iter()
                .find(|(key, version)| state.version_of(key) != **version)
            {
                return Err(DatastoreError::Aborted(format!(
                    "entity {key} changed since it was read"
                )));
            }
        }

        for mutation in &mutations {
            state.check(mutation)?;
        }
        for mutation in mutations {
            state.apply(mutation);
        }
        Ok(())
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<(), DatastoreError> {
        self.state.write().await.transactions.remove(&transaction);
        Ok(())
    }

    async fn run_query(&self, query: KindQuery) -> Result<QueryBatch, DatastoreError> {
        let state = self.state.read().await;
        let Some(kind) = state.kinds.get(&query.kind) else {
            return Ok(QueryBatch::default());
        };

        let start = match &query.start_cursor {
            Some(cursor) => {
                let name = String::from_utf8(cursor.clone())
                    .map_err(|_| DatastoreError::InvalidArgument("malformed cursor".to_string()))?;
                Bound::Excluded(name)
            }
            None => Bound::Unbounded,
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut remaining = kind.range((start, Bound::Unbounded));
        let mut entities = Vec::new();
        let mut end_cursor = None;
        for (name, stored) in remaining.by_ref().take(limit) {
            entities.push(if query.keys_only {
                stored.entity.key_only()
            } else {
                stored.entity.clone()
            });
            end_cursor = Some(name.clone().into_bytes());
        }

        Ok(QueryBatch {
            entities,
            end_cursor: end_cursor.or(query.start_cursor),
            more_results: remaining.next().is_some(),
        })
    }

    async fn list_kinds(&self) -> Result<Vec<String>, DatastoreError> {
        Ok(self.state.read().await.kinds.keys().cloned().collect())
    }
}
