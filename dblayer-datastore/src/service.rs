//! [`DatabaseBackend`] implementation over a transactional entity store.
//!
//! Every mutation is a read-modify-write inside one transaction: the current entity is
//! looked up transactionally, conditions are evaluated in-process, the new state is
//! computed and committed. Commits that lose a race abort and the whole attempt is
//! retried according to the service's [`RetryPolicy`].

use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, instrument, warn};

use dblayer_core::{
    backend::{DatabaseBackend, DatabaseBackendBuilder, ReturnItemBehavior},
    cache::TableHandleCache,
    condition::ConditionCoupling,
    document::{Document, merge_attributes, project_attributes, with_key},
    error::{DatabaseError, DatabaseResult},
    evaluator::{ConditionEvaluator, check_conditions},
    hooks::{SharedHooks, noop_hooks},
    key::ItemKey,
    mutation::{append_elements, increment_number, remove_elements},
    page::{Page, PageToken},
    path::AttributePath,
    primitive::Primitive,
    retry::{AttemptError, RetryPolicy, retry_on_contention},
};

use crate::{
    client::{DatastoreClient, KindQuery, Mutation, TransactionId},
    convert::{classify, document_to_entity, entity_to_document, item_key_of, map_datastore_error},
    entity::{Entity, EntityKey},
};

/// Maximum number of keys per lookup call.
pub const LOOKUP_BATCH_SIZE: usize = 1000;
/// Default number of entities read per query batch during scans.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 500;
/// Number of entities deleted per commit when dropping a kind.
pub const DROP_BATCH_SIZE: usize = 500;

const SYSTEM_KIND_PREFIX: &str = "__";

/// Builds entity keys for one kind.
#[derive(Debug, Clone)]
pub struct KeyFactory {
    kind: String,
}

impl KeyFactory {
    pub fn key(&self, key: &ItemKey) -> EntityKey {
        EntityKey::new(self.kind.clone(), key.native_name())
    }
}

/// The cached per-table handle.
#[derive(Debug, Clone)]
pub struct KindHandle {
    pub kind: String,
    pub key_factory: KeyFactory,
}

impl KindHandle {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            key_factory: KeyFactory {
                kind: kind.to_string(),
            },
        }
    }
}

enum WriteMode {
    Insert,
    Upsert,
    Update,
}

/// Outcome of planning a mutation against the current item.
enum Plan<T> {
    /// Nothing to write; roll back and return the output.
    Skip(T),
    Write {
        document: Document,
        mode: WriteMode,
        /// Whether the write creates the item, which triggers the post-insert hook.
        created: bool,
        output: T,
    },
    Delete(T),
}

/// A database backend over a [`DatastoreClient`].
///
/// Each table maps to one kind; each item maps to one entity named after its key.
#[derive(Debug)]
pub struct DatastoreService {
    client: Arc<dyn DatastoreClient>,
    hooks: SharedHooks,
    retry_policy: RetryPolicy,
    scan_batch_size: usize,
    kinds: TableHandleCache<KindHandle>,
}

impl DatastoreService {
    /// Creates a service with default hooks, retry policy and batch size.
    pub fn new(client: impl DatastoreClient + 'static) -> Self {
        Self::from_parts(
            Arc::new(client),
            noop_hooks(),
            RetryPolicy::default(),
            DEFAULT_SCAN_BATCH_SIZE,
        )
    }

    fn from_parts(
        client: Arc<dyn DatastoreClient>,
        hooks: SharedHooks,
        retry_policy: RetryPolicy,
        scan_batch_size: usize,
    ) -> Self {
        Self {
            client,
            hooks,
            retry_policy,
            scan_batch_size: scan_batch_size.max(1),
            kinds: TableHandleCache::new(),
        }
    }

    pub fn builder() -> DatastoreServiceBuilder {
        DatastoreServiceBuilder::default()
    }

    pub fn client(&self) -> &Arc<dyn DatastoreClient> {
        &self.client
    }

    async fn kind(&self, table: &str) -> DatabaseResult<Arc<KindHandle>> {
        self.kinds
            .get_or_try_init(table, || async {
                debug!(table, "loading kind handle");
                Ok::<_, DatabaseError>(KindHandle::new(table))
            })
            .await
    }

    async fn lookup_one(&self, table: &str, key: &ItemKey) -> DatabaseResult<Option<Document>> {
        let handle = self.kind(table).await?;
        let entities = self
            .client
            .lookup(&[handle.key_factory.key(key)], None)
            .await
            .map_err(map_datastore_error)?;
        entities
            .first()
            .map(|entity| entity_to_document(entity, key))
            .transpose()
    }

    async fn rollback(&self, transaction: TransactionId) {
        if let Err(error) = self.client.rollback(transaction).await {
            warn!(%error, "transaction rollback failed");
        }
    }

    async fn read_modify_write<T, F>(
        &self,
        operation: &str,
        table: &str,
        key: &ItemKey,
        plan: F,
    ) -> DatabaseResult<T>
    where
        T: Send,
        F: Fn(Option<Document>) -> DatabaseResult<Plan<T>> + Send + Sync,
    {
        let handle = self.kind(table).await?;
        let entity_key = handle.key_factory.key(key);
        let (entity_key, plan) = (&entity_key, &plan);

        retry_on_contention(&self.retry_policy, operation, move |_| {
            self.attempt(table, key, entity_key, plan)
        })
        .await
    }

    async fn attempt<T, F>(
        &self,
        table: &str,
        key: &ItemKey,
        entity_key: &EntityKey,
        plan: &F,
    ) -> Result<T, AttemptError>
    where
        T: Send,
        F: Fn(Option<Document>) -> DatabaseResult<Plan<T>> + Sync,
    {
        let transaction = self.client.begin_transaction().await.map_err(classify)?;

        let current = match self
            .client
            .lookup(std::slice::from_ref(entity_key), Some(&transaction))
            .await
        {
            Ok(entities) => entities.first().map(|entity| entity_to_document(entity, key)),
            Err(error) => {
                self.rollback(transaction).await;
                return Err(classify(error));
            }
        };

        let planned = match current.transpose().and_then(plan) {
            Ok(planned) => planned,
            Err(error) => {
                self.rollback(transaction).await;
                return Err(AttemptError::Failed(error));
            }
        };

        let (mutation, created, output) = match planned {
            Plan::Skip(output) => {
                self.rollback(transaction).await;
                return Ok(output);
            }
            Plan::Write {
                document,
                mode,
                created,
                output,
            } => {
                let entity = match document_to_entity(entity_key.clone(), key, &document) {
                    Ok(entity) => entity,
                    Err(error) => {
                        self.rollback(transaction).await;
                        return Err(AttemptError::Failed(error));
                    }
                };
                let mutation = match mode {
                    WriteMode::Insert => Mutation::Insert(entity),
                    WriteMode::Upsert => Mutation::Upsert(entity),
                    WriteMode::Update => Mutation::Update(entity),
                };
                (mutation, created, output)
            }
            Plan::Delete(output) => (Mutation::Delete(entity_key.clone()), false, output),
        };

        self.client
            .commit(Some(transaction), vec![mutation])
            .await
            .map_err(|error| match classify(error) {
                AttemptError::Failed(DatabaseError::Conflict(_)) => {
                    AttemptError::Failed(DatabaseError::already_exists(table, key))
                }
                other => other,
            })?;

        // Only a committed creation is announced; a failing hook is terminal.
        if created {
            self.hooks
                .post_insert_item(table, key)
                .await
                .map_err(AttemptError::Failed)?;
        }
        Ok(output)
    }

    fn documents_of(
        entities: &[Entity],
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        let documents = entities
            .iter()
            .map(|entity| entity_to_document(entity, &item_key_of(entity)?))
            .collect::<DatabaseResult<Vec<_>>>()?;

        match filter {
            Some(filter) => ConditionEvaluator::filter_documents(documents, filter),
            None => Ok(documents),
        }
    }
}

#[async_trait]
impl DatabaseBackend for DatastoreService {
    #[instrument(name = "dblayer.datastore.item_exists", skip_all, fields(table = %table, key = %key), err)]
    async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<bool> {
        match self.lookup_one(table, key).await? {
            Some(document) => ConditionEvaluator::matches(&document, conditions),
            None => Ok(false),
        }
    }

    #[instrument(name = "dblayer.datastore.get_item", skip_all, fields(table = %table, key = %key), err)]
    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        let document = self.lookup_one(table, key).await?;
        Ok(match attributes {
            Some(attributes) => {
                document.map(|document| project_attributes(document, &key.name, attributes))
            }
            None => document,
        })
    }

    #[instrument(name = "dblayer.datastore.get_items", skip_all, fields(table = %table, count = keys.len()), err)]
    async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        let handle = self.kind(table).await?;
        let mut found = HashMap::new();

        for chunk in keys.chunks(LOOKUP_BATCH_SIZE) {
            let entity_keys = chunk
                .iter()
                .map(|key| handle.key_factory.key(key))
                .collect::<Vec<_>>();
            let entities = self
                .client
                .lookup(&entity_keys, None)
                .await
                .map_err(map_datastore_error)?;
            for entity in entities {
                if let Some(entity_key) = &entity.key {
                    found.insert(entity_key.name.clone(), entity);
                }
            }
        }

        keys.iter()
            .filter_map(|key| found.get(&key.native_name()).map(|entity| (key, entity)))
            .map(|(key, entity)| {
                let document = entity_to_document(entity, key)?;
                Ok(match attributes {
                    Some(attributes) => project_attributes(document, &key.name, attributes),
                    None => document,
                })
            })
            .collect()
    }

    #[instrument(name = "dblayer.datastore.put_item", skip_all, fields(table = %table, key = %key, overwrite = overwrite), err)]
    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        let stored = with_key(item, key);
        self.read_modify_write("put_item", table, key, |current| {
            if current.is_some() && !overwrite {
                return Err(DatabaseError::already_exists(table, key));
            }
            Ok(Plan::Write {
                document: stored.clone(),
                mode: if overwrite {
                    WriteMode::Upsert
                } else {
                    WriteMode::Insert
                },
                created: current.is_none(),
                output: return_behavior.select(current, Some(stored.clone())),
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.update_item", skip_all, fields(table = %table, key = %key), err)]
    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.read_modify_write("update_item", table, key, |current| {
            check_conditions(table, key, current.as_ref(), conditions)?;
            let mut updated = current.clone().unwrap_or_default();
            merge_attributes(&mut updated, patch.clone());
            let updated = with_key(updated, key);
            Ok(Plan::Write {
                document: updated.clone(),
                mode: WriteMode::Upsert,
                created: current.is_none(),
                output: return_behavior.select(current, Some(updated)),
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.delete_item", skip_all, fields(table = %table, key = %key), err)]
    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.read_modify_write("delete_item", table, key, |current| {
            check_conditions(table, key, current.as_ref(), conditions)?;
            Ok(match current {
                Some(current) => Plan::Delete(return_behavior.select(Some(current), None)),
                None => Plan::Skip(None),
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.add_elements_to_array", skip_all, fields(table = %table, key = %key, attribute = %attribute), err)]
    async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.read_modify_write("add_elements_to_array", table, key, |current| {
            check_conditions(table, key, current.as_ref(), conditions)?;
            let mut updated = current.clone().unwrap_or_default();
            append_elements(&mut updated, attribute, elements)?;
            let updated = with_key(updated, key);
            Ok(Plan::Write {
                document: updated.clone(),
                mode: WriteMode::Upsert,
                created: current.is_none(),
                output: return_behavior.select(current, Some(updated)),
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.remove_elements_from_array", skip_all, fields(table = %table, key = %key, attribute = %attribute), err)]
    async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.read_modify_write("remove_elements_from_array", table, key, |current| {
            check_conditions(table, key, current.as_ref(), conditions)?;
            let Some(mut updated) = current.clone() else {
                return Ok(Plan::Skip(None));
            };
            if !remove_elements(&mut updated, attribute, elements)? {
                return Ok(Plan::Skip(return_behavior.select(current.clone(), current)));
            }
            Ok(Plan::Write {
                document: updated.clone(),
                mode: WriteMode::Update,
                created: false,
                output: return_behavior.select(current, Some(updated)),
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.increment_attribute", skip_all, fields(table = %table, key = %key, attribute = %attribute, delta = delta), err)]
    async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        delta: f64,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<f64> {
        self.read_modify_write("increment_attribute", table, key, |current| {
            check_conditions(table, key, current.as_ref(), conditions)?;
            let mut updated = current.clone().unwrap_or_default();
            let value = increment_number(&mut updated, attribute, delta)?;
            Ok(Plan::Write {
                document: with_key(updated, key),
                mode: WriteMode::Upsert,
                created: current.is_none(),
                output: value,
            })
        })
        .await
    }

    #[instrument(name = "dblayer.datastore.scan_table", skip_all, fields(table = %table), err)]
    async fn scan_table(
        &self,
        table: &str,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        let handle = self.kind(table).await?;
        let mut documents = Vec::new();
        let mut cursor = None;

        loop {
            let batch = self
                .client
                .run_query(
                    KindQuery::new(handle.kind.clone())
                        .with_limit(self.scan_batch_size)
                        .with_start_cursor(cursor),
                )
                .await
                .map_err(map_datastore_error)?;
            documents.extend(Self::documents_of(&batch.entities, filter)?);

            if !batch.more_results || batch.entities.is_empty() {
                break;
            }
            cursor = batch.end_cursor;
        }

        Ok(documents)
    }

    #[instrument(name = "dblayer.datastore.scan_table_paginated", skip_all, fields(table = %table, page_size = page_size), err)]
    async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        let handle = self.kind(table).await?;
        let cursor = page_token.map(PageToken::to_cursor).transpose()?;

        let batch = self
            .client
            .run_query(
                KindQuery::new(handle.kind.clone())
                    .with_limit(page_size)
                    .with_start_cursor(cursor),
            )
            .await
            .map_err(map_datastore_error)?;

        let next_page_token = if batch.more_results {
            batch.end_cursor.as_deref().map(PageToken::from_cursor)
        } else {
            None
        };

        Ok(Page::builder(Self::documents_of(&batch.entities, filter)?)
            .with_next_page_token(next_page_token)
            .build())
    }

    #[instrument(name = "dblayer.datastore.get_table_names", skip_all, err)]
    async fn get_table_names(&self) -> DatabaseResult<Vec<String>> {
        let mut names = self
            .client
            .list_kinds()
            .await
            .map_err(map_datastore_error)?
            .into_iter()
            .filter(|kind| !kind.starts_with(SYSTEM_KIND_PREFIX))
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    #[instrument(name = "dblayer.datastore.drop_table", skip_all, fields(table = %table), err)]
    async fn drop_table(&self, table: &str) -> DatabaseResult<()> {
        let handle = self.kind(table).await?;
        let mut deleted = 0usize;

        loop {
            let batch = self
                .client
                .run_query(
                    KindQuery::new(handle.kind.clone())
                        .with_limit(DROP_BATCH_SIZE)
                        .keys_only(),
                )
                .await
                .map_err(map_datastore_error)?;

            let mutations = batch
                .entities
                .into_iter()
                .filter_map(|entity| entity.key)
                .map(Mutation::Delete)
                .collect::<Vec<_>>();
            if mutations.is_empty() {
                break;
            }
            deleted += mutations.len();
            self.client
                .commit(None, mutations)
                .await
                .map_err(map_datastore_error)?;

            if !batch.more_results {
                break;
            }
        }

        self.kinds.remove(table).await;
        debug!(table, deleted, "dropped kind");

        self.hooks.post_drop_table(table).await.map_err(|error| {
            DatabaseError::InternalServerError(format!(
                "table {table} was dropped but the post-drop hook failed: {error}"
            ))
        })
    }
}

/// Builder for [`DatastoreService`].
///
/// # Example
///
/// ```ignore
/// use dblayer_datastore::{DatastoreEmulator, DatastoreServiceBuilder};
/// use dblayer_core::backend::DatabaseBackendBuilder;
///
/// let service = DatastoreServiceBuilder::default()
///     .with_client(DatastoreEmulator::new())
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct DatastoreServiceBuilder {
    client: Option<Arc<dyn DatastoreClient>>,
    hooks: Option<SharedHooks>,
    retry_policy: RetryPolicy,
    scan_batch_size: Option<usize>,
}

impl DatastoreServiceBuilder {
    pub fn with_client(self, client: impl DatastoreClient + 'static) -> Self {
        self.with_shared_client(Arc::new(client))
    }

    pub fn with_shared_client(mut self, client: Arc<dyn DatastoreClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_hooks(mut self, hooks: SharedHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_scan_batch_size(mut self, scan_batch_size: usize) -> Self {
        self.scan_batch_size = Some(scan_batch_size);
        self
    }
}

#[async_trait]
impl DatabaseBackendBuilder for DatastoreServiceBuilder {
    type Backend = DatastoreService;

    async fn build(self) -> DatabaseResult<Self::Backend> {
        let client = self.client.ok_or_else(|| {
            DatabaseError::ServiceUnavailable("no datastore client configured".to_string())
        })?;

        Ok(DatastoreService::from_parts(
            client,
            self.hooks.unwrap_or_else(noop_hooks),
            self.retry_policy,
            self.scan_batch_size.unwrap_or(DEFAULT_SCAN_BATCH_SIZE),
        ))
    }
}
