//! [`DatabaseBackend`] implementation over DynamoDB.
//!
//! Single-item operations rely on the service's conditional writes: caller conditions are
//! compiled into condition expressions and sent with the request, so no transaction is
//! needed. Array appends and increments on nested paths first fetch the item to find the
//! deepest existing ancestor of the target, then write either the native update or the
//! missing sub-document under a structural guard. A guard failure while the caller's
//! conditions still hold means a concurrent writer changed the structure, and the attempt
//! is retried.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    Client,
    config::Credentials,
    types::{AttributeValue, DeleteRequest, KeysAndAttributes, ReturnValue, WriteRequest},
};
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, instrument, warn};

use dblayer_core::{
    backend::{DatabaseBackend, DatabaseBackendBuilder, ReturnItemBehavior},
    cache::TableHandleCache,
    condition::ConditionCoupling,
    document::{Document, merge_attributes, with_key},
    error::{DatabaseError, DatabaseResult},
    evaluator::{ConditionEvaluator, check_conditions},
    hooks::{SharedHooks, noop_hooks},
    key::ItemKey,
    mutation::{append_elements, increment_number, integral_delta, remove_elements},
    page::{Page, PageToken},
    path::AttributePath,
    primitive::Primitive,
    retry::{AttemptError, RetryPolicy, retry_on_contention},
};

use crate::{
    convert::{
        Item, decode_cursor, document_to_item, encode_cursor, item_to_document, key_to_item,
        scanned_item_to_document, value_to_attribute_value,
    },
    error::{build_error, classify, map_sdk_error},
    expression::ExpressionBuilder,
    table::{TableCreation, TableHandle, ensure_table, load_table},
};

/// Maximum number of keys per `BatchGetItem` request.
pub const BATCH_GET_SIZE: usize = 100;
/// Maximum number of requests per `BatchWriteItem` call.
pub const BATCH_WRITE_SIZE: usize = 25;
/// How often unprocessed batch entries are re-sent before giving up.
const MAX_UNPROCESSED_RETRIES: u32 = 5;

const SYSTEM_TABLE_PREFIX: &str = "__";

fn unprocessed_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 << attempt.min(6))
}

/// Combines the caller's condition with a structural guard.
fn with_guard(conditions: Option<String>, guard: Option<String>) -> Option<String> {
    match (conditions, guard) {
        (Some(conditions), Some(guard)) => Some(format!("({conditions}) AND ({guard})")),
        (conditions, guard) => conditions.or(guard),
    }
}

/// Index of the first missing parent segment of `attribute`, if any.
pub(crate) fn missing_parent_depth(current: Option<&Document>, attribute: &AttributePath) -> Option<usize> {
    let empty = Document::new();
    let depth = attribute.existing_depth(current.unwrap_or(&empty));
    (depth < attribute.parent_segments().len()).then_some(depth)
}

/// Wraps `leaf` into nested objects named by `segments`, outermost first.
fn subtree(segments: &[String], leaf: Value) -> Value {
    segments.iter().rev().fold(leaf, |value, segment| {
        let mut object = Map::new();
        object.insert(segment.clone(), value);
        Value::Object(object)
    })
}

/// Decodes the scan start position. An empty token starts from the beginning.
fn start_key(page_token: Option<&PageToken>) -> DatabaseResult<Option<Item>> {
    page_token
        .filter(|token| !token.as_str().is_empty())
        .map(decode_cursor)
        .transpose()
}

/// The two mutations that support nested-target planning.
enum NestedUpdate<'a> {
    Append(&'a [Primitive]),
    Increment(f64),
}

impl NestedUpdate<'_> {
    fn apply(&self, document: &mut Document, attribute: &AttributePath) -> DatabaseResult<()> {
        match self {
            NestedUpdate::Append(elements) => append_elements(document, attribute, elements),
            NestedUpdate::Increment(delta) => increment_number(document, attribute, *delta).map(|_| ()),
        }
    }

    fn leaf_value(&self) -> Value {
        match self {
            NestedUpdate::Append(elements) => {
                Value::Array(elements.iter().map(Primitive::to_json_value).collect())
            }
            NestedUpdate::Increment(delta) => match integral_delta(*delta) {
                Some(delta) => Value::from(delta),
                None => Value::from(*delta),
            },
        }
    }

    fn native_assignment(&self, builder: &mut ExpressionBuilder, path: &str) -> DatabaseResult<String> {
        Ok(match self {
            NestedUpdate::Append(_) => {
                let empty = builder.value(AttributeValue::L(Vec::new()));
                let elements = builder.value(value_to_attribute_value(&self.leaf_value())?);
                format!("{path} = list_append(if_not_exists({path}, {empty}), {elements})")
            }
            NestedUpdate::Increment(delta) => {
                let zero = builder.value(AttributeValue::N("0".to_string()));
                let delta = builder.value(AttributeValue::N(delta.to_string()));
                format!("{path} = if_not_exists({path}, {zero}) + {delta}")
            }
        })
    }
}

/// A database backend over a DynamoDB [`Client`].
///
/// Each table is resolved lazily and created on first write with a string partition key
/// named after the item key.
#[derive(Debug)]
pub struct DynamoDbService {
    client: Client,
    hooks: SharedHooks,
    retry_policy: RetryPolicy,
    table_creation: TableCreation,
    tables: TableHandleCache<TableHandle>,
}

impl DynamoDbService {
    /// Wraps an already configured client with default hooks and retry policy.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            hooks: noop_hooks(),
            retry_policy: RetryPolicy::default(),
            table_creation: TableCreation::default(),
            tables: TableHandleCache::new(),
        }
    }

    pub fn builder() -> DynamoDbServiceBuilder {
        DynamoDbServiceBuilder::default()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolves a table without creating it.
    async fn existing_table(&self, table: &str) -> DatabaseResult<Option<Arc<TableHandle>>> {
        if let Some(handle) = self.tables.get(table).await {
            return Ok(Some(handle));
        }
        match load_table(&self.client, table).await? {
            Some(handle) => Ok(Some(self.tables.insert(table, handle).await)),
            None => Ok(None),
        }
    }

    /// Resolves a table for reading an item, checking the key attribute.
    async fn readable_table(&self, table: &str, key_name: &str) -> DatabaseResult<Option<Arc<TableHandle>>> {
        let handle = self.existing_table(table).await?;
        if let Some(handle) = &handle {
            handle.check_key_name(key_name)?;
        }
        Ok(handle)
    }

    /// Resolves a table, creating it when missing.
    async fn writable_table(&self, table: &str, key: &ItemKey) -> DatabaseResult<Arc<TableHandle>> {
        let handle = self
            .tables
            .get_or_try_init(table, || {
                ensure_table(&self.client, table, &key.name, self.table_creation)
            })
            .await?;
        handle.check_key_name(&key.name)?;
        Ok(handle)
    }

    async fn fetch(&self, table: &str, key: &ItemKey) -> DatabaseResult<Option<Document>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_to_item(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(map_sdk_error)?;
        returned_document(output.item, key)
    }

    async fn post_insert(&self, table: &str, key: &ItemKey, created: bool) -> DatabaseResult<()> {
        if !created {
            return Ok(());
        }
        self.hooks.post_insert_item(table, key).await.inspect_err(|error| {
            warn!(table, %key, %error, "post-insert hook failed after the write");
        })
    }

    async fn put_native(&self, table: &str, item: Item) -> DatabaseResult<()> {
        let item = &item;
        retry_on_contention(&self.retry_policy, "put_item", move |_| async move {
            self.client
                .put_item()
                .table_name(table)
                .set_item(Some(item.clone()))
                .send()
                .await
                .map_err(|error| classify(map_sdk_error(error)))
        })
        .await
        .map(|_| ())
    }

    async fn nested_update_attempt(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        update: &NestedUpdate<'_>,
        conditions: &ConditionCoupling,
    ) -> Result<Option<Document>, AttemptError> {
        let current = self.fetch(table, key).await.map_err(classify)?;

        // Rejects non-array or non-numeric targets and non-object parents up front.
        let mut preview = current.clone().unwrap_or_default();
        update.apply(&mut preview, attribute)?;

        let mut builder = ExpressionBuilder::new();
        let (assignment, guard) = match missing_parent_depth(current.as_ref(), attribute) {
            None => {
                let path = builder.path(attribute);
                let assignment = update.native_assignment(&mut builder, &path)?;
                let guard = attribute
                    .is_nested()
                    .then(|| format!("attribute_exists({})", builder.segments(attribute.parent_segments())));
                (assignment, guard)
            }
            Some(depth) => {
                let segments = attribute.segments();
                let prefix = builder.segments(&segments[..=depth]);
                let value = value_to_attribute_value(&subtree(&segments[depth + 1..], update.leaf_value()))?;
                let value = builder.value(value);
                let mut guard = format!("attribute_not_exists({prefix})");
                if depth > 0 {
                    guard = format!("attribute_exists({}) AND {guard}", builder.segments(&segments[..depth]));
                }
                (format!("{prefix} = {value}"), Some(guard))
            }
        };
        let condition = with_guard(builder.condition(conditions)?, guard);
        let input = builder.finish();

        let result = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key_to_item(key)))
            .update_expression(format!("SET {assignment}"))
            .set_condition_expression(condition)
            .set_expression_attribute_names(input.names())
            .set_expression_attribute_values(input.values())
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(map_sdk_error);

        match result {
            Ok(output) => Ok(returned_document(output.attributes, key)?),
            Err(DatabaseError::PreconditionFailed(_)) => {
                let current = self.fetch(table, key).await.map_err(classify)?;
                check_conditions(table, key, current.as_ref(), conditions)?;
                Err(AttemptError::Contention(format!(
                    "{attribute} changed while it was being updated"
                )))
            }
            Err(error) => Err(classify(error)),
        }
    }

    /// Runs a nested update and returns the item as it was before the write.
    async fn nested_update(
        &self,
        operation: &str,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        update: NestedUpdate<'_>,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.writable_table(table, key).await?;
        let update = &update;
        let old = retry_on_contention(&self.retry_policy, operation, move |_| {
            self.nested_update_attempt(table, key, attribute, update, conditions)
        })
        .await?;
        self.post_insert(table, key, old.is_none()).await?;
        Ok(old)
    }

    async fn delete_keys(&self, table: &str, keys: Vec<Item>) -> DatabaseResult<()> {
        for chunk in keys.chunks(BATCH_WRITE_SIZE) {
            let mut pending = chunk
                .iter()
                .map(|key| -> DatabaseResult<WriteRequest> {
                    Ok(WriteRequest::builder()
                        .delete_request(
                            DeleteRequest::builder()
                                .set_key(Some(key.clone()))
                                .build()
                                .map_err(build_error)?,
                        )
                        .build())
                })
                .collect::<DatabaseResult<Vec<_>>>()?;

            let mut attempt = 0;
            while !pending.is_empty() {
                let output = self
                    .client
                    .batch_write_item()
                    .request_items(table, pending)
                    .send()
                    .await
                    .map_err(map_sdk_error)?;
                pending = output
                    .unprocessed_items
                    .and_then(|mut unprocessed| unprocessed.remove(table))
                    .unwrap_or_default();

                if !pending.is_empty() {
                    attempt += 1;
                    if attempt > MAX_UNPROCESSED_RETRIES {
                        return Err(DatabaseError::TooManyRequests(format!(
                            "{} deletes in table {table} stayed unprocessed",
                            pending.len()
                        )));
                    }
                    debug!(table, unprocessed = pending.len(), attempt, "re-sending unprocessed deletes");
                    tokio::time::sleep(unprocessed_backoff(attempt)).await;
                }
            }
        }
        Ok(())
    }
}

/// Materializes an item returned by the service, treating an empty map as absent.
fn returned_document(item: Option<Item>, key: &ItemKey) -> DatabaseResult<Option<Document>> {
    item.filter(|item| !item.is_empty())
        .map(|item| -> DatabaseResult<Document> { Ok(with_key(item_to_document(item)?, key)) })
        .transpose()
}

#[async_trait]
impl DatabaseBackend for DynamoDbService {
    #[instrument(name = "dblayer.dynamodb.item_exists", skip_all, fields(table = %table, key = %key), err)]
    async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<bool> {
        if self.readable_table(table, &key.name).await?.is_none() {
            return Ok(false);
        }
        match self.fetch(table, key).await? {
            Some(document) => ConditionEvaluator::matches(&document, conditions),
            None => Ok(false),
        }
    }

    #[instrument(name = "dblayer.dynamodb.get_item", skip_all, fields(table = %table, key = %key), err)]
    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        if self.readable_table(table, &key.name).await?.is_none() {
            return Ok(None);
        }

        let mut builder = ExpressionBuilder::new();
        let projection = attributes.map(|attributes| {
            builder.projection(std::iter::once(key.name.as_str()).chain(attributes.iter().map(String::as_str)))
        });
        let input = builder.finish();

        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_to_item(key)))
            .consistent_read(true)
            .set_projection_expression(projection)
            .set_expression_attribute_names(input.names())
            .send()
            .await
            .map_err(map_sdk_error)?;
        returned_document(output.item, key)
    }

    #[instrument(name = "dblayer.dynamodb.get_items", skip_all, fields(table = %table, count = keys.len()), err)]
    async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        let Some(handle) = self.existing_table(table).await? else {
            return Ok(Vec::new());
        };
        for key in keys {
            handle.check_key_name(&key.name)?;
        }

        let mut seen = HashSet::new();
        let unique = keys
            .iter()
            .filter(|key| seen.insert(key.string_value()))
            .map(key_to_item)
            .collect::<Vec<_>>();

        let mut found = HashMap::new();
        for chunk in unique.chunks(BATCH_GET_SIZE) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;

            while !pending.is_empty() {
                let mut builder = ExpressionBuilder::new();
                let projection = attributes.map(|attributes| {
                    builder.projection(
                        std::iter::once(handle.key_attribute.as_str())
                            .chain(attributes.iter().map(String::as_str)),
                    )
                });
                let input = builder.finish();
                let request = KeysAndAttributes::builder()
                    .set_keys(Some(pending))
                    .consistent_read(true)
                    .set_projection_expression(projection)
                    .set_expression_attribute_names(input.names())
                    .build()
                    .map_err(build_error)?;

                let output = self
                    .client
                    .batch_get_item()
                    .request_items(table, request)
                    .send()
                    .await
                    .map_err(map_sdk_error)?;

                for item in output
                    .responses
                    .and_then(|mut responses| responses.remove(table))
                    .unwrap_or_default()
                {
                    let document = item_to_document(item)?;
                    if let Some(id) = document.get(&handle.key_attribute).and_then(Value::as_str) {
                        found.insert(id.to_string(), document);
                    }
                }

                pending = output
                    .unprocessed_keys
                    .and_then(|mut unprocessed| unprocessed.remove(table))
                    .map(|unprocessed| unprocessed.keys)
                    .unwrap_or_default();
                if !pending.is_empty() {
                    attempt += 1;
                    if attempt > MAX_UNPROCESSED_RETRIES {
                        return Err(DatabaseError::TooManyRequests(format!(
                            "{} keys of table {table} stayed unprocessed",
                            pending.len()
                        )));
                    }
                    debug!(table, unprocessed = pending.len(), attempt, "re-requesting unprocessed keys");
                    tokio::time::sleep(unprocessed_backoff(attempt)).await;
                }
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| {
                found
                    .get(&key.string_value())
                    .map(|document| with_key(document.clone(), key))
            })
            .collect())
    }

    #[instrument(name = "dblayer.dynamodb.put_item", skip_all, fields(table = %table, key = %key, overwrite = overwrite), err)]
    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        self.writable_table(table, key).await?;
        let document = with_key(item, key);
        let native = &document_to_item(&document)?;

        let old = retry_on_contention(&self.retry_policy, "put_item", move |_| async move {
            let mut builder = ExpressionBuilder::new();
            let condition = (!overwrite)
                .then(|| format!("attribute_not_exists({})", builder.name(&key.name)));
            let input = builder.finish();

            let result = self
                .client
                .put_item()
                .table_name(table)
                .set_item(Some(native.clone()))
                .set_condition_expression(condition)
                .set_expression_attribute_names(input.names())
                .return_values(ReturnValue::AllOld)
                .send()
                .await
                .map_err(map_sdk_error);

            match result {
                Ok(output) => Ok(returned_document(output.attributes, key)?),
                Err(DatabaseError::PreconditionFailed(_)) => {
                    Err(AttemptError::Failed(DatabaseError::already_exists(table, key)))
                }
                Err(error) => Err(classify(error)),
            }
        })
        .await?;

        self.post_insert(table, key, old.is_none()).await?;
        Ok(return_behavior.select(old, Some(document)))
    }

    #[instrument(name = "dblayer.dynamodb.update_item", skip_all, fields(table = %table, key = %key), err)]
    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        self.writable_table(table, key).await?;

        let mut builder = ExpressionBuilder::new();
        let mut assignments = Vec::with_capacity(patch.len());
        for (name, value) in patch.iter().filter(|(name, _)| **name != key.name) {
            let name = builder.name(name);
            let value = builder.value(value_to_attribute_value(value)?);
            assignments.push(format!("{name} = {value}"));
        }
        if assignments.is_empty() {
            return Err(DatabaseError::BadRequest(
                "an update needs at least one attribute besides the key".to_string(),
            ));
        }
        let update_expression = &format!("SET {}", assignments.join(", "));
        let condition = &builder.condition(conditions)?;
        let input = &builder.finish();

        let old = retry_on_contention(&self.retry_policy, "update_item", move |_| async move {
            let result = self
                .client
                .update_item()
                .table_name(table)
                .set_key(Some(key_to_item(key)))
                .update_expression(update_expression.clone())
                .set_condition_expression(condition.clone())
                .set_expression_attribute_names(input.names())
                .set_expression_attribute_values(input.values())
                .return_values(ReturnValue::AllOld)
                .send()
                .await
                .map_err(map_sdk_error);

            match result {
                Ok(output) => Ok(returned_document(output.attributes, key)?),
                Err(DatabaseError::PreconditionFailed(_)) => {
                    Err(AttemptError::Failed(DatabaseError::precondition_failed(table, key)))
                }
                Err(error) => Err(classify(error)),
            }
        })
        .await?;

        self.post_insert(table, key, old.is_none()).await?;
        let mut updated = old.clone().unwrap_or_default();
        merge_attributes(&mut updated, patch);
        Ok(return_behavior.select(old, Some(with_key(updated, key))))
    }

    #[instrument(name = "dblayer.dynamodb.delete_item", skip_all, fields(table = %table, key = %key), err)]
    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        if self.readable_table(table, &key.name).await?.is_none() {
            check_conditions(table, key, None, conditions)?;
            return Ok(None);
        }

        let mut builder = ExpressionBuilder::new();
        let condition = &builder.condition(conditions)?;
        let input = &builder.finish();

        let old = retry_on_contention(&self.retry_policy, "delete_item", move |_| async move {
            let result = self
                .client
                .delete_item()
                .table_name(table)
                .set_key(Some(key_to_item(key)))
                .set_condition_expression(condition.clone())
                .set_expression_attribute_names(input.names())
                .set_expression_attribute_values(input.values())
                .return_values(ReturnValue::AllOld)
                .send()
                .await
                .map_err(map_sdk_error);

            match result {
                Ok(output) => Ok(returned_document(output.attributes, key)?),
                Err(DatabaseError::PreconditionFailed(_)) => {
                    Err(AttemptError::Failed(DatabaseError::precondition_failed(table, key)))
                }
                Err(error) => Err(classify(error)),
            }
        })
        .await?;

        Ok(return_behavior.select(old, None))
    }

    #[instrument(name = "dblayer.dynamodb.add_elements_to_array", skip_all, fields(table = %table, key = %key, attribute = %attribute), err)]
    async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        let old = self
            .nested_update(
                "add_elements_to_array",
                table,
                key,
                attribute,
                NestedUpdate::Append(elements),
                conditions,
            )
            .await?;

        let mut updated = old.clone().unwrap_or_default();
        append_elements(&mut updated, attribute, elements)?;
        Ok(return_behavior.select(old, Some(with_key(updated, key))))
    }

    #[instrument(name = "dblayer.dynamodb.remove_elements_from_array", skip_all, fields(table = %table, key = %key, attribute = %attribute), err)]
    async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        let current = match self.readable_table(table, &key.name).await? {
            Some(_) => self.fetch(table, key).await?,
            None => None,
        };
        check_conditions(table, key, current.as_ref(), conditions)?;
        let Some(current) = current else {
            return Ok(None);
        };

        let mut updated = current.clone();
        if !remove_elements(&mut updated, attribute, elements)? {
            return Ok(return_behavior.select(Some(current.clone()), Some(current)));
        }

        // Fetch-then-rewrite: a write landing between the read and the put is lost.
        self.put_native(table, document_to_item(&updated)?).await?;
        Ok(return_behavior.select(Some(current), Some(updated)))
    }

    #[instrument(name = "dblayer.dynamodb.increment_attribute", skip_all, fields(table = %table, key = %key, attribute = %attribute, delta = delta), err)]
    async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        delta: f64,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<f64> {
        let old = self
            .nested_update(
                "increment_attribute",
                table,
                key,
                attribute,
                NestedUpdate::Increment(delta),
                conditions,
            )
            .await?;

        let mut updated = old.unwrap_or_default();
        increment_number(&mut updated, attribute, delta)
    }

    #[instrument(name = "dblayer.dynamodb.scan_table", skip_all, fields(table = %table), err)]
    async fn scan_table(
        &self,
        table: &str,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        let Some(handle) = self.existing_table(table).await? else {
            return Ok(Vec::new());
        };

        let mut builder = ExpressionBuilder::new();
        let filter_expression = filter
            .map(|filter| builder.condition(filter))
            .transpose()?
            .flatten();
        let input = builder.finish();

        let mut documents = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(table)
                .consistent_read(true)
                .set_filter_expression(filter_expression.clone())
                .set_expression_attribute_names(input.names())
                .set_expression_attribute_values(input.values())
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(map_sdk_error)?;

            for item in output.items.unwrap_or_default() {
                documents.push(scanned_item_to_document(item, &handle.key_attribute)?);
            }
            match output.last_evaluated_key {
                Some(last) if !last.is_empty() => start_key = Some(last),
                _ => break,
            }
        }

        Ok(documents)
    }

    #[instrument(name = "dblayer.dynamodb.scan_table_paginated", skip_all, fields(table = %table, page_size = page_size), err)]
    async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        let start_key = start_key(page_token)?;
        let Some(handle) = self.existing_table(table).await? else {
            return Ok(Page::default());
        };

        let mut builder = ExpressionBuilder::new();
        let filter_expression = filter
            .map(|filter| builder.condition(filter))
            .transpose()?
            .flatten();
        let input = builder.finish();

        let output = self
            .client
            .scan()
            .table_name(table)
            .consistent_read(true)
            .limit(i32::try_from(page_size).unwrap_or(i32::MAX))
            .set_filter_expression(filter_expression)
            .set_expression_attribute_names(input.names())
            .set_expression_attribute_values(input.values())
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let items = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|item| scanned_item_to_document(item, &handle.key_attribute))
            .collect::<DatabaseResult<Vec<_>>>()?;
        let next_page_token = output
            .last_evaluated_key
            .filter(|last| !last.is_empty())
            .map(encode_cursor)
            .transpose()?;

        Ok(Page::builder(items)
            .with_next_page_token(next_page_token)
            .build())
    }

    #[instrument(name = "dblayer.dynamodb.get_table_names", skip_all, err)]
    async fn get_table_names(&self) -> DatabaseResult<Vec<String>> {
        let mut names = Vec::new();
        let mut start = None;
        loop {
            let output = self
                .client
                .list_tables()
                .set_exclusive_start_table_name(start)
                .send()
                .await
                .map_err(map_sdk_error)?;
            names.extend(
                output
                    .table_names
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|name| !name.starts_with(SYSTEM_TABLE_PREFIX)),
            );
            match output.last_evaluated_table_name {
                Some(last) => start = Some(last),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }

    #[instrument(name = "dblayer.dynamodb.drop_table", skip_all, fields(table = %table), err)]
    async fn drop_table(&self, table: &str) -> DatabaseResult<()> {
        if let Some(handle) = self.existing_table(table).await? {
            let mut builder = ExpressionBuilder::new();
            let projection = builder.projection([handle.key_attribute.as_str()]);
            let input = builder.finish();

            let mut deleted = 0usize;
            let mut start_key = None;
            loop {
                let output = self
                    .client
                    .scan()
                    .table_name(table)
                    .projection_expression(projection.clone())
                    .set_expression_attribute_names(input.names())
                    .set_exclusive_start_key(start_key)
                    .send()
                    .await
                    .map_err(map_sdk_error)?;

                let keys = output.items.unwrap_or_default();
                deleted += keys.len();
                self.delete_keys(table, keys).await?;

                match output.last_evaluated_key {
                    Some(last) if !last.is_empty() => start_key = Some(last),
                    _ => break,
                }
            }
            debug!(table, deleted, "deleted every item");
        }

        self.tables.remove(table).await;

        self.hooks.post_drop_table(table).await.map_err(|error| {
            DatabaseError::InternalServerError(format!(
                "table {table} was dropped but the post-drop hook failed: {error}"
            ))
        })
    }
}

/// Credentials used to build the native client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DynamoDbCredentials {
    Static {
        access_key: String,
        secret_key: String,
    },
    /// The default provider chain (environment, profile, instance role).
    #[default]
    Ambient,
}

/// Builder for [`DynamoDbService`].
///
/// # Example
///
/// ```ignore
/// use dblayer::dynamodb::DynamoDbServiceBuilder;
///
/// let service = DynamoDbServiceBuilder::default()
///     .with_region("eu-west-1")
///     .with_endpoint_url("http://localhost:8000")
///     .with_static_credentials("local", "local")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct DynamoDbServiceBuilder {
    client: Option<Client>,
    credentials: DynamoDbCredentials,
    region: Option<String>,
    endpoint_url: Option<String>,
    hooks: Option<SharedHooks>,
    retry_policy: RetryPolicy,
    table_creation: TableCreation,
}

impl DynamoDbServiceBuilder {
    /// Uses an already configured client; credentials, region and endpoint are ignored.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_static_credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.credentials = DynamoDbCredentials::Static {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        };
        self
    }

    pub fn with_credentials(mut self, credentials: DynamoDbCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Points the client at a local or emulated endpoint.
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
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

    pub fn with_table_creation(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.table_creation = TableCreation {
            poll_interval,
            timeout,
        };
        self
    }

    async fn load_client(
        credentials: DynamoDbCredentials,
        region: Option<String>,
        endpoint_url: Option<String>,
    ) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let DynamoDbCredentials::Static {
            access_key,
            secret_key,
        } = credentials
        {
            loader = loader.credentials_provider(Credentials::new(access_key, secret_key, None, None, "dblayer"));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        Client::new(&loader.load().await)
    }
}

#[async_trait]
impl DatabaseBackendBuilder for DynamoDbServiceBuilder {
    type Backend = DynamoDbService;

    async fn build(self) -> DatabaseResult<Self::Backend> {
        let client = match self.client {
            Some(client) => client,
            None => Self::load_client(self.credentials, self.region, self.endpoint_url).await,
        };

        Ok(DynamoDbService {
            hooks: self.hooks.unwrap_or_else(noop_hooks),
            retry_policy: self.retry_policy,
            table_creation: self.table_creation,
            ..DynamoDbService::from_client(client)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn path(raw: &str) -> AttributePath {
        AttributePath::parse(raw).unwrap()
    }

    #[rstest]
    #[case::absent_item(None, "a.b.c", Some(0))]
    #[case::top_level(None, "tags", None)]
    #[case::partial(Some(json!({ "a": { "x": 1 } })), "a.b.c", Some(1))]
    #[case::container_exists(Some(json!({ "a": { "b": {} } })), "a.b.c", None)]
    fn finds_the_first_missing_parent(
        #[case] current: Option<Value>,
        #[case] attribute: &str,
        #[case] expected: Option<usize>,
    ) {
        let current = current.map(|value| value.as_object().cloned().unwrap());
        assert_eq!(missing_parent_depth(current.as_ref(), &path(attribute)), expected);
    }

    #[test]
    fn subtrees_nest_the_leaf() {
        let segments = ["b".to_string(), "c".to_string()];
        assert_eq!(subtree(&segments, json!([1])), json!({ "b": { "c": [1] } }));
        assert_eq!(subtree(&[], json!(5.0)), json!(5.0));
    }

    #[test]
    fn guards_combine_with_conditions() {
        assert_eq!(with_guard(None, None), None);
        assert_eq!(with_guard(Some("a".into()), None).as_deref(), Some("a"));
        assert_eq!(with_guard(None, Some("g".into())).as_deref(), Some("g"));
        assert_eq!(
            with_guard(Some("a".into()), Some("g".into())).as_deref(),
            Some("(a) AND (g)")
        );
    }

    #[test]
    fn native_updates_use_if_not_exists() {
        let mut builder = ExpressionBuilder::new();
        let elements = [Primitive::from(1i64)];
        let append = NestedUpdate::Append(&elements)
            .native_assignment(&mut builder, "#n0")
            .unwrap();
        assert_eq!(append, "#n0 = list_append(if_not_exists(#n0, :v0), :v1)");

        let increment = NestedUpdate::Increment(2.5)
            .native_assignment(&mut builder, "#n0")
            .unwrap();
        assert_eq!(increment, "#n0 = if_not_exists(#n0, :v2) + :v3");
        assert_eq!(
            builder.finish().expression_attribute_values[":v3"],
            AttributeValue::N("2.5".into())
        );
    }

    #[test]
    fn previews_reject_non_array_targets() {
        let elements = [Primitive::from("x")];
        let mut document = json!({ "tags": 1 }).as_object().cloned().unwrap();
        assert!(
            NestedUpdate::Append(&elements)
                .apply(&mut document, &path("tags"))
                .is_err()
        );
    }

    #[test]
    fn integral_increments_stay_integers() {
        assert_eq!(NestedUpdate::Increment(3.0).leaf_value(), json!(3));
        assert!(NestedUpdate::Increment(3.0).leaf_value().is_i64());
        assert_eq!(NestedUpdate::Increment(0.5).leaf_value(), json!(0.5));
    }

    #[test]
    fn empty_tokens_scan_from_the_start() {
        assert_eq!(start_key(None).unwrap(), None);
        assert_eq!(start_key(Some(&PageToken::from(""))).unwrap(), None);

        let token = encode_cursor(key_to_item(&ItemKey::new("id", "a"))).unwrap();
        let item = start_key(Some(&token)).unwrap().unwrap();
        assert_eq!(item["id"], AttributeValue::S("a".into()));

        let err = start_key(Some(&PageToken::from("not a cursor"))).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[derive(Debug)]
    struct FailingHooks;

    #[async_trait]
    impl dblayer_core::hooks::ItemHooks for FailingHooks {
        async fn post_insert_item(&self, _table: &str, _key: &ItemKey) -> DatabaseResult<()> {
            Err(DatabaseError::InternalServerError("index unavailable".into()))
        }

        async fn post_drop_table(&self, _table: &str) -> DatabaseResult<()> {
            Err(DatabaseError::InternalServerError("index unavailable".into()))
        }
    }

    fn offline_service() -> DynamoDbService {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        DynamoDbService {
            hooks: Arc::new(FailingHooks),
            ..DynamoDbService::from_client(Client::from_conf(config))
        }
    }

    #[tokio::test]
    async fn failing_creation_hooks_surface_only_for_new_items() {
        let service = offline_service();
        let key = ItemKey::new("id", "a");

        let err = service.post_insert("t", &key, true).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InternalServerError(_)));
        service.post_insert("t", &key, false).await.unwrap();
    }

    #[test]
    fn unprocessed_backoff_grows() {
        assert_eq!(unprocessed_backoff(1), Duration::from_millis(200));
        assert!(unprocessed_backoff(5) > unprocessed_backoff(4));
    }
}
