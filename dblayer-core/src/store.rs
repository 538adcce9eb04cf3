//! Main database interface for interacting with provider backends.
//!
//! [`DatabaseStore`] wraps a [`DatabaseBackend`] and adds what every provider shares:
//!
//! - input sanity checks (table names, attribute names, condition trees, element lists)
//! - [`DatabaseOptions`] post-processing of every returned document
//! - cancellation through a bound [`CancellationToken`]
//!
//! # Example
//!
//! ```ignore
//! use dblayer::prelude::*;
//!
//! let store = DatabaseStore::new(backend);
//! let orders = store.table("orders");
//! orders.put_item(&ItemKey::new("id", "o-1"), item, ReturnItemBehavior::DoNotReturn, false).await?;
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{DatabaseBackend, ReturnItemBehavior},
    condition::ConditionCoupling,
    document::{Document, from_document},
    error::{DatabaseError, DatabaseResult},
    key::{ItemKey, KEY_NAME_SEPARATOR},
    options::DatabaseOptions,
    page::{Page, PageToken},
    path::AttributePath,
    primitive::Primitive,
    table::Table,
};

/// A database bound to a specific backend implementation.
///
/// Cloning is cheap: clones share the backend and the options.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DatabaseStore<B: DatabaseBackend> {
    backend: Arc<B>,
    options: Arc<DatabaseOptions>,
    cancellation: CancellationToken,
}

impl<B: DatabaseBackend> Clone for DatabaseStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            options: self.options.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<B: DatabaseBackend> DatabaseStore<B> {
    /// Creates a new store with default options.
    pub fn new(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Creates a new store over a shared backend.
    pub fn from_shared(backend: Arc<B>) -> Self {
        Self {
            backend,
            options: Arc::new(DatabaseOptions::default()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the post-processing options.
    pub fn with_options(mut self, options: DatabaseOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Returns a store sharing this backend whose operations abort once `token` is
    /// cancelled.
    ///
    /// Cancellation drops the in-flight backend call and returns
    /// [`DatabaseError::Cancelled`]. Writes the backend already committed stay committed.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            backend: self.backend.clone(),
            options: self.options.clone(),
            cancellation: token,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Gets a handle bound to the given table.
    pub fn table<'a>(&'a self, name: &str) -> Table<'a, B> {
        Table::new(name.to_string(), self)
    }

    async fn run<T>(&self, operation: impl Future<Output = DatabaseResult<T>>) -> DatabaseResult<T> {
        if self.cancellation.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(cancelled()),
            result = operation => result,
        }
    }

    fn finish(&self, document: Option<Document>) -> Option<Document> {
        document.map(|document| self.options.apply(document))
    }

    fn finish_all(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .map(|document| self.options.apply(document))
            .collect()
    }

    /// Checks whether an item exists and satisfies `conditions`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an invalid table, key or condition tree.
    pub async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<bool> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        conditions.validate()?;

        self.run(self.backend.item_exists(table, key, &conditions))
            .await
    }

    /// Retrieves one item, optionally restricted to some top-level attributes.
    pub async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        validate_table(table)?;
        validate_key(key)?;
        validate_attribute_names(attributes)?;

        let item = self
            .run(self.backend.get_item(table, key, attributes))
            .await?;
        Ok(self.finish(item))
    }

    /// Retrieves one item and deserializes it.
    pub async fn get_item_as<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> DatabaseResult<Option<T>> {
        self.get_item(table, key, None)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Retrieves several items in key order, skipping missing ones.
    pub async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        validate_table(table)?;
        keys.iter().try_for_each(validate_key)?;
        validate_attribute_names(attributes)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let items = self
            .run(self.backend.get_items(table, keys, attributes))
            .await?;
        Ok(self.finish_all(items))
    }

    /// Creates or replaces an item.
    ///
    /// # Errors
    ///
    /// * `Conflict` - The item exists and `overwrite` is `false`
    /// * `BadRequest` - Invalid attribute names, or a key attribute that differs from `key`
    pub async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        validate_table(table)?;
        validate_key(key)?;
        let item = sanitize_attributes(key, item)?;

        let returned = self
            .run(
                self.backend
                    .put_item(table, key, item, return_behavior, overwrite),
            )
            .await?;
        Ok(self.finish(returned))
    }

    /// Merges top-level attributes into an item, creating it if absent.
    ///
    /// # Errors
    ///
    /// * `PreconditionFailed` - `conditions` do not hold
    /// * `BadRequest` - An empty patch, invalid attribute names, or a mismatching key
    pub async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        conditions.validate()?;
        let patch = sanitize_attributes(key, patch)?;
        if patch.is_empty() {
            return Err(DatabaseError::BadRequest(format!(
                "update of {key} in {table} has no attributes besides the key"
            )));
        }

        let returned = self
            .run(
                self.backend
                    .update_item(table, key, patch, return_behavior, &conditions),
            )
            .await?;
        Ok(self.finish(returned))
    }

    /// Deletes an item after checking `conditions`.
    pub async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        conditions.validate()?;

        let returned = self
            .run(
                self.backend
                    .delete_item(table, key, return_behavior, &conditions),
            )
            .await?;
        Ok(self.finish(returned))
    }

    /// Appends elements to an array attribute, creating the item and path if needed.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty element list, mixed element kinds, an invalid path or a
    /// non-array target.
    pub async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &str,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        let attribute = validate_mutation_path(key, attribute)?;
        validate_elements(elements)?;
        conditions.validate()?;

        let returned = self
            .run(self.backend.add_elements_to_array(
                table,
                key,
                &attribute,
                elements,
                return_behavior,
                &conditions,
            ))
            .await?;
        Ok(self.finish(returned))
    }

    /// Removes every occurrence of the given elements from an array attribute.
    pub async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &str,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        let attribute = validate_mutation_path(key, attribute)?;
        validate_elements(elements)?;
        conditions.validate()?;

        let returned = self
            .run(self.backend.remove_elements_from_array(
                table,
                key,
                &attribute,
                elements,
                return_behavior,
                &conditions,
            ))
            .await?;
        Ok(self.finish(returned))
    }

    /// Atomically adds `delta` to a numeric attribute and returns the result.
    pub async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &str,
        delta: f64,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<f64> {
        let conditions = conditions.into();
        validate_table(table)?;
        validate_key(key)?;
        let attribute = validate_mutation_path(key, attribute)?;
        if !delta.is_finite() {
            return Err(DatabaseError::BadRequest(format!(
                "increment of {attribute} must be finite, got {delta}"
            )));
        }
        conditions.validate()?;

        self.run(
            self.backend
                .increment_attribute(table, key, &attribute, delta, &conditions),
        )
        .await
    }

    /// Returns every item of a table.
    pub async fn scan_table(&self, table: &str) -> DatabaseResult<Vec<Document>> {
        validate_table(table)?;
        let items = self.run(self.backend.scan_table(table, None)).await?;
        Ok(self.finish_all(items))
    }

    /// Returns every item of a table matching `filter`.
    pub async fn scan_table_with_filter(
        &self,
        table: &str,
        filter: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        let filter = filter.into();
        validate_table(table)?;
        filter.validate()?;

        let items = self
            .run(self.backend.scan_table(table, Some(&filter)))
            .await?;
        Ok(self.finish_all(items))
    }

    /// Returns one page of a table scan.
    ///
    /// Pass the previous page's `next_page_token` to continue; `None` or an empty token
    /// starts over.
    pub async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
    ) -> DatabaseResult<Page<Document>> {
        validate_table(table)?;
        validate_page_size(page_size)?;

        let page = self
            .run(
                self.backend
                    .scan_table_paginated(table, page_size, start_token(page_token), None),
            )
            .await?;
        Ok(self.finish_page(page))
    }

    /// Returns one page of a filtered table scan.
    ///
    /// `page_size` bounds the items read before filtering, so a page may hold fewer
    /// matches (even none) while more pages remain.
    pub async fn scan_table_with_filter_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        let filter = filter.into();
        validate_table(table)?;
        validate_page_size(page_size)?;
        filter.validate()?;

        let page = self
            .run(
                self.backend
                    .scan_table_paginated(table, page_size, start_token(page_token), Some(&filter)),
            )
            .await?;
        Ok(self.finish_page(page))
    }

    fn finish_page(&self, page: Page<Document>) -> Page<Document> {
        Page::builder(self.finish_all(page.items))
            .with_next_page_token(page.next_page_token)
            .build()
    }

    /// Lists the user-visible tables.
    pub async fn get_table_names(&self) -> DatabaseResult<Vec<String>> {
        self.run(self.backend.get_table_names()).await
    }

    /// Deletes every item of a table.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    pub async fn drop_table(&self, table: &str) -> DatabaseResult<()> {
        validate_table(table)?;
        self.run(self.backend.drop_table(table)).await
    }
}

fn cancelled() -> DatabaseError {
    DatabaseError::Cancelled("operation cancelled".to_string())
}

fn validate_table(table: &str) -> DatabaseResult<()> {
    if table.trim().is_empty() {
        return Err(DatabaseError::BadRequest(
            "table name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_key(key: &ItemKey) -> DatabaseResult<()> {
    AttributePath::parse_top_level(&key.name)?;
    // Native key names are split on the first separator.
    if key.name.contains(KEY_NAME_SEPARATOR) {
        return Err(DatabaseError::BadRequest(format!(
            "key name {:?} cannot contain {KEY_NAME_SEPARATOR:?}",
            key.name
        )));
    }
    Ok(())
}

/// An empty token is the same as no token.
fn start_token(page_token: Option<&PageToken>) -> Option<&PageToken> {
    page_token.filter(|token| !token.as_str().is_empty())
}

fn validate_attribute_names(attributes: Option<&[String]>) -> DatabaseResult<()> {
    attributes
        .unwrap_or_default()
        .iter()
        .try_for_each(|name| AttributePath::parse_top_level(name).map(|_| ()))
}

fn validate_page_size(page_size: usize) -> DatabaseResult<()> {
    if page_size == 0 {
        return Err(DatabaseError::BadRequest(
            "page size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_mutation_path(key: &ItemKey, attribute: &str) -> DatabaseResult<AttributePath> {
    let path = AttributePath::parse(attribute)?;
    if path.segments()[0] == key.name {
        return Err(DatabaseError::BadRequest(format!(
            "the key attribute {} cannot be mutated",
            key.name
        )));
    }
    Ok(path)
}

fn validate_elements(elements: &[Primitive]) -> DatabaseResult<()> {
    let Some(first) = elements.first() else {
        return Err(DatabaseError::BadRequest(
            "element list must not be empty".to_string(),
        ));
    };
    if let Some(other) = elements.iter().find(|e| e.kind() != first.kind()) {
        return Err(DatabaseError::BadRequest(format!(
            "all elements must share one kind, found {} and {}",
            first.kind(),
            other.kind()
        )));
    }
    Ok(())
}

/// Validates top-level attribute names and removes a key attribute matching `key`.
fn sanitize_attributes(key: &ItemKey, mut attributes: Document) -> DatabaseResult<Document> {
    for name in attributes.keys() {
        AttributePath::parse_top_level(name)?;
    }
    if let Some(value) = attributes.remove(&key.name) {
        let matches = key.value.matches_json(&value)
            || value == Value::String(key.string_value());
        if !matches {
            return Err(DatabaseError::BadRequest(format!(
                "attribute {} = {value} does not match the item key {key}",
                key.name
            )));
        }
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case::same_kind(json!({ "id": 7, "a": 1 }))]
    #[case::stored_form(json!({ "id": "7", "a": 1 }))]
    #[case::absent(json!({ "a": 1 }))]
    fn matching_key_attributes_are_stripped(#[case] attributes: Value) {
        let sanitized = sanitize_attributes(&ItemKey::new("id", 7i64), doc(attributes)).unwrap();
        assert_eq!(Value::Object(sanitized), json!({ "a": 1 }));
    }

    #[rstest]
    #[case::other_key(json!({ "id": 8 }))]
    #[case::nested_name(json!({ "a.b": 1 }))]
    #[case::indexing(json!({ "a[0]": 1 }))]
    fn invalid_attributes_are_rejected(#[case] attributes: Value) {
        let err = sanitize_attributes(&ItemKey::new("id", 7i64), doc(attributes)).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[rstest]
    #[case::empty(vec![], false)]
    #[case::single_kind(vec![Primitive::from(1i64), Primitive::from(2i64)], true)]
    #[case::mixed(vec![Primitive::from(1i64), Primitive::from("2")], false)]
    fn element_lists(#[case] elements: Vec<Primitive>, #[case] valid: bool) {
        assert_eq!(validate_elements(&elements).is_ok(), valid);
    }

    #[test]
    fn key_attribute_is_not_a_mutation_target() {
        let key = ItemKey::new("id", "1");
        assert!(validate_mutation_path(&key, "id").is_err());
        assert!(validate_mutation_path(&key, "counts.id").is_ok());
    }

    #[rstest]
    #[case::plain("id", true)]
    #[case::separator("user:id", false)]
    #[case::nested("a.b", false)]
    fn key_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_key(&ItemKey::new(name, "1")).is_ok(), valid);
    }

    #[test]
    fn empty_tokens_start_over() {
        let empty = PageToken::from("");
        let token = PageToken::from("abc");
        assert!(start_token(Some(&empty)).is_none());
        assert_eq!(start_token(Some(&token)), Some(&token));
        assert!(start_token(None).is_none());
    }
}
