//! Table handles for database operations.
//!
//! A [`Table`] binds a table name to a [`DatabaseStore`] so calls do not repeat it.
//!
//! # Example
//!
//! ```ignore
//! use dblayer::prelude::*;
//!
//! let orders = store.table("orders");
//! let key = ItemKey::new("id", "o-1");
//! orders.increment_attribute(&key, "stats.views", 1.0, ConditionCoupling::Empty).await?;
//! let order: Option<Order> = orders.get_item_as(&key).await?;
//! ```

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::{DatabaseBackend, ReturnItemBehavior},
    condition::ConditionCoupling,
    document::{Document, to_document},
    error::DatabaseResult,
    key::ItemKey,
    page::{Page, PageToken},
    primitive::Primitive,
    store::DatabaseStore,
};

/// A table name with a reference to its store.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the store reference
/// * `B` - The backend type
#[derive(Debug)]
pub struct Table<'a, B: DatabaseBackend> {
    name: String,
    store: &'a DatabaseStore<B>,
}

impl<'a, B: DatabaseBackend> Table<'a, B> {
    pub(crate) fn new(name: String, store: &'a DatabaseStore<B>) -> Self {
        Self { name, store }
    }

    /// Returns the name of this table.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn item_exists(
        &self,
        key: &ItemKey,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<bool> {
        self.store.item_exists(&self.name, key, conditions).await
    }

    pub async fn get_item(
        &self,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        self.store.get_item(&self.name, key, attributes).await
    }

    /// Retrieves one item and deserializes it.
    pub async fn get_item_as<T: DeserializeOwned>(&self, key: &ItemKey) -> DatabaseResult<Option<T>> {
        self.store.get_item_as(&self.name, key).await
    }

    pub async fn get_items(
        &self,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        self.store.get_items(&self.name, keys, attributes).await
    }

    pub async fn put_item(
        &self,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        self.store
            .put_item(&self.name, key, item, return_behavior, overwrite)
            .await
    }

    /// Serializes `value` and stores it at `key`.
    ///
    /// # Errors
    ///
    /// Returns a `BadRequest` if `value` does not serialize to a JSON object.
    pub async fn put<T: Serialize>(
        &self,
        key: &ItemKey,
        value: &T,
        overwrite: bool,
    ) -> DatabaseResult<()> {
        self.put_item(key, to_document(value)?, ReturnItemBehavior::DoNotReturn, overwrite)
            .await
            .map(|_| ())
    }

    pub async fn update_item(
        &self,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        self.store
            .update_item(&self.name, key, patch, return_behavior, conditions)
            .await
    }

    pub async fn delete_item(
        &self,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        self.store
            .delete_item(&self.name, key, return_behavior, conditions)
            .await
    }

    pub async fn add_elements_to_array(
        &self,
        key: &ItemKey,
        attribute: &str,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        self.store
            .add_elements_to_array(&self.name, key, attribute, elements, return_behavior, conditions)
            .await
    }

    pub async fn remove_elements_from_array(
        &self,
        key: &ItemKey,
        attribute: &str,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Option<Document>> {
        self.store
            .remove_elements_from_array(&self.name, key, attribute, elements, return_behavior, conditions)
            .await
    }

    pub async fn increment_attribute(
        &self,
        key: &ItemKey,
        attribute: &str,
        delta: f64,
        conditions: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<f64> {
        self.store
            .increment_attribute(&self.name, key, attribute, delta, conditions)
            .await
    }

    pub async fn scan(&self) -> DatabaseResult<Vec<Document>> {
        self.store.scan_table(&self.name).await
    }

    pub async fn scan_with_filter(
        &self,
        filter: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        self.store.scan_table_with_filter(&self.name, filter).await
    }

    pub async fn scan_paginated(
        &self,
        page_size: usize,
        page_token: Option<&PageToken>,
    ) -> DatabaseResult<Page<Document>> {
        self.store
            .scan_table_paginated(&self.name, page_size, page_token)
            .await
    }

    pub async fn scan_with_filter_paginated(
        &self,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: impl Into<ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        self.store
            .scan_table_with_filter_paginated(&self.name, page_size, page_token, filter)
            .await
    }

    /// Deletes every item of this table.
    pub async fn drop_table(&self) -> DatabaseResult<()> {
        self.store.drop_table(&self.name).await
    }
}
