//! Backend abstraction for the item database.
//!
//! This module defines the traits that abstract over different database providers,
//! allowing the store to work with transactional entity stores and expression-based
//! key/value stores alike.
//!
//! # Overview
//!
//! The [`DatabaseBackend`] trait is the uniform async contract every provider adapter
//! implements: conditional CRUD, atomic array and counter mutations, filtered and
//! paginated scans and table administration. Every adapter must produce the same
//! externally observable behavior: the same condition semantics, the same
//! return-value contract and the same error taxonomy.
//!
//! # Traits
//!
//! - [`DatabaseBackend`]: The core trait for provider adapters
//! - [`DatabaseBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use dblayer::backend::{DatabaseBackend, ReturnItemBehavior};
//! use dblayer::condition::ConditionCoupling;
//! use dblayer::key::ItemKey;
//!
//! let key = ItemKey::new("id", "order-1");
//! let item = dblayer::document::to_document(&serde_json::json!({ "status": "open" }))?;
//! backend
//!     .put_item("orders", &key, item, ReturnItemBehavior::DoNotReturn, false)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};

use crate::{
    condition::ConditionCoupling,
    document::Document,
    error::DatabaseResult,
    key::ItemKey,
    page::{Page, PageToken},
    path::AttributePath,
    primitive::Primitive,
};

/// What a mutating operation returns.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReturnItemBehavior {
    #[default]
    DoNotReturn,
    ReturnOldValues,
    ReturnNewValues,
}

impl ReturnItemBehavior {
    /// Picks the document to return from the pre- and post-mutation states.
    pub fn select(self, old: Option<Document>, new: Option<Document>) -> Option<Document> {
        match self {
            ReturnItemBehavior::DoNotReturn => None,
            ReturnItemBehavior::ReturnOldValues => old,
            ReturnItemBehavior::ReturnNewValues => new,
        }
    }
}

/// Abstract interface for database provider adapters.
///
/// # Keys
///
/// Every item is addressed by an [`ItemKey`]. Adapters store the key attribute as a
/// string and inject it into every returned document.
///
/// # Conditions
///
/// Conditions are evaluated against the current item before a mutation. An absent item
/// is evaluated as an empty document, so `attribute_not_exists` holds and comparisons do
/// not. Unsatisfied conditions fail with `PreconditionFailed` and leave the item as is.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks against the same or different tables.
///
/// # Error Handling
///
/// Operations return [`DatabaseResult<T>`](crate::error::DatabaseResult). Adapters map
/// every provider-native error at this boundary; contention is retried internally and
/// surfaces as `TooManyRequests` once the retry budget is spent.
#[async_trait]
pub trait DatabaseBackend: Send + Sync + Debug {
    /// Checks whether an item exists and satisfies the given conditions.
    ///
    /// # Returns
    ///
    /// `true` iff the item is present and `conditions` (if any) hold against it.
    async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<bool>;

    /// Retrieves one item.
    ///
    /// # Arguments
    ///
    /// * `table` - The table to read from
    /// * `key` - The item key
    /// * `attributes` - Top-level attributes to keep; the key attribute is always kept
    ///
    /// # Returns
    ///
    /// The item with its key injected, or `None` if it does not exist.
    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>>;

    /// Retrieves several items.
    ///
    /// Found items are returned in the order of `keys`; missing keys are skipped.
    async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>>;

    /// Creates or replaces an item.
    ///
    /// # Arguments
    ///
    /// * `item` - The full item; its key attribute (if any) is replaced by `key`
    /// * `return_behavior` - Whether to return the previous or the stored item
    /// * `overwrite` - When `false`, an existing item fails the call with `Conflict`
    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>>;

    /// Merges top-level attributes into an item, creating it if absent.
    ///
    /// Every attribute of `patch` replaces the attribute of the same name: arrays and
    /// nested objects are replaced wholesale, never merged element-wise.
    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>>;

    /// Deletes an item after checking `conditions` against its current state.
    ///
    /// Deleting an absent item is not an error.
    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>>;

    /// Appends elements to the array at `attribute`.
    ///
    /// The item, the nested path and the array are created when absent. A non-array
    /// value at `attribute` fails with `BadRequest`.
    async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>>;

    /// Removes every occurrence of `elements` (by value) from the array at `attribute`.
    ///
    /// The order of the remaining elements is preserved. An absent item or array is
    /// left untouched.
    async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>>;

    /// Atomically adds `delta` to the number at `attribute`.
    ///
    /// An absent item or attribute starts from `0`.
    ///
    /// # Returns
    ///
    /// The resulting value.
    async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        delta: f64,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<f64>;

    /// Enumerates every item of a table, keeping those matching `filter`.
    ///
    /// A missing table scans as empty.
    async fn scan_table(
        &self,
        table: &str,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>>;

    /// Reads one page of a table scan.
    ///
    /// # Arguments
    ///
    /// * `page_size` - Number of native items to read; filtering happens after the read,
    ///   so a filtered page may hold fewer items
    /// * `page_token` - Token from the previous page, `None` to start from the beginning
    /// * `filter` - Optional condition tree items must satisfy
    ///
    /// # Returns
    ///
    /// A page whose `next_page_token` is `None` once the table is exhausted.
    async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>>;

    /// Lists the user-visible tables.
    async fn get_table_names(&self) -> DatabaseResult<Vec<String>>;

    /// Deletes every item of a table in bounded batches and forgets its cached handle.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_table(&self, table: &str) -> DatabaseResult<()>;
}

#[async_trait]
impl<B> DatabaseBackend for &B
where
    B: DatabaseBackend + ?Sized,
{
    async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<bool> {
        (**self).item_exists(table, key, conditions).await
    }

    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        (**self).get_item(table, key, attributes).await
    }

    async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        (**self).get_items(table, keys, attributes).await
    }

    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .put_item(table, key, item, return_behavior, overwrite)
            .await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .update_item(table, key, patch, return_behavior, conditions)
            .await
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .delete_item(table, key, return_behavior, conditions)
            .await
    }

    async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .add_elements_to_array(table, key, attribute, elements, return_behavior, conditions)
            .await
    }

    async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .remove_elements_from_array(table, key, attribute, elements, return_behavior, conditions)
            .await
    }

    async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        delta: f64,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<f64> {
        (**self)
            .increment_attribute(table, key, attribute, delta, conditions)
            .await
    }

    async fn scan_table(
        &self,
        table: &str,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        (**self).scan_table(table, filter).await
    }

    async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        (**self)
            .scan_table_paginated(table, page_size, page_token, filter)
            .await
    }

    async fn get_table_names(&self) -> DatabaseResult<Vec<String>> {
        (**self).get_table_names().await
    }

    async fn drop_table(&self, table: &str) -> DatabaseResult<()> {
        (**self).drop_table(table).await
    }
}

#[async_trait]
impl<B> DatabaseBackend for Arc<B>
where
    B: DatabaseBackend + ?Sized,
{
    async fn item_exists(
        &self,
        table: &str,
        key: &ItemKey,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<bool> {
        (**self).item_exists(table, key, conditions).await
    }

    async fn get_item(
        &self,
        table: &str,
        key: &ItemKey,
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Option<Document>> {
        (**self).get_item(table, key, attributes).await
    }

    async fn get_items(
        &self,
        table: &str,
        keys: &[ItemKey],
        attributes: Option<&[String]>,
    ) -> DatabaseResult<Vec<Document>> {
        (**self).get_items(table, keys, attributes).await
    }

    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        item: Document,
        return_behavior: ReturnItemBehavior,
        overwrite: bool,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .put_item(table, key, item, return_behavior, overwrite)
            .await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        patch: Document,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .update_item(table, key, patch, return_behavior, conditions)
            .await
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &ItemKey,
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .delete_item(table, key, return_behavior, conditions)
            .await
    }

    async fn add_elements_to_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .add_elements_to_array(table, key, attribute, elements, return_behavior, conditions)
            .await
    }

    async fn remove_elements_from_array(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        elements: &[Primitive],
        return_behavior: ReturnItemBehavior,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<Option<Document>> {
        (**self)
            .remove_elements_from_array(table, key, attribute, elements, return_behavior, conditions)
            .await
    }

    async fn increment_attribute(
        &self,
        table: &str,
        key: &ItemKey,
        attribute: &AttributePath,
        delta: f64,
        conditions: &ConditionCoupling,
    ) -> DatabaseResult<f64> {
        (**self)
            .increment_attribute(table, key, attribute, delta, conditions)
            .await
    }

    async fn scan_table(
        &self,
        table: &str,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Vec<Document>> {
        (**self).scan_table(table, filter).await
    }

    async fn scan_table_paginated(
        &self,
        table: &str,
        page_size: usize,
        page_token: Option<&PageToken>,
        filter: Option<&ConditionCoupling>,
    ) -> DatabaseResult<Page<Document>> {
        (**self)
            .scan_table_paginated(table, page_size, page_token, filter)
            .await
    }

    async fn get_table_names(&self) -> DatabaseResult<Vec<String>> {
        (**self).get_table_names().await
    }

    async fn drop_table(&self, table: &str) -> DatabaseResult<()> {
        (**self).drop_table(table).await
    }
}

/// Factory for backend instances.
#[async_trait]
pub trait DatabaseBackendBuilder {
    type Backend: DatabaseBackend;

    async fn build(self) -> DatabaseResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case::nothing(ReturnItemBehavior::DoNotReturn, None)]
    #[case::old(ReturnItemBehavior::ReturnOldValues, Some(json!({ "v": 1 })))]
    #[case::new(ReturnItemBehavior::ReturnNewValues, Some(json!({ "v": 2 })))]
    fn selects_the_requested_state(
        #[case] behavior: ReturnItemBehavior,
        #[case] expected: Option<serde_json::Value>,
    ) {
        let selected = behavior.select(Some(doc(json!({ "v": 1 }))), Some(doc(json!({ "v": 2 }))));
        assert_eq!(selected, expected.map(doc));
    }
}
