//! Side-effect hooks invoked by backends for auxiliary subsystems.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::{error::DatabaseResult, key::ItemKey};

/// Callbacks run after item creation and table drops.
///
/// A failing `post_insert_item` fails the mutating operation that created the item, even
/// though the write may already be committed. A failing `post_drop_table` is reported as
/// a qualified failure after the items are gone.
#[async_trait]
pub trait ItemHooks: Send + Sync + Debug {
    /// Called after an item is created for the first time.
    async fn post_insert_item(&self, table: &str, key: &ItemKey) -> DatabaseResult<()>;

    /// Called after every item of a table has been deleted.
    async fn post_drop_table(&self, table: &str) -> DatabaseResult<()>;
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl ItemHooks for NoopHooks {
    async fn post_insert_item(&self, _table: &str, _key: &ItemKey) -> DatabaseResult<()> {
        Ok(())
    }

    async fn post_drop_table(&self, _table: &str) -> DatabaseResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<H: ItemHooks + ?Sized> ItemHooks for Arc<H> {
    async fn post_insert_item(&self, table: &str, key: &ItemKey) -> DatabaseResult<()> {
        (**self).post_insert_item(table, key).await
    }

    async fn post_drop_table(&self, table: &str) -> DatabaseResult<()> {
        (**self).post_drop_table(table).await
    }
}

/// Shared, type-erased hooks as stored by backends.
pub type SharedHooks = Arc<dyn ItemHooks>;

pub fn noop_hooks() -> SharedHooks {
    Arc::new(NoopHooks)
}
