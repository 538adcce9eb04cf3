//! Lazy table resolution and on-demand creation.

use aws_sdk_dynamodb::{
    Client,
    types::{
        AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
        TableDescription, TableStatus,
    },
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use dblayer_core::error::{DatabaseError, DatabaseResult};

use crate::error::{build_error, map_sdk_error};

/// How table creation is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCreation {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for TableCreation {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// The cached per-table handle: the table name and its partition key attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub name: String,
    pub key_attribute: String,
}

impl TableHandle {
    /// Fails with `BadRequest` when `key_name` is not the table's partition key.
    pub fn check_key_name(&self, key_name: &str) -> DatabaseResult<()> {
        if self.key_attribute == key_name {
            Ok(())
        } else {
            Err(DatabaseError::BadRequest(format!(
                "table {} is keyed by {}, not {key_name}",
                self.name, self.key_attribute
            )))
        }
    }
}

fn hash_key(table: &str, description: &TableDescription) -> DatabaseResult<String> {
    description
        .key_schema()
        .iter()
        .find(|element| element.key_type() == &KeyType::Hash)
        .map(|element| element.attribute_name().to_string())
        .ok_or_else(|| {
            DatabaseError::InternalServerError(format!("table {table} has no partition key"))
        })
}

/// Describes a table. A missing table is `None`.
pub async fn describe_table(
    client: &Client,
    table: &str,
) -> DatabaseResult<Option<TableDescription>> {
    match client.describe_table().table_name(table).send().await {
        Ok(output) => Ok(output.table),
        Err(error) => match map_sdk_error(error) {
            DatabaseError::NotFound(_) => Ok(None),
            other => Err(other),
        },
    }
}

/// Resolves an existing table.
pub async fn load_table(client: &Client, table: &str) -> DatabaseResult<Option<TableHandle>> {
    describe_table(client, table)
        .await?
        .map(|description| -> DatabaseResult<TableHandle> {
            Ok(TableHandle {
                name: table.to_string(),
                key_attribute: hash_key(table, &description)?,
            })
        })
        .transpose()
}

/// Resolves a table, creating it with a string partition key named `key_attribute` when
/// it does not exist, and waits until it is active.
pub async fn ensure_table(
    client: &Client,
    table: &str,
    key_attribute: &str,
    creation: TableCreation,
) -> DatabaseResult<TableHandle> {
    if let Some(description) = describe_table(client, table).await?
        && description.table_status() == Some(&TableStatus::Active)
    {
        return Ok(TableHandle {
            name: table.to_string(),
            key_attribute: hash_key(table, &description)?,
        });
    }

    debug!(table, key_attribute, "creating table");
    let created = client
        .create_table()
        .table_name(table)
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(key_attribute)
                .key_type(KeyType::Hash)
                .build()
                .map_err(build_error)?,
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(key_attribute)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(build_error)?,
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await;

    match created.map_err(map_sdk_error) {
        Ok(_) => {}
        // Another writer is creating (or already created) the table.
        Err(DatabaseError::Conflict(message)) => {
            debug!(table, %message, "table creation already in progress");
        }
        Err(error) => return Err(error),
    }

    wait_until_active(client, table, creation).await
}

async fn wait_until_active(
    client: &Client,
    table: &str,
    creation: TableCreation,
) -> DatabaseResult<TableHandle> {
    let deadline = Instant::now() + creation.timeout;

    loop {
        if let Some(description) = describe_table(client, table).await?
            && description.table_status() == Some(&TableStatus::Active)
        {
            debug!(table, "table is active");
            return Ok(TableHandle {
                name: table.to_string(),
                key_attribute: hash_key(table, &description)?,
            });
        }

        if Instant::now() >= deadline {
            return Err(DatabaseError::ServiceUnavailable(format!(
                "table {table} did not become active within {}s",
                creation.timeout.as_secs()
            )));
        }
        tokio::time::sleep(creation.poll_interval).await;
    }
}
