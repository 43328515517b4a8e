//! Destination store trait
//!
//! The loader writes through a [`DestinationStore`]: a set of tables
//! addressed by name, each with its own column set. Implementations live in
//! the runtime crate.

use async_trait::async_trait;

use crate::error::Result;
use crate::table::Table;

/// Tabular store addressed by table name
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Whether a table with this name exists
    async fn exists(&self, table: &str) -> Result<bool>;

    /// Number of rows currently in the table
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Drop the table if it exists
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Create the table with a schema derived from `data` and insert its rows
    async fn create(&self, table: &str, data: &Table) -> Result<()>;

    /// Insert `data`'s rows into an existing table
    async fn append(&self, table: &str, data: &Table) -> Result<()>;

    /// Read the table back, at most `limit` rows; `None` if it does not exist
    async fn read(&self, table: &str, limit: Option<usize>) -> Result<Option<Table>>;
}
