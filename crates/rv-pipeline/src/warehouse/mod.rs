//! Analytical store capability
//!
//! The pipeline never talks to a concrete database. Every unit receives a
//! [`Warehouse`] handle through its context and issues three kinds of calls:
//! DDL/DML statements without results, result-returning reads, and bulk
//! appends of structured rows.
//!
//! Only per-statement atomicity is assumed. [`Warehouse::replace`] is the
//! materialize-then-swap operation used by every full rebuild; its default
//! body is truncate followed by insert, which can leave the table empty if
//! the insert fails. Backends that can do better override it.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod postgres;
pub mod table;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;
pub use table::{Layer, Table};

/// One structured record as stored in the warehouse
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Warehouse operation errors
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Warehouse query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Row encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Table {0} does not exist")]
    TableNotFound(Table),

    #[error("Statement {0:?} is not valid for this call")]
    InvalidStatement(Statement),

    #[error("Row for {table} is not a JSON object")]
    NotAnObject { table: Table },

    #[error("Warehouse unavailable: {0}")]
    Unavailable(String),
}

impl WarehouseError {
    /// Whether retrying the same statement may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            WarehouseError::Unavailable(_) => true,
            WarehouseError::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Statements understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statement {
    /// Create the table (and its schema) when absent
    CreateTable(Table),
    /// Remove every row, keeping the table
    Truncate(Table),
    /// Read every row in insertion order
    Select(Table),
}

impl Statement {
    pub fn table(&self) -> Table {
        match self {
            Statement::CreateTable(t) | Statement::Truncate(t) | Statement::Select(t) => *t,
        }
    }
}

/// Analytical store client
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend label for logs
    fn backend(&self) -> &'static str;

    /// Execute a statement that returns no rows; yields affected row count
    async fn execute(&self, statement: &Statement) -> WarehouseResult<u64>;

    /// Execute a statement that returns rows
    async fn query(&self, statement: &Statement) -> WarehouseResult<Vec<Row>>;

    /// Append rows to a table in one statement
    async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64>;

    /// Replace the full contents of a table
    ///
    /// Backends must override this with an atomic swap: date-keyed tables
    /// carry history that exists nowhere else. The default truncates and then
    /// inserts, so a failed insert leaves the table empty.
    async fn replace(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
        self.execute(&Statement::Truncate(table)).await?;
        self.bulk_insert(table, rows).await
    }
}

/// Create every table of the layout if missing
pub async fn ensure_layout(warehouse: &dyn Warehouse) -> WarehouseResult<()> {
    for table in Table::ALL {
        warehouse.execute(&Statement::CreateTable(table)).await?;
    }
    Ok(())
}

/// Serialize a typed record into a warehouse row
pub fn to_row<T: Serialize>(table: Table, record: &T) -> WarehouseResult<Row> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(WarehouseError::NotAnObject { table }),
    }
}

/// Read a whole table as typed records
pub async fn fetch<T: DeserializeOwned>(
    warehouse: &dyn Warehouse,
    table: Table,
) -> WarehouseResult<Vec<T>> {
    warehouse
        .query(&Statement::Select(table))
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(Into::into))
        .collect()
}

/// Append typed records
pub async fn append<T: Serialize>(
    warehouse: &dyn Warehouse,
    table: Table,
    records: &[T],
) -> WarehouseResult<u64> {
    if records.is_empty() {
        return Ok(0);
    }
    let rows = records
        .iter()
        .map(|r| to_row(table, r))
        .collect::<WarehouseResult<Vec<_>>>()?;
    warehouse.bulk_insert(table, rows).await
}

/// Replace a table with typed records
pub async fn materialize<T: Serialize>(
    warehouse: &dyn Warehouse,
    table: Table,
    records: &[T],
) -> WarehouseResult<u64> {
    let rows = records
        .iter()
        .map(|r| to_row(table, r))
        .collect::<WarehouseResult<Vec<_>>>()?;
    warehouse.replace(table, rows).await
}
