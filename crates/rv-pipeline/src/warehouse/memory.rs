//! In-process warehouse
//!
//! Keeps every table as an ordered vector of rows behind one lock. Used by
//! the test suite and by one-shot CLI runs that do not need durability.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Row, Statement, Table, Warehouse, WarehouseError, WarehouseResult};

#[derive(Default)]
pub struct MemoryWarehouse {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of a table, `None` when the table was never created
    pub async fn row_count(&self, table: Table) -> Option<usize> {
        self.tables.read().await.get(&table).map(Vec::len)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, statement: &Statement) -> WarehouseResult<u64> {
        let mut tables = self.tables.write().await;
        match *statement {
            Statement::CreateTable(table) => {
                tables.entry(table).or_default();
                Ok(0)
            },
            Statement::Truncate(table) => {
                let rows = tables
                    .get_mut(&table)
                    .ok_or(WarehouseError::TableNotFound(table))?;
                let removed = rows.len() as u64;
                rows.clear();
                Ok(removed)
            },
            Statement::Select(_) => Err(WarehouseError::InvalidStatement(*statement)),
        }
    }

    async fn query(&self, statement: &Statement) -> WarehouseResult<Vec<Row>> {
        match *statement {
            Statement::Select(table) => self
                .tables
                .read()
                .await
                .get(&table)
                .cloned()
                .ok_or(WarehouseError::TableNotFound(table)),
            _ => Err(WarehouseError::InvalidStatement(*statement)),
        }
    }

    async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
        let mut tables = self.tables.write().await;
        let target = tables
            .get_mut(&table)
            .ok_or(WarehouseError::TableNotFound(table))?;
        let inserted = rows.len() as u64;
        target.extend(rows);
        Ok(inserted)
    }

    async fn replace(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
        let mut tables = self.tables.write().await;
        let target = tables
            .get_mut(&table)
            .ok_or(WarehouseError::TableNotFound(table))?;
        let inserted = rows.len() as u64;
        *target = rows;
        Ok(inserted)
    }
}
