//! PostgreSQL-backed warehouse
//!
//! Each logical table is a physical table `<layer>.<name>` holding one JSONB
//! document per row plus a sequence column that preserves insertion order.
//! Table names come from the closed [`Table`] enum, never from input.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row as _;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{Row, Statement, Table, Warehouse, WarehouseError, WarehouseResult};
use crate::config::DatabaseConfig;

#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool using the database section of the config
    pub async fn connect(config: &DatabaseConfig) -> WarehouseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Warehouse connection pool established");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn insert_sql(table: Table) -> String {
        format!(
            "INSERT INTO {} (record) SELECT value FROM jsonb_array_elements($1)",
            table.qualified_name()
        )
    }
}

fn rows_to_array(rows: Vec<Row>) -> serde_json::Value {
    serde_json::Value::Array(rows.into_iter().map(serde_json::Value::Object).collect())
}

#[async_trait]
impl Warehouse for PgWarehouse {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn execute(&self, statement: &Statement) -> WarehouseResult<u64> {
        match *statement {
            Statement::CreateTable(table) => {
                sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", table.layer().schema()))
                    .execute(&self.pool)
                    .await?;
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL PRIMARY KEY, record JSONB NOT NULL)",
                    table.qualified_name()
                ))
                .execute(&self.pool)
                .await?;
                Ok(0)
            },
            Statement::Truncate(table) => {
                let result = sqlx::query(&format!("TRUNCATE TABLE {}", table.qualified_name()))
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            },
            Statement::Select(_) => Err(WarehouseError::InvalidStatement(*statement)),
        }
    }

    #[instrument(skip(self))]
    async fn query(&self, statement: &Statement) -> WarehouseResult<Vec<Row>> {
        let Statement::Select(table) = *statement else {
            return Err(WarehouseError::InvalidStatement(*statement));
        };

        let records = sqlx::query(&format!(
            "SELECT record FROM {} ORDER BY seq",
            table.qualified_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!(table = %table, rows = records.len(), "Fetched rows");

        records
            .into_iter()
            .map(|record| -> WarehouseResult<Row> {
                match record.try_get::<serde_json::Value, _>("record")? {
                    serde_json::Value::Object(map) => Ok(map),
                    _ => Err(WarehouseError::NotAnObject { table }),
                }
            })
            .collect()
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&Self::insert_sql(table))
            .bind(rows_to_array(rows))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Truncate and insert inside one transaction, so readers never observe
    /// the empty intermediate state
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn replace(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("TRUNCATE TABLE {}", table.qualified_name()))
            .execute(&mut *tx)
            .await?;

        let inserted = if rows.is_empty() {
            0
        } else {
            sqlx::query(&Self::insert_sql(table))
                .bind(rows_to_array(rows))
                .execute(&mut *tx)
                .await?
                .rows_affected()
        };

        tx.commit().await?;
        Ok(inserted)
    }
}
