//! Data-quality and anomaly tables
//!
//! Anomalies are data, not errors: suspicious rows land in the anomaly
//! tables and feed the daily quality snapshot. The snapshot and the sales
//! summary are keyed by date, so re-running on the same day replaces that
//! day's row and leaves history alone.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::PipelineResult;
use crate::warehouse::{append, fetch, materialize, Table, Warehouse};

pub mod anomaly;
pub mod snapshot;
pub mod summary;

pub use anomaly::{mark_customer_anomalies, mark_invoice_anomalies};
pub use snapshot::{record_quality_snapshot, QualitySnapshot};
pub use summary::{summarize_sales, SalesSummary};

/// A row of a table keyed by calendar date
pub trait DatedRow: Serialize + DeserializeOwned + Send + Sync {
    fn date(&self) -> NaiveDate;
}

/// Replace the rows for the dates present in `fresh`, keep all others,
/// and store the result ordered by date
///
/// Dates newer than everything stored are appended. Only a re-run that
/// touches a stored date rewrites the table, which relies on
/// [`Warehouse::replace`] being atomic.
pub(crate) async fn upsert_by_date<T: DatedRow>(
    warehouse: &dyn Warehouse,
    table: Table,
    mut fresh: Vec<T>,
) -> PipelineResult<u64> {
    let existing: Vec<T> = fetch(warehouse, table).await?;
    fresh.sort_by_key(DatedRow::date);

    let newest_stored = existing.iter().map(DatedRow::date).max();
    let appends_only = match (newest_stored, fresh.first()) {
        (Some(newest), Some(first)) => first.date() > newest,
        _ => true,
    };
    if appends_only {
        append(warehouse, table, &fresh).await?;
        return Ok((existing.len() + fresh.len()) as u64);
    }

    let mut rows: Vec<T> = existing
        .into_iter()
        .filter(|row| !fresh.iter().any(|f| f.date() == row.date()))
        .collect();
    rows.extend(fresh);
    rows.sort_by_key(DatedRow::date);
    Ok(materialize(warehouse, table, &rows).await?)
}

/// Latest row of a date-keyed table
pub async fn latest<T: DatedRow>(warehouse: &dyn Warehouse, table: Table) -> PipelineResult<Option<T>> {
    let rows: Vec<T> = fetch(warehouse, table).await?;
    Ok(rows.into_iter().max_by_key(DatedRow::date))
}

/// Exact median; the mean of the two middle values for an even count
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::{
        ensure_layout, MemoryWarehouse, Row, Statement, WarehouseError, WarehouseResult,
    };
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Day {
        day: NaiveDate,
        value: u64,
    }

    impl DatedRow for Day {
        fn date(&self) -> NaiveDate {
            self.day
        }
    }

    fn day(d: u32, value: u64) -> Day {
        Day {
            day: NaiveDate::from_ymd_opt(2024, 5, d).unwrap(),
            value,
        }
    }

    /// Memory store that keeps the trait's truncate-then-insert `replace`
    /// and can be told to reject inserts
    struct NonAtomicWarehouse {
        inner: MemoryWarehouse,
        reject_inserts: AtomicBool,
    }

    #[async_trait]
    impl Warehouse for NonAtomicWarehouse {
        fn backend(&self) -> &'static str {
            "non-atomic"
        }

        async fn execute(&self, statement: &Statement) -> WarehouseResult<u64> {
            self.inner.execute(statement).await
        }

        async fn query(&self, statement: &Statement) -> WarehouseResult<Vec<Row>> {
            self.inner.query(statement).await
        }

        async fn bulk_insert(&self, table: Table, rows: Vec<Row>) -> WarehouseResult<u64> {
            if self.reject_inserts.load(Ordering::SeqCst) {
                return Err(WarehouseError::Unavailable("insert rejected".into()));
            }
            self.inner.bulk_insert(table, rows).await
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0]), Some(3.0));
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[tokio::test]
    async fn test_upsert_replaces_only_the_same_date() {
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();

        upsert_by_date(&wh, Table::DataQuality, vec![day(1, 10), day(2, 20)]).await.unwrap();
        upsert_by_date(&wh, Table::DataQuality, vec![day(3, 30)]).await.unwrap();
        let written = upsert_by_date(&wh, Table::DataQuality, vec![day(2, 21)]).await.unwrap();
        assert_eq!(written, 3);

        let rows: Vec<Day> = fetch(&wh, Table::DataQuality).await.unwrap();
        assert_eq!(rows, vec![day(1, 10), day(2, 21), day(3, 30)]);
        assert_eq!(latest::<Day>(&wh, Table::DataQuality).await.unwrap(), Some(day(3, 30)));
    }

    #[tokio::test]
    async fn test_new_date_never_truncates_history() {
        let wh = NonAtomicWarehouse {
            inner: MemoryWarehouse::new(),
            reject_inserts: AtomicBool::new(false),
        };
        ensure_layout(&wh).await.unwrap();
        upsert_by_date(&wh, Table::DataQuality, vec![day(1, 10), day(2, 20)]).await.unwrap();

        wh.reject_inserts.store(true, Ordering::SeqCst);
        assert!(upsert_by_date(&wh, Table::DataQuality, vec![day(3, 30)]).await.is_err());

        let rows: Vec<Day> = fetch(&wh, Table::DataQuality).await.unwrap();
        assert_eq!(rows, vec![day(1, 10), day(2, 20)]);
    }
}
