//! Daily data-quality snapshot

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::anomaly::{CustomerAnomaly, InvoiceAnomaly};
use super::{upsert_by_date, DatedRow};
use crate::error::PipelineResult;
use crate::warehouse::{fetch, Statement, Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub check_date: NaiveDate,
    pub missing_customer_id_ratio: f64,
    pub anomaly_unit_price_count: u64,
    pub anomaly_quantity_count: u64,
    pub sale_count: u64,
    pub return_count: u64,
    pub missing_customer_count: u64,
}

impl DatedRow for QualitySnapshot {
    fn date(&self) -> NaiveDate {
        self.check_date
    }
}

/// Share of invoice lines attributed to the unknown customer
pub fn missing_customer_ratio(missing: u64, sales: u64, returns: u64) -> f64 {
    let total = sales + returns;
    if total == 0 {
        0.0
    } else {
        missing as f64 / total as f64
    }
}

async fn count(warehouse: &dyn Warehouse, table: Table) -> PipelineResult<u64> {
    Ok(warehouse.query(&Statement::Select(table)).await?.len() as u64)
}

/// Compute the snapshot for `check_date` from the current fact and anomaly
/// tables and store it, replacing any earlier snapshot for the same date
pub async fn record_quality_snapshot(
    warehouse: &dyn Warehouse,
    check_date: NaiveDate,
) -> PipelineResult<QualitySnapshot> {
    let sale_count = count(warehouse, Table::FactSales).await?;
    let return_count = count(warehouse, Table::FactSaleReturns).await?;
    let customer_anomalies: Vec<CustomerAnomaly> =
        fetch(warehouse, Table::AnomalyCustomerInvoices).await?;
    let invoice_anomalies: Vec<InvoiceAnomaly> =
        fetch(warehouse, Table::AnomalyInvoices).await?;

    let missing_customer_count = customer_anomalies.len() as u64;
    let snapshot = QualitySnapshot {
        check_date,
        missing_customer_id_ratio: missing_customer_ratio(missing_customer_count, sale_count, return_count),
        anomaly_unit_price_count: invoice_anomalies.iter().filter(|a| a.anomaly_unit_price).count() as u64,
        anomaly_quantity_count: invoice_anomalies.iter().filter(|a| a.anomaly_quantity).count() as u64,
        sale_count,
        return_count,
        missing_customer_count,
    };

    upsert_by_date(warehouse, Table::DataQuality, vec![snapshot.clone()]).await?;
    info!(
        %check_date,
        ratio = snapshot.missing_customer_id_ratio,
        unit_price_anomalies = snapshot.anomaly_unit_price_count,
        quantity_anomalies = snapshot.anomaly_quantity_count,
        "Quality snapshot recorded"
    );
    Ok(snapshot)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::{ensure_layout, MemoryWarehouse};

    #[test]
    fn test_ratio() {
        assert_eq!(missing_customer_ratio(6, 100, 20), 0.05);
        assert_eq!(missing_customer_ratio(0, 0, 0), 0.0);
        assert_eq!(missing_customer_ratio(3, 0, 3), 1.0);
    }

    #[tokio::test]
    async fn test_same_day_rerun_replaces_row() {
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        record_quality_snapshot(&wh, day1).await.unwrap();
        record_quality_snapshot(&wh, day2).await.unwrap();
        record_quality_snapshot(&wh, day2).await.unwrap();

        let rows: Vec<QualitySnapshot> = fetch(&wh, Table::DataQuality).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.check_date).collect::<Vec<_>>(), vec![day1, day2]);
        assert_eq!(rows[1].missing_customer_id_ratio, 0.0);
    }
}
