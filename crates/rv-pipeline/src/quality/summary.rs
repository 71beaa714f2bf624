//! Per-day sales summary

use chrono::NaiveDate;
use rv_common::HashKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{median, upsert_by_date, DatedRow};
use crate::error::PipelineResult;
use crate::mart::FactRow;
use crate::vault::satellites::TimeSatellite;
use crate::warehouse::{fetch, Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub sales_date: NaiveDate,
    pub min_total_amount: f64,
    pub max_total_amount: f64,
    pub median_total_amount: f64,
    pub avg_total_amount: f64,
    /// Sum of total amount
    pub volume: f64,
    pub transaction_count: u64,
}

impl DatedRow for SalesSummary {
    fn date(&self) -> NaiveDate {
        self.sales_date
    }
}

/// Summaries for every date the sales resolve to, ascending
pub(crate) fn summarize(sales: &[FactRow], times: &[TimeSatellite]) -> (Vec<SalesSummary>, usize) {
    let dates: HashMap<HashKey, NaiveDate> = times.iter().map(|t| (t.hub_time_key, t.date)).collect();

    let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    let mut undated = 0;
    for sale in sales {
        match sale.time_key.and_then(|k| dates.get(&k)) {
            Some(date) => by_date.entry(*date).or_default().push(sale.total_amount),
            None => undated += 1,
        }
    }

    let rows = by_date
        .into_iter()
        .filter_map(|(sales_date, amounts)| {
            let median_total_amount = median(&amounts)?;
            let volume: f64 = amounts.iter().sum();
            Some(SalesSummary {
                sales_date,
                min_total_amount: amounts.iter().copied().fold(f64::INFINITY, f64::min),
                max_total_amount: amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                median_total_amount,
                avg_total_amount: volume / amounts.len() as f64,
                volume,
                transaction_count: amounts.len() as u64,
            })
        })
        .collect();
    (rows, undated)
}

/// Recompute the summary from `fact_sales` and store it keyed by date
pub async fn summarize_sales(warehouse: &dyn Warehouse) -> PipelineResult<u64> {
    let sales: Vec<FactRow> = fetch(warehouse, Table::FactSales).await?;
    let times: Vec<TimeSatellite> = fetch(warehouse, Table::SatTime).await?;

    let (rows, undated) = summarize(&sales, &times);
    if undated > 0 {
        debug!(undated, "Sales without a resolvable date left out of the summary");
    }
    let days = rows.len();
    let written = upsert_by_date(warehouse, Table::SalesSummary, rows).await?;

    info!(days, total_rows = written, "Sales summary updated");
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn time(key: u128, date: NaiveDate) -> TimeSatellite {
        TimeSatellite {
            hub_time_key: Uuid::from_u128(key),
            effective_from: Utc::now(),
            date,
            year: 2010,
            month: 12,
            day_of_week: 1,
            hash_diff: Uuid::nil(),
            load_datetime: Utc::now(),
            record_source: "test".into(),
        }
    }

    fn sale(time_key: Option<u128>, total: f64) -> FactRow {
        FactRow {
            sale_id: Uuid::new_v4(),
            invoice_no: "1".into(),
            product_key: None,
            customer_key: None,
            time_key: time_key.map(Uuid::from_u128),
            country_key: None,
            quantity: 1,
            unit_price: total,
            total_amount: total,
        }
    }

    #[test]
    fn test_summary_per_day() {
        let d1 = NaiveDate::from_ymd_opt(2010, 12, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2010, 12, 2).unwrap();
        // two timestamps on the same day
        let times = vec![time(1, d2), time(2, d1), time(3, d1)];
        let sales = vec![
            sale(Some(2), 10.0),
            sale(Some(3), 30.0),
            sale(Some(2), 20.0),
            sale(Some(1), 5.0),
            sale(None, 99.0),
        ];

        let (rows, undated) = summarize(&sales, &times);
        assert_eq!(undated, 1);
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.sales_date, d1);
        assert_eq!(first.min_total_amount, 10.0);
        assert_eq!(first.max_total_amount, 30.0);
        assert_eq!(first.median_total_amount, 20.0);
        assert_eq!(first.avg_total_amount, 20.0);
        assert_eq!(first.volume, 60.0);
        assert_eq!(first.transaction_count, 3);

        assert_eq!(rows[1].sales_date, d2);
        assert_eq!(rows[1].volume, 5.0);
    }
}
