//! Satellite loaders
//!
//! Satellites are append-only descriptive snapshots keyed by hub key. Each
//! row carries a hash-diff of its payload so a loader can tell a repeated
//! snapshot from a changed one. What happens to a changed payload depends on
//! [`SatellitePolicy`].

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rv_common::hashkey::{attribute, derive_key};
use rv_common::{HashKey, ReturnStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use super::hubs::{require_keys, HubKind};
use super::{LoadReport, VaultRecord};
use crate::config::SatellitePolicy;
use crate::error::PipelineResult;
use crate::staging::StagedRecord;
use crate::warehouse::{append, fetch, Table, Warehouse};

/// A satellite row: merges on its hub key, versions on its hash-diff
pub trait SatelliteRecord: VaultRecord {
    fn hash_diff(&self) -> HashKey;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSatellite {
    pub hub_invoice_key: HashKey,
    pub effective_from: DateTime<Utc>,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_amount: f64,
    pub return_status: ReturnStatus,
    pub hash_diff: HashKey,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSatellite {
    pub hub_product_key: HashKey,
    pub effective_from: DateTime<Utc>,
    pub description: Option<String>,
    pub hash_diff: HashKey,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSatellite {
    pub hub_time_key: HashKey,
    pub effective_from: DateTime<Utc>,
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    /// ISO weekday, Monday = 1
    pub day_of_week: u32,
    pub hash_diff: HashKey,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

macro_rules! satellite_keys {
    ($ty:ty, $key:ident) => {
        impl VaultRecord for $ty {
            fn merge_key(&self) -> HashKey {
                self.$key
            }
        }

        impl SatelliteRecord for $ty {
            fn hash_diff(&self) -> HashKey {
                self.hash_diff
            }
        }
    };
}

satellite_keys!(InvoiceSatellite, hub_invoice_key);
satellite_keys!(ProductSatellite, hub_product_key);
satellite_keys!(TimeSatellite, hub_time_key);

impl From<&StagedRecord> for InvoiceSatellite {
    fn from(r: &StagedRecord) -> Self {
        let hash_diff = derive_key([
            r.quantity.to_string(),
            r.unit_price.to_string(),
            r.total_amount.to_string(),
            r.return_status.as_str().to_string(),
        ]);
        Self {
            hub_invoice_key: r.hub_invoice_key,
            effective_from: r.load_datetime,
            quantity: r.quantity,
            unit_price: r.unit_price,
            total_amount: r.total_amount,
            return_status: r.return_status,
            hash_diff,
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for ProductSatellite {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_product_key: r.hub_product_key,
            effective_from: r.load_datetime,
            description: r.description.clone(),
            hash_diff: derive_key([attribute(r.description.as_deref())]),
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for TimeSatellite {
    fn from(r: &StagedRecord) -> Self {
        let date = r.invoice_date.date();
        let year = date.year();
        let month = date.month();
        let day_of_week = date.weekday().number_from_monday();
        Self {
            hub_time_key: r.hub_time_key,
            effective_from: r.load_datetime,
            date,
            year,
            month,
            day_of_week,
            hash_diff: derive_key([
                date.to_string(),
                year.to_string(),
                month.to_string(),
                day_of_week.to_string(),
            ]),
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SatelliteKind {
    Invoice,
    Product,
    Time,
}

impl SatelliteKind {
    pub const ALL: [SatelliteKind; 3] = [SatelliteKind::Invoice, SatelliteKind::Product, SatelliteKind::Time];

    pub fn table(&self) -> Table {
        match self {
            SatelliteKind::Invoice => Table::SatInvoice,
            SatelliteKind::Product => Table::SatProduct,
            SatelliteKind::Time => Table::SatTime,
        }
    }

    pub fn hub(&self) -> HubKind {
        match self {
            SatelliteKind::Invoice => HubKind::Invoice,
            SatelliteKind::Product => HubKind::Product,
            SatelliteKind::Time => HubKind::Time,
        }
    }
}

/// Every (hub key, hash-diff) pair already stored, plus the set of known keys
fn stored_history<S: SatelliteRecord>(stored: &[S]) -> (HashSet<(HashKey, HashKey)>, HashSet<HashKey>) {
    let versions = stored.iter().map(|s| (s.merge_key(), s.hash_diff())).collect();
    let keys = stored.iter().map(VaultRecord::merge_key).collect();
    (versions, keys)
}

/// Decide which candidates to append
///
/// Candidates are first made distinct on (hub key, hash-diff). A pair that
/// already exists anywhere in the stored history is never appended again, so
/// loading the same input twice inserts nothing. Returns the rows to insert,
/// the distinct candidate count and the number of changed payloads that were
/// dropped.
pub(crate) fn select_versions<S: SatelliteRecord>(
    stored: &[S],
    candidates: Vec<S>,
    policy: SatellitePolicy,
) -> (Vec<S>, usize, usize) {
    let (versions, known) = stored_history(stored);
    let mut distinct = HashSet::new();
    let mut fresh = Vec::new();
    let mut drifted = 0;

    for candidate in candidates {
        let key = candidate.merge_key();
        let hash = candidate.hash_diff();
        if !distinct.insert((key, hash)) || versions.contains(&(key, hash)) {
            continue;
        }
        match (known.contains(&key), policy) {
            (true, SatellitePolicy::FirstSeen) => drifted += 1,
            _ => fresh.push(candidate),
        }
    }

    (fresh, distinct.len(), drifted)
}

async fn load<S>(
    warehouse: &dyn Warehouse,
    kind: SatelliteKind,
    staged: &[StagedRecord],
    policy: SatellitePolicy,
) -> PipelineResult<LoadReport>
where
    S: SatelliteRecord + for<'a> From<&'a StagedRecord>,
{
    let table = kind.table();
    let candidates: Vec<S> = staged.iter().map(S::from).collect();
    require_keys(warehouse, kind.hub(), table, candidates.iter().map(VaultRecord::merge_key)).await?;

    let stored: Vec<S> = fetch(warehouse, table).await?;
    let (fresh, candidate_count, drifted) = select_versions(&stored, candidates, policy);
    if drifted > 0 {
        debug!(table = %table, drifted, "Ignoring changed payloads for known keys");
    }

    append(warehouse, table, &fresh).await?;

    let report = LoadReport::new(candidate_count, fresh.len());
    info!(
        table = %table,
        candidates = report.candidates,
        inserted = report.inserted,
        skipped = report.skipped,
        drifted,
        ?policy,
        "Satellite load complete"
    );
    Ok(report)
}

/// Append satellite snapshots according to the configured policy
pub async fn load_satellite(
    warehouse: &dyn Warehouse,
    kind: SatelliteKind,
    staged: &[StagedRecord],
    policy: SatellitePolicy,
) -> PipelineResult<LoadReport> {
    match kind {
        SatelliteKind::Invoice => load::<InvoiceSatellite>(warehouse, kind, staged, policy).await,
        SatelliteKind::Product => load::<ProductSatellite>(warehouse, kind, staged, policy).await,
        SatelliteKind::Time => load::<TimeSatellite>(warehouse, kind, staged, policy).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::BusinessRules;
    use crate::extract::RawTransaction;
    use crate::staging::{prepare, LoadStamp};
    use crate::vault::hubs::load_hub;
    use crate::warehouse::{ensure_layout, MemoryWarehouse};
    use chrono::NaiveDateTime;

    fn staged(description: &str) -> Vec<StagedRecord> {
        let raw = RawTransaction {
            invoice_no: Some("536365".into()),
            stock_code: Some("84406B".into()),
            description: Some(description.into()),
            quantity: Some(8),
            invoice_date: NaiveDateTime::parse_from_str("2010-12-01 08:26:00", "%Y-%m-%d %H:%M:%S").ok(),
            unit_price: Some(2.75),
            customer_id: Some(17850),
            country: Some("United Kingdom".into()),
            total_amount: Some(22.0),
        };
        let stamp = LoadStamp {
            load_datetime: Utc::now(),
            record_source: "test".into(),
        };
        prepare(&[raw], &BusinessRules::default(), &stamp).unwrap().records
    }

    async fn warehouse_with_hubs(rows: &[StagedRecord]) -> MemoryWarehouse {
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();
        for kind in HubKind::ALL {
            load_hub(&wh, kind, rows).await.unwrap();
        }
        wh
    }

    #[test]
    fn test_time_payload() {
        let rows = staged("x");
        let sat = TimeSatellite::from(&rows[0]);
        assert_eq!(sat.year, 2010);
        assert_eq!(sat.month, 12);
        // 2010-12-01 was a Wednesday
        assert_eq!(sat.day_of_week, 3);
    }

    #[tokio::test]
    async fn test_first_seen_drops_changed_payload() {
        let original = staged("CREAM CUPID HEARTS COAT HANGER");
        let wh = warehouse_with_hubs(&original).await;

        let first = load_satellite(&wh, SatelliteKind::Product, &original, SatellitePolicy::FirstSeen)
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);

        let renamed = staged("CREAM CUPID HEARTS HANGER");
        let second = load_satellite(&wh, SatelliteKind::Product, &renamed, SatellitePolicy::FirstSeen)
            .await
            .unwrap();
        assert_eq!(second, LoadReport { candidates: 1, inserted: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn test_versioned_appends_changed_payload_once() {
        let original = staged("CREAM CUPID HEARTS COAT HANGER");
        let wh = warehouse_with_hubs(&original).await;
        load_satellite(&wh, SatelliteKind::Product, &original, SatellitePolicy::Versioned)
            .await
            .unwrap();

        let renamed = staged("CREAM CUPID HEARTS HANGER");
        let changed = load_satellite(&wh, SatelliteKind::Product, &renamed, SatellitePolicy::Versioned)
            .await
            .unwrap();
        assert_eq!(changed.inserted, 1);

        let repeat = load_satellite(&wh, SatelliteKind::Product, &renamed, SatellitePolicy::Versioned)
            .await
            .unwrap();
        assert_eq!(repeat.inserted, 0);
        assert_eq!(wh.row_count(Table::SatProduct).await, Some(2));
    }

    #[tokio::test]
    async fn test_versioned_rerun_of_mixed_batch_inserts_nothing() {
        let mut rows = staged("A");
        let mut other = rows[0].clone();
        other.description = Some("B".into());
        rows.push(other);
        let wh = warehouse_with_hubs(&rows).await;

        let first = load_satellite(&wh, SatelliteKind::Product, &rows, SatellitePolicy::Versioned)
            .await
            .unwrap();
        assert_eq!(first.inserted, 2);

        for _ in 0..2 {
            let rerun = load_satellite(&wh, SatelliteKind::Product, &rows, SatellitePolicy::Versioned)
                .await
                .unwrap();
            assert_eq!(rerun, LoadReport { candidates: 2, inserted: 0, skipped: 2 });
        }
        assert_eq!(wh.row_count(Table::SatProduct).await, Some(2));
    }

    #[test]
    fn test_known_payload_is_not_drift() {
        let mut rows = staged("A");
        let mut other = rows[0].clone();
        other.description = Some("B".into());
        rows.push(other);
        let stored: Vec<ProductSatellite> = rows.iter().map(ProductSatellite::from).collect();
        let candidates: Vec<ProductSatellite> = rows.iter().map(ProductSatellite::from).collect();

        let (fresh, distinct, drifted) = select_versions(&stored, candidates, SatellitePolicy::FirstSeen);
        assert!(fresh.is_empty());
        assert_eq!(distinct, 2);
        assert_eq!(drifted, 0);
    }

    #[tokio::test]
    async fn test_distinct_payloads_for_new_key_are_all_kept() {
        let mut rows = staged("A");
        let mut other = rows[0].clone();
        other.description = Some("B".into());
        rows.push(other);
        let wh = warehouse_with_hubs(&rows).await;

        let report = load_satellite(&wh, SatelliteKind::Product, &rows, SatellitePolicy::FirstSeen)
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);
    }

    #[tokio::test]
    async fn test_satellite_without_hub_fails() {
        let rows = staged("x");
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();
        let err = load_satellite(&wh, SatelliteKind::Invoice, &rows, SatellitePolicy::FirstSeen)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Invariant(_)));
    }
}
