//! Data Vault loaders
//!
//! Hubs, links and satellites share one merge rule: project candidates from
//! the staged table, then insert only those whose merge key the destination
//! does not already hold. Nothing is ever updated or deleted, so re-running a
//! load over the same staged data inserts zero rows.

use rv_common::HashKey;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::warehouse::{append, fetch, Table, Warehouse};

pub mod hubs;
pub mod links;
pub mod satellites;

pub use hubs::{load_hub, HubKind};
pub use links::{load_link, LinkKind, LinkRecord};
pub use satellites::{load_satellite, SatelliteKind};

/// A row of a vault table with the key it merges on
pub trait VaultRecord: Serialize + DeserializeOwned + Send + Sync {
    fn merge_key(&self) -> HashKey;
}

/// Counts reported by one loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadReport {
    /// Distinct candidates projected from the staged table
    pub candidates: usize,
    pub inserted: usize,
    /// Candidates the destination already held
    pub skipped: usize,
}

impl LoadReport {
    pub(crate) fn new(candidates: usize, inserted: usize) -> Self {
        Self {
            candidates,
            inserted,
            skipped: candidates.saturating_sub(inserted),
        }
    }
}

/// Keys currently present in a vault table
pub async fn existing_keys<T: VaultRecord>(
    warehouse: &dyn Warehouse,
    table: Table,
) -> PipelineResult<HashSet<HashKey>> {
    Ok(fetch::<T>(warehouse, table)
        .await?
        .iter()
        .map(VaultRecord::merge_key)
        .collect())
}

/// Insert the candidates whose merge key is absent from `table`
///
/// Duplicate candidates within the batch collapse to their first occurrence.
pub async fn insert_missing<T: VaultRecord>(
    warehouse: &dyn Warehouse,
    table: Table,
    candidates: Vec<T>,
) -> PipelineResult<LoadReport> {
    let mut seen = existing_keys::<T>(warehouse, table).await?;
    let mut distinct = HashSet::with_capacity(candidates.len());
    let mut fresh = Vec::new();

    for candidate in candidates {
        let key = candidate.merge_key();
        if !distinct.insert(key) {
            continue;
        }
        if seen.insert(key) {
            fresh.push(candidate);
        }
    }

    append(warehouse, table, &fresh).await?;

    let report = LoadReport::new(distinct.len(), fresh.len());
    info!(
        table = %table,
        candidates = report.candidates,
        inserted = report.inserted,
        skipped = report.skipped,
        "Vault load complete"
    );
    Ok(report)
}

/// Fail when any key is missing from its hub
pub async fn require_hub_keys<T, I>(
    warehouse: &dyn Warehouse,
    hub: Table,
    referrer: Table,
    keys: I,
) -> PipelineResult<()>
where
    T: VaultRecord,
    I: IntoIterator<Item = HashKey>,
{
    let present = existing_keys::<T>(warehouse, hub).await?;
    let mut missing: Vec<HashKey> = keys.into_iter().filter(|k| !present.contains(k)).collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    missing.dedup();
    Err(PipelineError::Invariant(format!(
        "{} references {} key(s) absent from {} (first: {})",
        referrer,
        missing.len(),
        hub,
        missing[0]
    )))
}
