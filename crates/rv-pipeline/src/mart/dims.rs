//! Dimension tables
//!
//! Each dimension reads the current hub rows plus the latest satellite
//! version per key and replaces its table in full.

use chrono::NaiveDate;
use rv_common::HashKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::BusinessRules;
use crate::error::PipelineResult;
use crate::vault::hubs::{CountryHub, CustomerHub, ProductHub, TimeHub};
use crate::vault::satellites::{ProductSatellite, SatelliteRecord, TimeSatellite};
use crate::vault::{LinkKind, LinkRecord};
use crate::warehouse::{fetch, materialize, Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDim {
    pub product_key: HashKey,
    pub stock_code: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDim {
    pub customer_key: HashKey,
    pub customer_id: u64,
    pub country_key: Option<HashKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDim {
    pub time_key: HashKey,
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub day_of_week: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryDim {
    pub country_key: HashKey,
    pub country_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimKind {
    Product,
    Customer,
    Time,
    Country,
}

impl DimKind {
    pub fn table(&self) -> Table {
        match self {
            DimKind::Product => Table::DimProduct,
            DimKind::Customer => Table::DimCustomer,
            DimKind::Time => Table::DimTime,
            DimKind::Country => Table::DimCountry,
        }
    }
}

/// Latest satellite row per hub key (append-only, so the last one read)
fn latest<S: SatelliteRecord>(rows: Vec<S>) -> HashMap<HashKey, S> {
    rows.into_iter().map(|s| (s.merge_key(), s)).collect()
}

pub(crate) fn product_dims(hubs: &[ProductHub], sats: Vec<ProductSatellite>) -> Vec<ProductDim> {
    let latest = latest(sats);
    hubs.iter()
        .filter_map(|h| {
            latest.get(&h.hub_product_key).map(|s| ProductDim {
                product_key: h.hub_product_key,
                stock_code: h.stock_code.clone(),
                description: s.description.clone(),
            })
        })
        .collect()
}

/// Known customers only, one row per customer-country link
pub(crate) fn customer_dims(
    hubs: &[CustomerHub],
    links: &[LinkRecord],
    unknown_customer_id: u64,
) -> Vec<CustomerDim> {
    let mut countries: HashMap<HashKey, Vec<HashKey>> = HashMap::new();
    for link in links {
        countries.entry(link.left_hub_key).or_default().push(link.right_hub_key);
    }

    let mut dims = Vec::new();
    for hub in hubs.iter().filter(|h| h.customer_id != unknown_customer_id) {
        match countries.get(&hub.hub_customer_key) {
            Some(keys) => dims.extend(keys.iter().map(|&country| CustomerDim {
                customer_key: hub.hub_customer_key,
                customer_id: hub.customer_id,
                country_key: Some(country),
            })),
            None => dims.push(CustomerDim {
                customer_key: hub.hub_customer_key,
                customer_id: hub.customer_id,
                country_key: None,
            }),
        }
    }
    dims
}

pub(crate) fn time_dims(hubs: &[TimeHub], sats: Vec<TimeSatellite>) -> Vec<TimeDim> {
    let latest = latest(sats);
    hubs.iter()
        .filter_map(|h| {
            latest.get(&h.hub_time_key).map(|s| TimeDim {
                time_key: h.hub_time_key,
                date: s.date,
                year: s.year,
                month: s.month,
                day_of_week: s.day_of_week,
            })
        })
        .collect()
}

/// Rebuild one dimension table
pub async fn build_dim(warehouse: &dyn Warehouse, kind: DimKind, rules: &BusinessRules) -> PipelineResult<u64> {
    let table = kind.table();
    let written = match kind {
        DimKind::Product => {
            let hubs: Vec<ProductHub> = fetch(warehouse, Table::HubProduct).await?;
            let sats: Vec<ProductSatellite> = fetch(warehouse, Table::SatProduct).await?;
            materialize(warehouse, table, &product_dims(&hubs, sats)).await?
        },
        DimKind::Customer => {
            let hubs: Vec<CustomerHub> = fetch(warehouse, Table::HubCustomer).await?;
            let links: Vec<LinkRecord> = fetch(warehouse, LinkKind::CustomerCountry.table()).await?;
            materialize(warehouse, table, &customer_dims(&hubs, &links, rules.unknown_customer_id)).await?
        },
        DimKind::Time => {
            let hubs: Vec<TimeHub> = fetch(warehouse, Table::HubTime).await?;
            let sats: Vec<TimeSatellite> = fetch(warehouse, Table::SatTime).await?;
            materialize(warehouse, table, &time_dims(&hubs, sats)).await?
        },
        DimKind::Country => {
            let hubs: Vec<CountryHub> = fetch(warehouse, Table::HubCountry).await?;
            let rows: Vec<CountryDim> = hubs
                .into_iter()
                .map(|h| CountryDim {
                    country_key: h.hub_country_key,
                    country_name: h.country,
                })
                .collect();
            materialize(warehouse, table, &rows).await?
        },
    };

    info!(table = %table, rows = written, "Dimension rebuilt");
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn customer(id: u64, key: u128) -> CustomerHub {
        CustomerHub {
            hub_customer_key: Uuid::from_u128(key),
            customer_id: id,
            load_datetime: Utc::now(),
            record_source: "test".into(),
        }
    }

    #[test]
    fn test_customer_dim_excludes_unknown_and_keeps_unlinked() {
        let hubs = vec![customer(0, 1), customer(12583, 2), customer(17850, 3)];
        let links = vec![LinkRecord {
            link_key: Uuid::from_u128(99),
            left_hub_key: Uuid::from_u128(2),
            right_hub_key: Uuid::from_u128(50),
            load_datetime: Utc::now(),
            record_source: "test".into(),
        }];

        let dims = customer_dims(&hubs, &links, 0);
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].country_key, Some(Uuid::from_u128(50)));
        assert_eq!(dims[1].customer_id, 17850);
        assert_eq!(dims[1].country_key, None);
    }

    #[test]
    fn test_product_dim_uses_latest_description() {
        let key = Uuid::from_u128(7);
        let hub = ProductHub {
            hub_product_key: key,
            stock_code: "85123A".into(),
            load_datetime: Utc::now(),
            record_source: "test".into(),
        };
        let sat = |d: &str| ProductSatellite {
            hub_product_key: key,
            effective_from: Utc::now(),
            description: Some(d.into()),
            hash_diff: rv_common::derive_key([d]),
            load_datetime: Utc::now(),
            record_source: "test".into(),
        };

        let dims = product_dims(&[hub], vec![sat("OLD NAME"), sat("NEW NAME")]);
        assert_eq!(dims.len(), 1);
        assert_eq!(dims[0].description.as_deref(), Some("NEW NAME"));
    }
}
