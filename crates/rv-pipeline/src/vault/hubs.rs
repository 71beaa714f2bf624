//! Hub loaders

use chrono::{DateTime, NaiveDateTime, Utc};
use rv_common::HashKey;
use serde::{Deserialize, Serialize};

use super::{insert_missing, LoadReport, VaultRecord};
use crate::error::PipelineResult;
use crate::staging::StagedRecord;
use crate::warehouse::{Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHub {
    pub hub_invoice_key: HashKey,
    pub invoice_no: String,
    pub invoice_date: NaiveDateTime,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHub {
    pub hub_product_key: HashKey,
    pub stock_code: String,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerHub {
    pub hub_customer_key: HashKey,
    pub customer_id: u64,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHub {
    pub hub_time_key: HashKey,
    pub invoice_date: NaiveDateTime,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryHub {
    pub hub_country_key: HashKey,
    pub country: String,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

impl VaultRecord for InvoiceHub {
    fn merge_key(&self) -> HashKey {
        self.hub_invoice_key
    }
}

impl VaultRecord for ProductHub {
    fn merge_key(&self) -> HashKey {
        self.hub_product_key
    }
}

impl VaultRecord for CustomerHub {
    fn merge_key(&self) -> HashKey {
        self.hub_customer_key
    }
}

impl VaultRecord for TimeHub {
    fn merge_key(&self) -> HashKey {
        self.hub_time_key
    }
}

impl VaultRecord for CountryHub {
    fn merge_key(&self) -> HashKey {
        self.hub_country_key
    }
}

impl From<&StagedRecord> for InvoiceHub {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_invoice_key: r.hub_invoice_key,
            invoice_no: r.invoice_no.clone(),
            invoice_date: r.invoice_date,
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for ProductHub {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_product_key: r.hub_product_key,
            stock_code: r.stock_code.clone(),
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for CustomerHub {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_customer_key: r.hub_customer_key,
            customer_id: r.customer_id,
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for TimeHub {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_time_key: r.hub_time_key,
            invoice_date: r.invoice_date,
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

impl From<&StagedRecord> for CountryHub {
    fn from(r: &StagedRecord) -> Self {
        Self {
            hub_country_key: r.hub_country_key,
            country: r.country.clone(),
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubKind {
    Invoice,
    Product,
    Customer,
    Time,
    Country,
}

impl HubKind {
    pub const ALL: [HubKind; 5] = [
        HubKind::Invoice,
        HubKind::Product,
        HubKind::Customer,
        HubKind::Time,
        HubKind::Country,
    ];

    pub fn table(&self) -> Table {
        match self {
            HubKind::Invoice => Table::HubInvoice,
            HubKind::Product => Table::HubProduct,
            HubKind::Customer => Table::HubCustomer,
            HubKind::Time => Table::HubTime,
            HubKind::Country => Table::HubCountry,
        }
    }
}

async fn load<T>(warehouse: &dyn Warehouse, table: Table, staged: &[StagedRecord]) -> PipelineResult<LoadReport>
where
    T: VaultRecord + for<'a> From<&'a StagedRecord>,
{
    let candidates: Vec<T> = staged.iter().map(T::from).collect();
    insert_missing(warehouse, table, candidates).await
}

/// Insert hub rows for business keys the hub has not seen
pub async fn load_hub(
    warehouse: &dyn Warehouse,
    kind: HubKind,
    staged: &[StagedRecord],
) -> PipelineResult<LoadReport> {
    let table = kind.table();
    match kind {
        HubKind::Invoice => load::<InvoiceHub>(warehouse, table, staged).await,
        HubKind::Product => load::<ProductHub>(warehouse, table, staged).await,
        HubKind::Customer => load::<CustomerHub>(warehouse, table, staged).await,
        HubKind::Time => load::<TimeHub>(warehouse, table, staged).await,
        HubKind::Country => load::<CountryHub>(warehouse, table, staged).await,
    }
}

/// Check that every key exists in the hub of the given kind
pub async fn require_keys<I>(
    warehouse: &dyn Warehouse,
    kind: HubKind,
    referrer: Table,
    keys: I,
) -> PipelineResult<()>
where
    I: IntoIterator<Item = HashKey>,
{
    use super::require_hub_keys;
    let hub = kind.table();
    match kind {
        HubKind::Invoice => require_hub_keys::<InvoiceHub, _>(warehouse, hub, referrer, keys).await,
        HubKind::Product => require_hub_keys::<ProductHub, _>(warehouse, hub, referrer, keys).await,
        HubKind::Customer => require_hub_keys::<CustomerHub, _>(warehouse, hub, referrer, keys).await,
        HubKind::Time => require_hub_keys::<TimeHub, _>(warehouse, hub, referrer, keys).await,
        HubKind::Country => require_hub_keys::<CountryHub, _>(warehouse, hub, referrer, keys).await,
    }
}
