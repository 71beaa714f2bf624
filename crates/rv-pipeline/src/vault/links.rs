//! Link loaders
//!
//! All five links share one row shape. The link table itself says which hubs
//! the left and right keys point into (see [`LinkKind::hubs`]).

use chrono::{DateTime, Utc};
use rv_common::HashKey;
use serde::{Deserialize, Serialize};

use super::hubs::{require_keys, HubKind};
use super::{insert_missing, LoadReport, VaultRecord};
use crate::error::PipelineResult;
use crate::staging::StagedRecord;
use crate::warehouse::{Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link_key: HashKey,
    pub left_hub_key: HashKey,
    pub right_hub_key: HashKey,
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

impl VaultRecord for LinkRecord {
    fn merge_key(&self) -> HashKey {
        self.link_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    InvoiceProduct,
    InvoiceCustomer,
    InvoiceTime,
    InvoiceCountry,
    CustomerCountry,
}

impl LinkKind {
    pub const ALL: [LinkKind; 5] = [
        LinkKind::InvoiceProduct,
        LinkKind::InvoiceCustomer,
        LinkKind::InvoiceTime,
        LinkKind::InvoiceCountry,
        LinkKind::CustomerCountry,
    ];

    pub fn table(&self) -> Table {
        match self {
            LinkKind::InvoiceProduct => Table::LinkInvoiceProduct,
            LinkKind::InvoiceCustomer => Table::LinkInvoiceCustomer,
            LinkKind::InvoiceTime => Table::LinkInvoiceTime,
            LinkKind::InvoiceCountry => Table::LinkInvoiceCountry,
            LinkKind::CustomerCountry => Table::LinkCustomerCountry,
        }
    }

    /// Hubs referenced by the left and right key
    pub fn hubs(&self) -> (HubKind, HubKind) {
        match self {
            LinkKind::InvoiceProduct => (HubKind::Invoice, HubKind::Product),
            LinkKind::InvoiceCustomer => (HubKind::Invoice, HubKind::Customer),
            LinkKind::InvoiceTime => (HubKind::Invoice, HubKind::Time),
            LinkKind::InvoiceCountry => (HubKind::Invoice, HubKind::Country),
            LinkKind::CustomerCountry => (HubKind::Customer, HubKind::Country),
        }
    }

    /// Project the link row carried by a staged record
    pub fn project(&self, r: &StagedRecord) -> LinkRecord {
        let (link_key, left_hub_key, right_hub_key) = match self {
            LinkKind::InvoiceProduct => (r.link_invoice_product_key, r.hub_invoice_key, r.hub_product_key),
            LinkKind::InvoiceCustomer => (r.link_invoice_customer_key, r.hub_invoice_key, r.hub_customer_key),
            LinkKind::InvoiceTime => (r.link_invoice_time_key, r.hub_invoice_key, r.hub_time_key),
            LinkKind::InvoiceCountry => (r.link_invoice_country_key, r.hub_invoice_key, r.hub_country_key),
            LinkKind::CustomerCountry => (r.link_customer_country_key, r.hub_customer_key, r.hub_country_key),
        };
        LinkRecord {
            link_key,
            left_hub_key,
            right_hub_key,
            load_datetime: r.load_datetime,
            record_source: r.record_source.clone(),
        }
    }
}

/// Insert links for hub-key pairs not yet linked
///
/// Both referenced hubs must already hold every key the batch points at;
/// otherwise nothing is written and an invariant error is returned.
pub async fn load_link(
    warehouse: &dyn Warehouse,
    kind: LinkKind,
    staged: &[StagedRecord],
) -> PipelineResult<LoadReport> {
    let table = kind.table();
    let candidates: Vec<LinkRecord> = staged.iter().map(|r| kind.project(r)).collect();

    let (left, right) = kind.hubs();
    require_keys(warehouse, left, table, candidates.iter().map(|c| c.left_hub_key)).await?;
    require_keys(warehouse, right, table, candidates.iter().map(|c| c.right_hub_key)).await?;

    insert_missing(warehouse, table, candidates).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::BusinessRules;
    use crate::error::PipelineError;
    use crate::extract::RawTransaction;
    use crate::staging::{prepare, LoadStamp};
    use crate::vault::hubs::load_hub;
    use crate::warehouse::{ensure_layout, fetch, MemoryWarehouse};
    use chrono::NaiveDateTime;

    fn staged() -> Vec<StagedRecord> {
        let raw = RawTransaction {
            invoice_no: Some("536365".into()),
            stock_code: Some("71053".into()),
            description: Some("WHITE METAL LANTERN".into()),
            quantity: Some(6),
            invoice_date: NaiveDateTime::parse_from_str("2010-12-01 08:26:00", "%Y-%m-%d %H:%M:%S").ok(),
            unit_price: Some(3.39),
            customer_id: Some(17850),
            country: Some("United Kingdom".into()),
            total_amount: Some(20.34),
        };
        let stamp = LoadStamp {
            load_datetime: Utc::now(),
            record_source: "test".into(),
        };
        prepare(&[raw.clone(), raw], &BusinessRules::default(), &stamp).unwrap().records
    }

    #[tokio::test]
    async fn test_link_requires_hub_rows() {
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();
        let rows = staged();

        load_hub(&wh, HubKind::Customer, &rows).await.unwrap();
        let err = load_link(&wh, LinkKind::CustomerCountry, &rows).await.unwrap_err();
        assert!(matches!(err, PipelineError::Invariant(_)));
        assert_eq!(wh.row_count(Table::LinkCustomerCountry).await, Some(0));
    }

    #[tokio::test]
    async fn test_link_load_is_idempotent() {
        let wh = MemoryWarehouse::new();
        ensure_layout(&wh).await.unwrap();
        let rows = staged();
        load_hub(&wh, HubKind::Invoice, &rows).await.unwrap();
        load_hub(&wh, HubKind::Product, &rows).await.unwrap();

        let first = load_link(&wh, LinkKind::InvoiceProduct, &rows).await.unwrap();
        assert_eq!(first, LoadReport { candidates: 1, inserted: 1, skipped: 0 });
        let second = load_link(&wh, LinkKind::InvoiceProduct, &rows).await.unwrap();
        assert_eq!(second.inserted, 0);

        let links: Vec<LinkRecord> = fetch(&wh, Table::LinkInvoiceProduct).await.unwrap();
        assert_eq!(links[0].left_hub_key, rows[0].hub_invoice_key);
        assert_eq!(links[0].right_hub_key, rows[0].hub_product_key);
    }
}
