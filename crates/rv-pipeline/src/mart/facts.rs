//! Sales and sale-return facts
//!
//! One fact row per invoice satellite row of the matching return status,
//! joined to its invoice hub. Dimension keys come from the invoice links and
//! are left-joined: a missing link yields `None`, never a lost fact.

use rv_common::{HashKey, ReturnStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::PipelineResult;
use crate::vault::hubs::InvoiceHub;
use crate::vault::satellites::InvoiceSatellite;
use crate::vault::{LinkKind, LinkRecord};
use crate::warehouse::{fetch, materialize, Table, Warehouse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub sale_id: HashKey,
    pub invoice_no: String,
    pub product_key: Option<HashKey>,
    pub customer_key: Option<HashKey>,
    pub time_key: Option<HashKey>,
    pub country_key: Option<HashKey>,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_amount: f64,
}

pub fn fact_table(status: ReturnStatus) -> Table {
    match status {
        ReturnStatus::Normal => Table::FactSales,
        ReturnStatus::Return => Table::FactSaleReturns,
    }
}

/// Invoice key -> right-hand hub key, one entry per invoice
///
/// When an invoice has several links of one kind the earliest loaded link
/// wins, ties broken by the lower hub key.
pub(crate) fn first_links(links: &[LinkRecord]) -> HashMap<HashKey, HashKey> {
    let mut chosen: HashMap<HashKey, &LinkRecord> = HashMap::new();
    for link in links {
        chosen
            .entry(link.left_hub_key)
            .and_modify(|current| {
                if (link.load_datetime, link.right_hub_key) < (current.load_datetime, current.right_hub_key) {
                    *current = link;
                }
            })
            .or_insert(link);
    }
    chosen.into_iter().map(|(k, l)| (k, l.right_hub_key)).collect()
}

/// Resolved invoice links of every kind
#[derive(Debug, Default)]
pub(crate) struct InvoiceLinks {
    pub product: HashMap<HashKey, HashKey>,
    pub customer: HashMap<HashKey, HashKey>,
    pub time: HashMap<HashKey, HashKey>,
    pub country: HashMap<HashKey, HashKey>,
}

impl InvoiceLinks {
    pub async fn load(warehouse: &dyn Warehouse) -> PipelineResult<Self> {
        let read = |kind: LinkKind| async move {
            let links: Vec<LinkRecord> = fetch(warehouse, kind.table()).await?;
            PipelineResult::Ok(first_links(&links))
        };
        Ok(Self {
            product: read(LinkKind::InvoiceProduct).await?,
            customer: read(LinkKind::InvoiceCustomer).await?,
            time: read(LinkKind::InvoiceTime).await?,
            country: read(LinkKind::InvoiceCountry).await?,
        })
    }

    pub fn fact(&self, invoice_no: &str, sat: &InvoiceSatellite) -> FactRow {
        let key = sat.hub_invoice_key;
        FactRow {
            sale_id: key,
            invoice_no: invoice_no.to_string(),
            product_key: self.product.get(&key).copied(),
            customer_key: self.customer.get(&key).copied(),
            time_key: self.time.get(&key).copied(),
            country_key: self.country.get(&key).copied(),
            quantity: sat.quantity,
            unit_price: sat.unit_price,
            total_amount: sat.total_amount,
        }
    }
}

pub(crate) fn invoice_numbers(hubs: &[InvoiceHub]) -> HashMap<HashKey, &str> {
    hubs.iter()
        .map(|h| (h.hub_invoice_key, h.invoice_no.as_str()))
        .collect()
}

pub(crate) fn fact_rows(
    hubs: &[InvoiceHub],
    satellites: &[InvoiceSatellite],
    links: &InvoiceLinks,
    status: ReturnStatus,
) -> Vec<FactRow> {
    let invoices = invoice_numbers(hubs);
    satellites
        .iter()
        .filter(|s| s.return_status == status)
        .filter_map(|s| {
            invoices
                .get(&s.hub_invoice_key)
                .map(|invoice_no| links.fact(invoice_no, s))
        })
        .collect()
}

/// Rebuild the fact table for one return status
pub async fn build_facts(warehouse: &dyn Warehouse, status: ReturnStatus) -> PipelineResult<u64> {
    let hubs: Vec<InvoiceHub> = fetch(warehouse, Table::HubInvoice).await?;
    let satellites: Vec<InvoiceSatellite> = fetch(warehouse, Table::SatInvoice).await?;
    let links = InvoiceLinks::load(warehouse).await?;

    let rows = fact_rows(&hubs, &satellites, &links, status);
    let table = fact_table(status);
    let written = materialize(warehouse, table, &rows).await?;

    info!(table = %table, rows = written, "Fact table rebuilt");
    Ok(written)
}
