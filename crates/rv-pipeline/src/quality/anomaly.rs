//! Customer and invoice anomaly marking

use rv_common::{HashKey, ReturnStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use crate::config::BusinessRules;
use crate::error::PipelineResult;
use crate::mart::facts::{invoice_numbers, InvoiceLinks};
use crate::mart::FactRow;
use crate::staging::customer_key;
use crate::vault::hubs::InvoiceHub;
use crate::vault::satellites::InvoiceSatellite;
use crate::warehouse::{fetch, materialize, Table, Warehouse};

/// Invoice line attributed to the unknown customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAnomaly {
    #[serde(flatten)]
    pub sale: FactRow,
    pub return_status: ReturnStatus,
}

/// Sale line breaking a price or quantity rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceAnomaly {
    #[serde(flatten)]
    pub sale: FactRow,
    /// `unit_price <= 0`
    pub anomaly_unit_price: bool,
    /// `quantity` above the configured threshold
    pub anomaly_quantity: bool,
}

pub(crate) fn customer_anomalies(
    hubs: &[InvoiceHub],
    satellites: &[InvoiceSatellite],
    links: &InvoiceLinks,
    unknown: HashKey,
) -> Vec<CustomerAnomaly> {
    let invoices = invoice_numbers(hubs);
    let flagged: HashSet<HashKey> = links
        .customer
        .iter()
        .filter(|(_, customer)| **customer == unknown)
        .map(|(invoice, _)| *invoice)
        .collect();

    satellites
        .iter()
        .filter(|s| flagged.contains(&s.hub_invoice_key))
        .filter_map(|s| {
            invoices.get(&s.hub_invoice_key).map(|invoice_no| CustomerAnomaly {
                sale: links.fact(invoice_no, s),
                return_status: s.return_status,
            })
        })
        .collect()
}

pub(crate) fn invoice_anomalies(sales: Vec<FactRow>, rules: &BusinessRules) -> Vec<InvoiceAnomaly> {
    sales
        .into_iter()
        .filter_map(|sale| {
            let anomaly_unit_price = sale.unit_price <= 0.0;
            let anomaly_quantity = sale.quantity > rules.quantity_anomaly_threshold;
            (anomaly_unit_price || anomaly_quantity).then_some(InvoiceAnomaly {
                sale,
                anomaly_unit_price,
                anomaly_quantity,
            })
        })
        .collect()
}

/// Repopulate `anomaly_customer_invoioces` with every invoice line (sale or
/// return) linked to the unknown-customer hub key
pub async fn mark_customer_anomalies(warehouse: &dyn Warehouse, rules: &BusinessRules) -> PipelineResult<u64> {
    let hubs: Vec<InvoiceHub> = fetch(warehouse, Table::HubInvoice).await?;
    let satellites: Vec<InvoiceSatellite> = fetch(warehouse, Table::SatInvoice).await?;
    let links = InvoiceLinks::load(warehouse).await?;

    let unknown = customer_key(rules.unknown_customer_id);
    let rows = customer_anomalies(&hubs, &satellites, &links, unknown);
    let written = materialize(warehouse, Table::AnomalyCustomerInvoices, &rows).await?;

    info!(rows = written, "Customer anomalies marked");
    Ok(written)
}

/// Repopulate `anomaly_invoices` from `fact_sales`
pub async fn mark_invoice_anomalies(warehouse: &dyn Warehouse, rules: &BusinessRules) -> PipelineResult<u64> {
    let sales: Vec<FactRow> = fetch(warehouse, Table::FactSales).await?;
    let rows = invoice_anomalies(sales, rules);
    let written = materialize(warehouse, Table::AnomalyInvoices, &rows).await?;

    info!(
        rows = written,
        threshold = rules.quantity_anomaly_threshold,
        "Invoice anomalies marked"
    );
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sale(quantity: i64, unit_price: f64) -> FactRow {
        FactRow {
            sale_id: Uuid::new_v4(),
            invoice_no: "536365".into(),
            product_key: None,
            customer_key: None,
            time_key: None,
            country_key: None,
            quantity,
            unit_price,
            total_amount: quantity as f64 * unit_price,
        }
    }

    #[test]
    fn test_invoice_rules() {
        let rows = invoice_anomalies(
            vec![sale(1, 2.0), sale(1, 0.0), sale(1001, 1.0), sale(1000, 1.0), sale(5000, -1.0)],
            &BusinessRules::default(),
        );
        assert_eq!(rows.len(), 3);
        assert!(rows[0].anomaly_unit_price && !rows[0].anomaly_quantity);
        assert!(!rows[1].anomaly_unit_price && rows[1].anomaly_quantity);
        assert!(rows[2].anomaly_unit_price && rows[2].anomaly_quantity);
    }

    #[test]
    fn test_anomaly_row_is_flat() {
        let row = InvoiceAnomaly {
            sale: sale(2000, 1.0),
            anomaly_unit_price: false,
            anomaly_quantity: true,
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["quantity"], 2000);
        assert_eq!(value["anomaly_quantity"], true);
        let back: InvoiceAnomaly = serde_json::from_value(value).unwrap();
        assert_eq!(back, row);
    }
}
