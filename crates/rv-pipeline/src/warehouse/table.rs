//! Logical table layout of the analytical store

use serde::{Deserialize, Serialize};

/// Storage layer a table belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Raw,
    Vault,
    Marts,
    Quality,
}

impl Layer {
    pub fn schema(&self) -> &'static str {
        match self {
            Layer::Raw => "raw",
            Layer::Vault => "vault",
            Layer::Marts => "marts",
            Layer::Quality => "quality",
        }
    }
}

/// Every table the pipeline reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    RawTransactions,
    StagedTransactions,

    HubInvoice,
    HubProduct,
    HubCustomer,
    HubTime,
    HubCountry,

    LinkInvoiceProduct,
    LinkInvoiceCustomer,
    LinkInvoiceTime,
    LinkInvoiceCountry,
    LinkCustomerCountry,

    SatInvoice,
    SatProduct,
    SatTime,

    FactSales,
    FactSaleReturns,
    DimProduct,
    DimCustomer,
    DimTime,
    DimCountry,

    AnomalyCustomerInvoices,
    AnomalyInvoices,
    DataQuality,
    SalesSummary,
}

impl Table {
    pub const ALL: [Table; 25] = [
        Table::RawTransactions,
        Table::StagedTransactions,
        Table::HubInvoice,
        Table::HubProduct,
        Table::HubCustomer,
        Table::HubTime,
        Table::HubCountry,
        Table::LinkInvoiceProduct,
        Table::LinkInvoiceCustomer,
        Table::LinkInvoiceTime,
        Table::LinkInvoiceCountry,
        Table::LinkCustomerCountry,
        Table::SatInvoice,
        Table::SatProduct,
        Table::SatTime,
        Table::FactSales,
        Table::FactSaleReturns,
        Table::DimProduct,
        Table::DimCustomer,
        Table::DimTime,
        Table::DimCountry,
        Table::AnomalyCustomerInvoices,
        Table::AnomalyInvoices,
        Table::DataQuality,
        Table::SalesSummary,
    ];

    pub fn layer(&self) -> Layer {
        match self {
            Table::RawTransactions | Table::StagedTransactions => Layer::Raw,
            Table::HubInvoice
            | Table::HubProduct
            | Table::HubCustomer
            | Table::HubTime
            | Table::HubCountry
            | Table::LinkInvoiceProduct
            | Table::LinkInvoiceCustomer
            | Table::LinkInvoiceTime
            | Table::LinkInvoiceCountry
            | Table::LinkCustomerCountry
            | Table::SatInvoice
            | Table::SatProduct
            | Table::SatTime => Layer::Vault,
            Table::FactSales
            | Table::FactSaleReturns
            | Table::DimProduct
            | Table::DimCustomer
            | Table::DimTime
            | Table::DimCountry => Layer::Marts,
            Table::AnomalyCustomerInvoices
            | Table::AnomalyInvoices
            | Table::DataQuality
            | Table::SalesSummary => Layer::Quality,
        }
    }

    /// Unqualified table name
    pub fn name(&self) -> &'static str {
        match self {
            Table::RawTransactions => "online_retails",
            Table::StagedTransactions => "psa_online_retails",
            Table::HubInvoice => "hub_invoice",
            Table::HubProduct => "hub_product",
            Table::HubCustomer => "hub_customer",
            Table::HubTime => "hub_time",
            Table::HubCountry => "hub_country",
            Table::LinkInvoiceProduct => "link_invoice_product",
            Table::LinkInvoiceCustomer => "link_invoice_customer",
            Table::LinkInvoiceTime => "link_invoice_time",
            Table::LinkInvoiceCountry => "link_invoice_country",
            Table::LinkCustomerCountry => "link_customer_country",
            Table::SatInvoice => "sat_invoice",
            Table::SatProduct => "sat_product",
            Table::SatTime => "sat_time",
            Table::FactSales => "fact_sales",
            Table::FactSaleReturns => "fact_sale_returns",
            Table::DimProduct => "dim_product",
            Table::DimCustomer => "dim_customer",
            Table::DimTime => "dim_time",
            Table::DimCountry => "dim_country",
            // Existing deployments already carry this spelling.
            Table::AnomalyCustomerInvoices => "anomaly_customer_invoioces",
            Table::AnomalyInvoices => "anomaly_invoices",
            Table::DataQuality => "data_quality",
            Table::SalesSummary => "sales_summary",
        }
    }

    /// Schema-qualified name, e.g. `vault.hub_invoice`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.layer().schema(), self.name())
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.layer().schema(), self.name())
    }
}
