//! Raw extract of the Online Retail II CSV export
//!
//! Header names differ between the two published versions of the dataset
//! (`InvoiceNo`/`Invoice`, `UnitPrice`/`Price`, `CustomerID`/`Customer ID`),
//! so columns are resolved by alias. Empty cells become `None`; staging
//! decides what a missing value means.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// One line of the source export as stored in the raw table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawTransaction {
    pub invoice_no: Option<String>,
    pub stock_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub invoice_date: Option<NaiveDateTime>,
    pub unit_price: Option<f64>,
    pub customer_id: Option<u64>,
    pub country: Option<String>,
    pub total_amount: Option<f64>,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M"];

#[derive(Debug, Clone, Copy)]
enum Column {
    InvoiceNo,
    StockCode,
    Description,
    Quantity,
    InvoiceDate,
    UnitPrice,
    CustomerId,
    Country,
}

impl Column {
    const ALL: [Column; 8] = [
        Column::InvoiceNo,
        Column::StockCode,
        Column::Description,
        Column::Quantity,
        Column::InvoiceDate,
        Column::UnitPrice,
        Column::CustomerId,
        Column::Country,
    ];

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Column::InvoiceNo => &["invoice", "invoiceno"],
            Column::StockCode => &["stockcode"],
            Column::Description => &["description"],
            Column::Quantity => &["quantity"],
            Column::InvoiceDate => &["invoicedate"],
            Column::UnitPrice => &["price", "unitprice"],
            Column::CustomerId => &["customerid"],
            Column::Country => &["country"],
        }
    }
}

/// Header name folded for alias matching: lowercase, spaces and underscores dropped
fn fold_header(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

struct ColumnMap([usize; 8]);

impl ColumnMap {
    fn resolve(headers: &csv::StringRecord) -> PipelineResult<Self> {
        let folded: Vec<String> = headers.iter().map(fold_header).collect();
        let mut positions = [0usize; 8];
        for (slot, column) in Column::ALL.iter().enumerate() {
            positions[slot] = folded
                .iter()
                .position(|h| column.aliases().contains(&h.as_str()))
                .ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "Source is missing column {:?} (accepted headers: {})",
                        column,
                        column.aliases().join(", ")
                    ))
                })?;
        }
        Ok(Self(positions))
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        record
            .get(self.0[column as usize])
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

pub fn parse_invoice_date(value: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Customer ids are sometimes exported as floats (`17850.0`)
fn parse_customer_id(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
            .map(|f| f as u64)
    })
}

fn invalid(line: u64, column: &str, value: &str) -> PipelineError {
    PipelineError::Validation(format!("Line {}: invalid {} '{}'", line, column, value))
}

/// Parse a CSV export from any reader
pub fn read_transactions<R: Read>(reader: R) -> PipelineResult<Vec<RawTransaction>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns = ColumnMap::resolve(csv.headers()?)?;
    let mut rows = Vec::new();

    for record in csv.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());

        let quantity = columns
            .get(&record, Column::Quantity)
            .map(|v| v.parse::<i64>().map_err(|_| invalid(line, "quantity", v)))
            .transpose()?;
        let unit_price = columns
            .get(&record, Column::UnitPrice)
            .map(|v| v.parse::<f64>().map_err(|_| invalid(line, "price", v)))
            .transpose()?;
        let invoice_date = columns
            .get(&record, Column::InvoiceDate)
            .map(|v| parse_invoice_date(v).ok_or_else(|| invalid(line, "invoice date", v)))
            .transpose()?;
        let customer_id = columns
            .get(&record, Column::CustomerId)
            .map(|v| parse_customer_id(v).ok_or_else(|| invalid(line, "customer id", v)))
            .transpose()?;

        let total_amount = match (quantity, unit_price) {
            (Some(q), Some(p)) => Some(q as f64 * p),
            _ => None,
        };

        rows.push(RawTransaction {
            invoice_no: columns.get(&record, Column::InvoiceNo).map(str::to_string),
            stock_code: columns.get(&record, Column::StockCode).map(str::to_string),
            description: columns.get(&record, Column::Description).map(str::to_string),
            quantity,
            invoice_date,
            unit_price,
            customer_id,
            country: columns.get(&record, Column::Country).map(str::to_string),
            total_amount,
        });
    }

    debug!(rows = rows.len(), "Parsed source export");
    Ok(rows)
}

/// Read a CSV export from disk
///
/// Failing to open or read the file is reported as
/// [`PipelineError::SourceUnavailable`] so the runner may retry it.
pub fn read_file(path: &Path) -> PipelineResult<Vec<RawTransaction>> {
    let file = std::fs::File::open(path).map_err(|e| {
        PipelineError::SourceUnavailable(format!("{}: {}", path.display(), e))
    })?;
    let rows = read_transactions(std::io::BufReader::new(file))?;
    info!(path = %path.display(), rows = rows.len(), "Extracted source file");
    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const RETAIL_II: &str = "\
Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country
489434,85048,15CM CHRISTMAS GLASS BALL 20 LIGHTS,12,2009-12-01 07:45:00,6.95,13085.0,United Kingdom
C489449,22087,PAPER BUNTING WHITE LACE,-12,2009-12-01 10:33:00,2.95,16321,Australia
489436,21523,DOORMAT FANCY FONT HOME SWEET HOME,10,2009-12-01 09:06:00,5.95,,United Kingdom
";

    #[test]
    fn test_reads_retail_ii_headers() {
        let rows = read_transactions(RETAIL_II.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].invoice_no.as_deref(), Some("489434"));
        assert_eq!(rows[0].customer_id, Some(13085));
        assert_eq!(rows[0].total_amount, Some(12.0 * 6.95));

        assert_eq!(rows[1].quantity, Some(-12));
        assert_eq!(rows[2].customer_id, None);
    }

    #[test]
    fn test_reads_legacy_headers_and_us_dates() {
        let csv = "\
InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,12/1/2010 8:26,2.55,17850,United Kingdom
";
        let rows = read_transactions(csv.as_bytes()).unwrap();
        let expected = NaiveDateTime::parse_from_str("2010-12-01 08:26:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(rows[0].invoice_date, Some(expected));
        assert_eq!(rows[0].unit_price, Some(2.55));
    }

    #[test]
    fn test_missing_column_is_validation_error() {
        let csv = "Invoice,StockCode,Quantity\n1,2,3\n";
        let err = read_transactions(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_malformed_quantity_is_validation_error() {
        let csv = "\
Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country
1,A,x,lots,2010-12-01 08:26,1.0,1,UK
";
        let err = read_transactions(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("quantity"));
    }

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RETAIL_II.as_bytes()).unwrap();
        let rows = read_file(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_missing_file_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_file(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable(_)));
        assert!(err.is_transient());
    }
}
