//! Staged record preparation
//!
//! Turns the raw table into the persistent staging area: cleaned natural
//! keys, Normal/Return classification, the unknown-customer sentinel, every
//! hub and link key, and the run's load metadata. The staged table is fully
//! replaced on every run.

use chrono::{DateTime, NaiveDateTime, Utc};
use rv_common::hashkey::{derive_key, derive_link_key};
use rv_common::{HashKey, ReturnStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BusinessRules;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::RawTransaction;

/// Rendering of invoice timestamps used in key derivation
pub const KEY_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub invoice_no: String,
    pub stock_code: String,
    pub invoice_date: NaiveDateTime,
    pub customer_id: u64,
    pub country: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_amount: f64,
    pub return_status: ReturnStatus,

    pub hub_invoice_key: HashKey,
    pub hub_product_key: HashKey,
    pub hub_customer_key: HashKey,
    pub hub_time_key: HashKey,
    pub hub_country_key: HashKey,

    pub link_invoice_product_key: HashKey,
    pub link_invoice_customer_key: HashKey,
    pub link_invoice_time_key: HashKey,
    pub link_invoice_country_key: HashKey,
    pub link_customer_country_key: HashKey,

    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

/// Load metadata stamped on every row written by one run
#[derive(Debug, Clone)]
pub struct LoadStamp {
    pub load_datetime: DateTime<Utc>,
    pub record_source: String,
}

#[derive(Debug, Default)]
pub struct StagingOutcome {
    pub records: Vec<StagedRecord>,
    /// Rows dropped for a missing invoice number, stock code or date
    pub dropped: usize,
    /// Rows that received the unknown-customer sentinel
    pub imputed_customers: usize,
}

// Key families. Attribute order is part of the key definition.

pub fn invoice_key(invoice_no: &str, stock_code: &str, invoice_date: &NaiveDateTime) -> HashKey {
    let date = invoice_date.format(KEY_DATETIME_FORMAT).to_string();
    derive_key([invoice_no, stock_code, date.as_str()])
}

pub fn product_key(stock_code: &str) -> HashKey {
    derive_key([stock_code])
}

pub fn customer_key(customer_id: u64) -> HashKey {
    derive_key([customer_id.to_string()])
}

pub fn time_key(invoice_date: &NaiveDateTime) -> HashKey {
    derive_key([invoice_date.format(KEY_DATETIME_FORMAT).to_string()])
}

pub fn country_key(country: &str) -> HashKey {
    derive_key([country])
}

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn business_key(value: &str, rules: &BusinessRules) -> String {
    if rules.uppercase_business_keys {
        value.to_uppercase()
    } else {
        value.to_string()
    }
}

/// Split a credit-note marker off an invoice number
pub fn strip_credit_note<'a>(invoice_no: &'a str, marker: &str) -> (&'a str, bool) {
    match invoice_no.strip_prefix(marker) {
        Some(rest) if !rest.is_empty() => (rest, true),
        _ => (invoice_no, false),
    }
}

/// Prepare staged records from the raw table
///
/// Rows without an invoice number, stock code or invoice date are dropped.
/// A row with no quantity, unit price or country fails the whole batch.
pub fn prepare(
    raw: &[RawTransaction],
    rules: &BusinessRules,
    stamp: &LoadStamp,
) -> PipelineResult<StagingOutcome> {
    let mut outcome = StagingOutcome::default();

    for (position, row) in raw.iter().enumerate() {
        let (Some(invoice_no), Some(stock_code), Some(invoice_date)) = (
            clean(row.invoice_no.as_deref()),
            clean(row.stock_code.as_deref()),
            row.invoice_date,
        ) else {
            outcome.dropped += 1;
            continue;
        };

        let missing = |column: &str| {
            PipelineError::Validation(format!(
                "Raw row {} (invoice {}) has no {}",
                position, invoice_no, column
            ))
        };
        let quantity = row.quantity.ok_or_else(|| missing("quantity"))?;
        let unit_price = row.unit_price.ok_or_else(|| missing("unit price"))?;
        let country = clean(row.country.as_deref()).ok_or_else(|| missing("country"))?;

        let customer_id = match row.customer_id {
            Some(id) => id,
            None => {
                outcome.imputed_customers += 1;
                rules.unknown_customer_id
            },
        };

        let invoice_no = business_key(invoice_no, rules);
        let stock_code = business_key(stock_code, rules);
        let (invoice_no, credit_note) = strip_credit_note(&invoice_no, &rules.credit_note_marker);
        let return_status = if credit_note || quantity < 0 {
            ReturnStatus::Return
        } else {
            ReturnStatus::Normal
        };

        let hub_invoice_key = invoice_key(invoice_no, &stock_code, &invoice_date);
        let hub_product_key = product_key(&stock_code);
        let hub_customer_key = customer_key(customer_id);
        let hub_time_key = time_key(&invoice_date);
        let hub_country_key = country_key(country);

        outcome.records.push(StagedRecord {
            invoice_no: invoice_no.to_string(),
            stock_code,
            invoice_date,
            customer_id,
            country: country.to_string(),
            description: clean(row.description.as_deref()).map(str::to_string),
            quantity,
            unit_price,
            total_amount: row.total_amount.unwrap_or(quantity as f64 * unit_price),
            return_status,
            hub_invoice_key,
            hub_product_key,
            hub_customer_key,
            hub_time_key,
            hub_country_key,
            link_invoice_product_key: derive_link_key(&[hub_invoice_key, hub_product_key]),
            link_invoice_customer_key: derive_link_key(&[hub_invoice_key, hub_customer_key]),
            link_invoice_time_key: derive_link_key(&[hub_invoice_key, hub_time_key]),
            link_invoice_country_key: derive_link_key(&[hub_invoice_key, hub_country_key]),
            link_customer_country_key: derive_link_key(&[hub_customer_key, hub_country_key]),
            load_datetime: stamp.load_datetime,
            record_source: stamp.record_source.clone(),
        });
    }

    if outcome.dropped > 0 {
        warn!(dropped = outcome.dropped, "Dropped raw rows missing invoice, stock code or date");
    }
    info!(
        staged = outcome.records.len(),
        imputed_customers = outcome.imputed_customers,
        "Prepared staged records"
    );
    Ok(outcome)
}
