//! Shared fixtures for pipeline integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use rv_pipeline::config::{PipelineConfig, RetryConfig};
use rv_pipeline::extract::RawTransaction;
use rv_pipeline::metrics::{MetricsError, MetricsSink};
use rv_pipeline::warehouse::{ensure_layout, materialize, Table, Warehouse};
use rv_pipeline::{Pipeline, PipelineContext, RunReport};
use std::sync::{Arc, Mutex};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rv_pipeline=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn invoice_date(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// A raw sale line; tweak fields on the returned value for edge cases
pub fn line(invoice_no: &str, stock_code: &str, quantity: i64, customer_id: Option<u64>) -> RawTransaction {
    let unit_price = 2.55;
    RawTransaction {
        invoice_no: Some(invoice_no.to_string()),
        stock_code: Some(stock_code.to_string()),
        description: Some("WHITE HANGING HEART T-LIGHT HOLDER".to_string()),
        quantity: Some(quantity),
        invoice_date: Some(invoice_date("2010-12-01 08:26:00")),
        unit_price: Some(unit_price),
        customer_id,
        country: Some("United Kingdom".to_string()),
        total_amount: Some(quantity as f64 * unit_price),
    }
}

pub fn load_time(run: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap() + Duration::hours(run)
}

/// Write rows straight into the raw table
pub async fn seed_raw(warehouse: &dyn Warehouse, rows: &[RawTransaction]) {
    ensure_layout(warehouse).await.unwrap();
    materialize(warehouse, Table::RawTransactions, rows).await.unwrap();
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry = RetryConfig {
        attempts: 3,
        delay_secs: 0,
    };
    config.extract_retry = config.retry;
    config
}

/// One full pipeline run against `warehouse`
pub async fn run_once(
    warehouse: Arc<dyn Warehouse>,
    metrics: Arc<dyn MetricsSink>,
    config: &PipelineConfig,
    load_datetime: DateTime<Utc>,
) -> RunReport {
    let context = PipelineContext::new(warehouse, metrics, config, load_datetime);
    Pipeline::new(context, config).unwrap().run().await.unwrap()
}

/// Keeps every published gauge
#[derive(Default)]
pub struct RecordingSink {
    pub gauges: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn publish(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        self.gauges.lock().unwrap().push((name.to_string(), value));
        Ok(())
    }
}
