//! Metric publication
//!
//! Gauges are pushed once per run. Publishing is fire-and-forget from the
//! pipeline's point of view: a sink error is logged by the caller and never
//! fails the unit.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::error::PipelineResult;
use crate::quality::{latest, QualitySnapshot, SalesSummary};
use crate::warehouse::{Table, Warehouse};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics push failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pushgateway rejected {name}: HTTP {status}")]
    Rejected { name: String, status: u16 },
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, name: &str, value: f64) -> Result<(), MetricsError>;
}

/// Writes gauges to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn publish(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        info!(metric = name, value, "Gauge");
        Ok(())
    }
}

/// Pushes each gauge to a Prometheus Pushgateway, one job per metric
pub struct PushgatewaySink {
    client: Client,
    base_url: String,
}

impl PushgatewaySink {
    pub fn new(base_url: &str) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("rv-pipeline/0.1")
            .build()?;

        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };
        Ok(Self { client, base_url })
    }

    fn exposition(name: &str, value: f64) -> String {
        format!("# HELP {name} {name}\n# TYPE {name} gauge\n{name} {value}\n")
    }
}

#[async_trait]
impl MetricsSink for PushgatewaySink {
    async fn publish(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        let url = format!("{}/metrics/job/{}", self.base_url, name);
        let response = self
            .client
            .put(&url)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(Self::exposition(name, value))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetricsError::Rejected {
                name: name.to_string(),
                status: response.status().as_u16(),
            });
        }
        info!(metric = name, value, "Pushed gauge");
        Ok(())
    }
}

/// Publish every gauge, logging sink failures; returns how many were accepted
async fn publish_all(sink: &dyn MetricsSink, gauges: &[(&str, f64)]) -> u64 {
    let mut accepted = 0;
    for (name, value) in gauges {
        match sink.publish(name, *value).await {
            Ok(()) => accepted += 1,
            Err(e) => tracing::warn!(metric = name, error = %e, "Metric not published"),
        }
    }
    accepted
}

/// Publish the latest quality snapshot
pub async fn publish_quality_metrics(warehouse: &dyn Warehouse, sink: &dyn MetricsSink) -> PipelineResult<u64> {
    let Some(snapshot) = latest::<QualitySnapshot>(warehouse, Table::DataQuality).await? else {
        info!("No quality snapshot to publish");
        return Ok(0);
    };
    let gauges = [
        ("anomaly_unit_price_count", snapshot.anomaly_unit_price_count as f64),
        ("anomaly_quantity_count", snapshot.anomaly_quantity_count as f64),
        ("missing_customer_id_ratio", snapshot.missing_customer_id_ratio),
    ];
    Ok(publish_all(sink, &gauges).await)
}

/// Publish the most recent day of the sales summary
pub async fn publish_sales_metrics(warehouse: &dyn Warehouse, sink: &dyn MetricsSink) -> PipelineResult<u64> {
    let Some(summary) = latest::<SalesSummary>(warehouse, Table::SalesSummary).await? else {
        info!("No sales summary to publish");
        return Ok(0);
    };
    let gauges = [
        ("latest_min_total_amount", summary.min_total_amount),
        ("latest_max_total_amount", summary.max_total_amount),
        ("latest_median_total_amount", summary.median_total_amount),
        ("latest_avg_total_amount", summary.avg_total_amount),
        ("latest_sales_volume", summary.volume),
    ];
    Ok(publish_all(sink, &gauges).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_pushgateway_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/metrics/job/missing_customer_id_ratio"))
            .and(body_string_contains("missing_customer_id_ratio 0.05"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = PushgatewaySink::new(&server.uri()).unwrap();
        sink.publish("missing_customer_id_ratio", 0.05).await.unwrap();
    }

    #[tokio::test]
    async fn test_pushgateway_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = PushgatewaySink::new(&server.uri()).unwrap();
        let err = sink.publish("latest_sales_volume", 1.0).await.unwrap_err();
        assert!(matches!(err, MetricsError::Rejected { status: 500, .. }));
    }

    #[test]
    fn test_base_url_without_scheme() {
        let sink = PushgatewaySink::new("localhost:9091/").unwrap();
        assert_eq!(sink.base_url, "http://localhost:9091");
    }
}
