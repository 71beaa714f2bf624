//! The retail load pipeline
//!
//! Declares every unit, its predecessors and its retry policy, and executes
//! each unit against the injected [`PipelineContext`]. Execution order is
//! entirely the graph's business; a unit body only reads and writes the
//! tables it owns.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rv_common::ReturnStatus;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{BusinessRules, PipelineConfig, RetryConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{self, RawTransaction};
use crate::graph::{DependencyGraph, GraphError, RetryPolicy, UnitSpec};
use crate::mart::{build_dim, build_facts, DimKind};
use crate::metrics::{publish_quality_metrics, publish_sales_metrics, MetricsSink};
use crate::quality::{mark_customer_anomalies, mark_invoice_anomalies, record_quality_snapshot, summarize_sales};
use crate::runner::{RunReport, Runner, UnitExecutor};
use crate::staging::{prepare, LoadStamp, StagedRecord};
use crate::vault::{load_hub, load_link, load_satellite, HubKind, LinkKind, SatelliteKind};
use crate::warehouse::{ensure_layout, fetch, materialize, Table, Warehouse};

/// Every unit of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Extract,
    Stage,
    Hub(HubKind),
    Link(LinkKind),
    Satellite(SatelliteKind),
    Fact(ReturnStatus),
    Dim(DimKind),
    CustomerAnomalies,
    InvoiceAnomalies,
    QualitySnapshot,
    SalesSummary,
    QualityMetrics,
    SalesMetrics,
}

const INVOICE_LINKS: [Step; 4] = [
    Step::Link(LinkKind::InvoiceProduct),
    Step::Link(LinkKind::InvoiceCustomer),
    Step::Link(LinkKind::InvoiceTime),
    Step::Link(LinkKind::InvoiceCountry),
];

impl Step {
    /// All units in declaration order
    pub fn all() -> Vec<Step> {
        let mut steps = vec![Step::Extract, Step::Stage];
        steps.extend(HubKind::ALL.map(Step::Hub));
        steps.extend(LinkKind::ALL.map(Step::Link));
        steps.extend(SatelliteKind::ALL.map(Step::Satellite));
        steps.extend([Step::Fact(ReturnStatus::Normal), Step::Fact(ReturnStatus::Return)]);
        steps.extend([DimKind::Product, DimKind::Customer, DimKind::Time, DimKind::Country].map(Step::Dim));
        steps.extend([
            Step::CustomerAnomalies,
            Step::InvoiceAnomalies,
            Step::QualitySnapshot,
            Step::SalesSummary,
            Step::QualityMetrics,
            Step::SalesMetrics,
        ]);
        steps
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Extract => "extract_online_retails",
            Step::Stage => "psa_online_retails",
            Step::Hub(HubKind::Invoice) => "hub_invoice",
            Step::Hub(HubKind::Product) => "hub_product",
            Step::Hub(HubKind::Customer) => "hub_customer",
            Step::Hub(HubKind::Time) => "hub_time",
            Step::Hub(HubKind::Country) => "hub_country",
            Step::Link(LinkKind::InvoiceProduct) => "link_invoice_product",
            Step::Link(LinkKind::InvoiceCustomer) => "link_invoice_customer",
            Step::Link(LinkKind::InvoiceTime) => "link_invoice_time",
            Step::Link(LinkKind::InvoiceCountry) => "link_invoice_country",
            Step::Link(LinkKind::CustomerCountry) => "link_customer_country",
            Step::Satellite(SatelliteKind::Invoice) => "sat_invoice",
            Step::Satellite(SatelliteKind::Product) => "sat_product",
            Step::Satellite(SatelliteKind::Time) => "sat_time",
            Step::Fact(ReturnStatus::Normal) => "fact_sales",
            Step::Fact(ReturnStatus::Return) => "fact_sale_returns",
            Step::Dim(DimKind::Product) => "dim_product",
            Step::Dim(DimKind::Customer) => "dim_customer",
            Step::Dim(DimKind::Time) => "dim_time",
            Step::Dim(DimKind::Country) => "dim_country",
            Step::CustomerAnomalies => "anomaly_customer_invoices",
            Step::InvoiceAnomalies => "anomaly_invoices",
            Step::QualitySnapshot => "data_quality",
            Step::SalesSummary => "sales_summary",
            Step::QualityMetrics => "publish_quality_metrics",
            Step::SalesMetrics => "publish_sales_metrics",
        }
    }

    /// Units that must have succeeded before this one starts
    pub fn predecessors(&self) -> Vec<Step> {
        let fact_sales = Step::Fact(ReturnStatus::Normal);
        let fact_returns = Step::Fact(ReturnStatus::Return);
        match self {
            Step::Extract => vec![],
            Step::Stage => vec![Step::Extract],
            Step::Hub(_) => vec![Step::Stage],
            Step::Link(kind) => {
                let (left, right) = kind.hubs();
                vec![Step::Hub(left), Step::Hub(right)]
            },
            Step::Satellite(kind) => vec![Step::Hub(kind.hub())],
            Step::Fact(_) => {
                let mut deps = vec![Step::Hub(HubKind::Invoice), Step::Satellite(SatelliteKind::Invoice)];
                deps.extend(INVOICE_LINKS);
                deps
            },
            Step::Dim(DimKind::Product) => vec![Step::Satellite(SatelliteKind::Product), fact_sales],
            Step::Dim(DimKind::Customer) => vec![Step::Link(LinkKind::CustomerCountry), fact_sales],
            Step::Dim(DimKind::Time) => vec![Step::Satellite(SatelliteKind::Time), fact_sales],
            Step::Dim(DimKind::Country) => vec![Step::Hub(HubKind::Country), fact_sales],
            Step::CustomerAnomalies => {
                let mut deps = vec![
                    Step::Hub(HubKind::Customer),
                    Step::Hub(HubKind::Invoice),
                    Step::Satellite(SatelliteKind::Invoice),
                ];
                deps.extend(INVOICE_LINKS);
                deps
            },
            Step::InvoiceAnomalies => vec![fact_sales],
            Step::QualitySnapshot => vec![Step::CustomerAnomalies, Step::InvoiceAnomalies, fact_sales, fact_returns],
            Step::SalesSummary => vec![
                fact_sales,
                Step::Link(LinkKind::InvoiceTime),
                Step::Satellite(SatelliteKind::Time),
            ],
            Step::QualityMetrics => vec![Step::QualitySnapshot],
            Step::SalesMetrics => vec![Step::SalesSummary],
        }
    }
}

impl FromStr for Step {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::all()
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| GraphError::UnknownUnit(s.to_string()))
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the dependency graph of the pipeline
pub fn pipeline_graph(retry: RetryPolicy, extract_retry: RetryPolicy) -> Result<DependencyGraph, GraphError> {
    let units = Step::all()
        .into_iter()
        .map(|step| {
            let policy = if step == Step::Extract { extract_retry } else { retry };
            UnitSpec::new(step.name())
                .after(step.predecessors().iter().map(Step::name))
                .with_retry(policy)
        })
        .collect();
    DependencyGraph::new(units)
}

/// Everything a unit may touch during one run
pub struct PipelineContext {
    pub warehouse: Arc<dyn Warehouse>,
    pub metrics: Arc<dyn MetricsSink>,
    pub rules: BusinessRules,
    /// CSV export to extract; `None` keeps the current raw table
    pub source_path: Option<PathBuf>,
    pub stamp: LoadStamp,
    /// Date the quality snapshot is recorded under
    pub check_date: NaiveDate,
}

impl PipelineContext {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        metrics: Arc<dyn MetricsSink>,
        config: &PipelineConfig,
        load_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            warehouse,
            metrics,
            rules: config.rules.clone(),
            source_path: config.source_path.clone(),
            stamp: LoadStamp {
                load_datetime,
                record_source: config.record_source.clone(),
            },
            check_date: load_datetime.date_naive(),
        }
    }

    fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    async fn staged(&self) -> PipelineResult<Vec<StagedRecord>> {
        Ok(fetch(self.warehouse(), Table::StagedTransactions).await?)
    }

    async fn extract(&self) -> PipelineResult<u64> {
        let Some(path) = self.source_path.clone() else {
            info!("No source configured, keeping current raw table");
            return Ok(0);
        };
        let rows: Vec<RawTransaction> = tokio::task::spawn_blocking(move || extract::read_file(&path))
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("Extract task failed: {}", e)))??;
        Ok(materialize(self.warehouse(), Table::RawTransactions, &rows).await?)
    }

    async fn stage(&self) -> PipelineResult<u64> {
        let raw: Vec<RawTransaction> = fetch(self.warehouse(), Table::RawTransactions).await?;
        let outcome = prepare(&raw, &self.rules, &self.stamp)?;
        Ok(materialize(self.warehouse(), Table::StagedTransactions, &outcome.records).await?)
    }

    /// Execute one step once
    pub async fn execute_step(&self, step: Step) -> PipelineResult<u64> {
        let wh = self.warehouse();
        match step {
            Step::Extract => self.extract().await,
            Step::Stage => self.stage().await,
            Step::Hub(kind) => Ok(load_hub(wh, kind, &self.staged().await?).await?.inserted as u64),
            Step::Link(kind) => Ok(load_link(wh, kind, &self.staged().await?).await?.inserted as u64),
            Step::Satellite(kind) => {
                let report = load_satellite(wh, kind, &self.staged().await?, self.rules.satellite_policy).await?;
                Ok(report.inserted as u64)
            },
            Step::Fact(status) => build_facts(wh, status).await,
            Step::Dim(kind) => build_dim(wh, kind, &self.rules).await,
            Step::CustomerAnomalies => mark_customer_anomalies(wh, &self.rules).await,
            Step::InvoiceAnomalies => mark_invoice_anomalies(wh, &self.rules).await,
            Step::QualitySnapshot => record_quality_snapshot(wh, self.check_date).await.map(|_| 1),
            Step::SalesSummary => summarize_sales(wh).await,
            Step::QualityMetrics => publish_quality_metrics(wh, self.metrics.as_ref()).await,
            Step::SalesMetrics => publish_sales_metrics(wh, self.metrics.as_ref()).await,
        }
    }
}

#[async_trait]
impl UnitExecutor for PipelineContext {
    async fn execute(&self, unit: &str) -> PipelineResult<u64> {
        let step: Step = unit.parse()?;
        self.execute_step(step).await
    }
}

pub struct Pipeline {
    context: Arc<PipelineContext>,
    graph: DependencyGraph,
    runner: Runner,
}

impl Pipeline {
    pub fn new(context: PipelineContext, config: &PipelineConfig) -> PipelineResult<Self> {
        let graph = pipeline_graph(config.retry.policy(), config.extract_retry.policy())?;
        Ok(Self {
            context: Arc::new(context),
            graph,
            runner: Runner::new(config.max_parallel_units),
        })
    }

    /// Same pipeline with explicit retry settings, mainly for tests
    pub fn with_retry(context: PipelineContext, retry: RetryConfig, max_parallel: usize) -> PipelineResult<Self> {
        let policy = retry.policy();
        Ok(Self {
            context: Arc::new(context),
            graph: pipeline_graph(policy, policy)?,
            runner: Runner::new(max_parallel),
        })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Create the table layout, then run every unit
    pub async fn run(&self) -> PipelineResult<RunReport> {
        ensure_layout(self.context.warehouse()).await?;
        info!(
            backend = self.context.warehouse.backend(),
            load_datetime = %self.context.stamp.load_datetime,
            "Running retail vault pipeline"
        );

        let executor: Arc<dyn UnitExecutor> = self.context.clone();
        let report = self.runner.run(&self.graph, executor).await;
        if !report.is_success() {
            warn!(
                failed = report.count(crate::runner::UnitStatus::Failed),
                skipped = report.count(crate::runner::UnitStatus::Skipped),
                "Pipeline finished with failures"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_round_trip() {
        for step in Step::all() {
            assert_eq!(step.name().parse::<Step>().unwrap(), step);
        }
        assert!("hub_unicorn".parse::<Step>().is_err());
    }

    #[test]
    fn test_graph_is_valid() {
        let graph = pipeline_graph(RetryPolicy::none(), RetryPolicy::none()).unwrap();
        assert_eq!(graph.len(), 27);

        let waves = graph.waves();
        assert_eq!(waves[0], vec!["extract_online_retails"]);
        assert_eq!(waves[1], vec!["psa_online_retails"]);
        assert_eq!(waves[2].len(), 5);
    }

    #[test]
    fn test_failed_staging_blocks_everything_downstream() {
        let graph = pipeline_graph(RetryPolicy::none(), RetryPolicy::none()).unwrap();
        assert_eq!(graph.dependents_of("psa_online_retails").unwrap().len(), 25);

        let after_dim = graph.dependents_of("dim_product").unwrap();
        assert!(after_dim.is_empty());
    }

    #[test]
    fn test_facts_wait_for_every_invoice_link() {
        let graph = pipeline_graph(RetryPolicy::none(), RetryPolicy::none()).unwrap();
        let fact = graph.get("fact_sales").unwrap();
        for link in ["link_invoice_product", "link_invoice_customer", "link_invoice_time", "link_invoice_country"] {
            assert!(fact.predecessors.iter().any(|p| p == link));
        }
    }
}
