//! Retail Vault Pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental Data Vault 2.0 load engine for retail transactions.
//!
//! # Stages
//!
//! - **Extract**: CSV export into the raw table ([`extract`])
//! - **Staging**: cleaned records with every hub and link key ([`staging`])
//! - **Vault**: insert-missing loaders for hubs, links and satellites ([`vault`])
//! - **Marts**: fact and dimension tables rebuilt from the vault ([`mart`])
//! - **Quality**: anomaly tables, daily snapshot and sales summary ([`quality`])
//! - **Metrics**: gauges pushed to a [`metrics::MetricsSink`]
//!
//! Units are declared in [`pipeline`] and executed by [`runner::Runner`]
//! over a validated [`graph::DependencyGraph`]. All storage goes through the
//! [`warehouse::Warehouse`] trait.

pub mod config;
pub mod error;
pub mod extract;
pub mod graph;
pub mod mart;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod runner;
pub mod staging;
pub mod vault;
pub mod warehouse;

pub use config::{BusinessRules, PipelineConfig, SatellitePolicy, WarehouseBackend};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineContext, Step};
pub use runner::{RunReport, UnitStatus};
