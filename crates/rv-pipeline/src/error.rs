//! Pipeline error taxonomy
//!
//! Units report failures as [`PipelineError`]. The runner consults
//! [`PipelineError::is_transient`] to decide whether a retry may help;
//! everything else fails the unit on the first attempt.

use thiserror::Error;

use crate::graph::GraphError;
use crate::warehouse::WarehouseError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl PipelineError {
    /// Whether the failure may clear up on its own
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Warehouse(err) => err.is_transient(),
            PipelineError::SourceUnavailable(_) => true,
            PipelineError::Csv(err) => matches!(err.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }

    /// Short label for logs and run reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Warehouse(_) => "warehouse",
            PipelineError::SourceUnavailable(_) => "source_unavailable",
            PipelineError::Validation(_) => "validation",
            PipelineError::Invariant(_) => "invariant",
            PipelineError::Csv(_) => "csv",
            PipelineError::Graph(_) => "graph",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::SourceUnavailable("gone".into()).is_transient());
        assert!(PipelineError::Warehouse(WarehouseError::Unavailable("x".into())).is_transient());
        assert!(!PipelineError::Validation("bad".into()).is_transient());
        assert!(!PipelineError::Invariant("orphan".into()).is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(PipelineError::Csv(csv::Error::from(io)).is_transient());
    }
}
