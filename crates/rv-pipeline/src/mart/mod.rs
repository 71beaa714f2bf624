//! Star-schema marts, rebuilt in full from vault state on every run

pub mod dims;
pub mod facts;

pub use dims::{build_dim, DimKind};
pub use facts::{build_facts, FactRow};
