//! Retail Vault Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, key derivation, and logging for the Retail Vault workspace.
//!
//! # Overview
//!
//! - **Key Derivation**: Deterministic hash keys for hubs, links, and satellite hash-diffs
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: Domain enums shared by every pipeline stage
//!
//! # Example
//!
//! ```
//! use rv_common::hashkey::derive_key;
//!
//! let product = derive_key(["85123A"]);
//! assert_eq!(product, derive_key(["85123A"]));
//! ```

pub mod hashkey;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use hashkey::{derive_key, HashKey};
pub use types::ReturnStatus;
