//! Execution Module
//!
//! Backend trait and implementations, the timeout/row-cap executor,
//! and result normalization.

pub mod backend;
pub mod executor;
pub mod normalize;

pub use backend::{ColumnStoreBackend, QueryBackend, RowStoreBackend};
pub use executor::{
    ConnectionStatus, ExecutionMetadata, ExecutionOptions, QueryExecutionResult, QueryExecutor,
};
pub use normalize::{normalize_row, normalize_rows, normalize_value};
