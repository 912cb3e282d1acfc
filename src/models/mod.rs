//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod operation;
pub mod profile;
pub mod query;

// Re-export commonly used types
pub use operation::{
    ColumnMap, DeleteSpec, InsertSpec, OperationDescriptor, RawParams, RawQuerySpec, SelectSpec,
    UpdateSpec,
};
pub use profile::{ConnectionProfile, DEFAULT_PROFILE_NAME, Dialect};
pub use query::{
    CompiledStatement, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PageInfo, Params, QueryParam, ResultSet,
    Row,
};
