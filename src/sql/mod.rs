//! SQL generation.
//!
//! - [`builder`]: operation descriptors to dialect SQL with canonical placeholders
//! - [`placeholders`]: canonical placeholders to each driver's native markers
//! - [`pagination`]: count and window queries for paged raw SQL
//! - [`lexer`]: literal/comment aware scanning shared by the above

pub mod builder;
pub mod lexer;
pub mod pagination;
pub mod placeholders;

pub use builder::compile;
pub use pagination::{PageRequest, paginate};
