//! Dialect-neutral operation descriptors.
//!
//! These are the request bodies accepted by the HTTP layer and the input of
//! the statement builder.

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Column name to value, in caller order.
pub type ColumnMap = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Deserialize)]
pub struct SelectSpec {
    pub table: String,
    #[serde(default)]
    pub filter: ColumnMap,
    /// Comma separated column list. Default: `*`
    #[serde(default)]
    pub fields: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertSpec {
    pub table: String,
    #[serde(default)]
    pub data: ColumnMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSpec {
    pub table: String,
    #[serde(default)]
    pub data: ColumnMap,
    #[serde(default)]
    pub filter: ColumnMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSpec {
    pub table: String,
    #[serde(default)]
    pub filter: ColumnMap,
}

/// Parameters of a raw query: `{"name": value}` or `[value, ...]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParams {
    Named(ColumnMap),
    Positional(Vec<JsonValue>),
}

impl Default for RawParams {
    fn default() -> Self {
        Self::Named(ColumnMap::new())
    }
}

impl RawParams {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Named(map) => map.is_empty(),
            Self::Positional(values) => values.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQuerySpec {
    pub sql: String,
    #[serde(default)]
    pub params: RawParams,
    /// 1-based. Pagination is applied when `page` or `page_size` is present.
    #[serde(default)]
    pub page: Option<u32>,
    /// Default: 100, max: 300
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl RawQuerySpec {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: RawParams::default(),
            page: None,
            page_size: None,
        }
    }

    pub fn with_params(mut self, params: RawParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.page.is_some() || self.page_size.is_some()
    }
}

/// A requested database operation.
#[derive(Debug, Clone)]
pub enum OperationDescriptor {
    Select(SelectSpec),
    Insert(InsertSpec),
    Update(UpdateSpec),
    Delete(DeleteSpec),
    RawQuery(RawQuerySpec),
}

impl OperationDescriptor {
    /// Operation name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::RawQuery(_) => "query",
        }
    }

    /// Insert, update and delete run inside an explicit transaction.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Insert(_) | Self::Update(_) | Self::Delete(_))
    }
}
