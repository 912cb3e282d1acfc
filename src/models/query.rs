//! Statement, parameter and result models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default page size when a raw query asks for pagination without one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: u32 = 300;

/// One result row: column name to value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Ordered rows returned by a statement.
pub type ResultSet = Vec<Row>;

/// A scalar bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    /// Integer above `i64::MAX`, e.g. a `BIGINT UNSIGNED` key.
    UInt(u64),
    Float(f64),
    String(String),
}

impl QueryParam {
    /// Kind of value, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<&JsonValue> for QueryParam {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else {
                    match n.as_f64() {
                        Some(f) => Self::Float(f),
                        None => Self::String(n.to_string()),
                    }
                }
            }
            JsonValue::String(s) => Self::String(s.clone()),
            // Nested values are bound as their JSON text.
            other => Self::String(other.to_string()),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Parameter carrier for a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<QueryParam>),
    /// Name/value pairs in caller insertion order.
    Named(Vec<(String, QueryParam)>),
}

impl Params {
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a named value.
    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        match self {
            Self::Named(pairs) => pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            Self::Positional(_) => None,
        }
    }

    /// Build a named carrier from a JSON object.
    pub fn named_from_json(map: &serde_json::Map<String, JsonValue>) -> Self {
        Self::Named(
            map.iter()
                .map(|(k, v)| (k.clone(), QueryParam::from(v)))
                .collect(),
        )
    }

    /// Build a positional carrier from JSON values.
    pub fn positional_from_json<'a>(values: impl IntoIterator<Item = &'a JsonValue>) -> Self {
        Self::Positional(values.into_iter().map(QueryParam::from).collect())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::none()
    }
}

/// Dialect-ready SQL text plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: Params,
}

impl CompiledStatement {
    pub fn new(sql: impl Into<String>, params: Params) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Params::none())
    }

    /// Same parameters, different SQL text.
    pub fn with_sql(&self, sql: impl Into<String>) -> Self {
        Self::new(sql, self.params.clone())
    }
}

/// Page metadata for paginated raw queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub record_count: u64,
    pub total_records: u64,
    pub total_pages: u64,
    /// Full page returned; more rows may follow.
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from(&json!(123)), QueryParam::Int(123));
        assert_eq!(QueryParam::from(&json!(1.5)), QueryParam::Float(1.5));
        assert_eq!(QueryParam::from(&json!(-7)), QueryParam::Int(-7));
        assert_eq!(QueryParam::from(&json!(null)), QueryParam::Null);
        assert_eq!(QueryParam::from(&json!(true)), QueryParam::Bool(true));
        assert_eq!(
            QueryParam::from(&json!({"a": 1})),
            QueryParam::String(r#"{"a":1}"#.to_string())
        );
    }

    #[test]
    fn test_query_param_keeps_unsigned_range() {
        assert_eq!(
            QueryParam::from(&json!(i64::MAX)),
            QueryParam::Int(i64::MAX)
        );
        assert_eq!(
            QueryParam::from(&json!(18446744073709551615u64)),
            QueryParam::UInt(u64::MAX)
        );
        assert_eq!(
            QueryParam::from(&json!(9223372036854775808u64)),
            QueryParam::UInt(9223372036854775808)
        );
    }

    #[test]
    fn test_named_params_keep_insertion_order() {
        let map = json!({"zeta": 1, "alpha": 2});
        let params = Params::named_from_json(map.as_object().unwrap());
        match &params {
            Params::Named(pairs) => {
                assert_eq!(pairs[0].0, "zeta");
                assert_eq!(pairs[1].0, "alpha");
            }
            other => panic!("expected named params, got {:?}", other),
        }
        assert_eq!(params.get("alpha"), Some(&QueryParam::Int(2)));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_with_sql_keeps_params() {
        let stmt = CompiledStatement::new("SELECT %s", Params::Positional(vec![QueryParam::Int(1)]));
        let other = stmt.with_sql("SELECT COUNT(*) FROM (SELECT %s) AS subquery");
        assert_eq!(other.params, stmt.params);
    }
}
