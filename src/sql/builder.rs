//! Operation descriptor to dialect SQL.
//!
//! The builder validates the descriptor, interpolates caller-supplied table
//! and column names (syntactically checked) and emits one placeholder per
//! value in the dialect's canonical style:
//!
//! | Dialect          | Placeholder        |
//! |------------------|--------------------|
//! | mysql, postgres  | `%s`, `%(name)s`   |
//! | mssql            | `?`                |
//! | oracle           | `:1`, `:2`, `:name`|
//!
//! Values are never interpolated into SQL text.

use serde_json::Value as JsonValue;

use super::lexer;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnMap, CompiledStatement, DeleteSpec, Dialect, InsertSpec, OperationDescriptor, Params,
    QueryParam, RawParams, RawQuerySpec, SelectSpec, UpdateSpec,
};

/// Compile a descriptor into SQL text and parameters for `dialect`.
pub fn compile(dialect: Dialect, op: &OperationDescriptor) -> DbResult<CompiledStatement> {
    match op {
        OperationDescriptor::Select(spec) => build_select(dialect, spec),
        OperationDescriptor::Insert(spec) => build_insert(dialect, spec),
        OperationDescriptor::Update(spec) => build_update(dialect, spec),
        OperationDescriptor::Delete(spec) => build_delete(dialect, spec),
        OperationDescriptor::RawQuery(spec) => build_raw(dialect, spec),
    }
}

fn build_select(dialect: Dialect, spec: &SelectSpec) -> DbResult<CompiledStatement> {
    let table = validate_table(&spec.table)?;
    require_entries("filter", &spec.filter)?;
    let fields = validate_fields(spec.fields.as_deref())?;

    let mut binder = PlaceholderSequence::new(dialect);
    let conditions = binder.conditions(&spec.filter)?;
    let sql = format!("SELECT {} FROM {} WHERE {}", fields, table, conditions);
    Ok(CompiledStatement::new(sql, binder.into_params()))
}

fn build_insert(dialect: Dialect, spec: &InsertSpec) -> DbResult<CompiledStatement> {
    let table = validate_table(&spec.table)?;
    require_entries("data", &spec.data)?;

    let mut binder = PlaceholderSequence::new(dialect);
    let mut columns = Vec::with_capacity(spec.data.len());
    let mut placeholders = Vec::with_capacity(spec.data.len());
    for (column, value) in &spec.data {
        columns.push(validate_column(column)?);
        placeholders.push(binder.bind(value));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(CompiledStatement::new(sql, binder.into_params()))
}

fn build_update(dialect: Dialect, spec: &UpdateSpec) -> DbResult<CompiledStatement> {
    let table = validate_table(&spec.table)?;
    require_entries("filter", &spec.filter)?;
    require_entries("data", &spec.data)?;

    // SET values bind before WHERE values
    let mut binder = PlaceholderSequence::new(dialect);
    let assignments = binder.assignments(&spec.data, ", ")?;
    let conditions = binder.conditions(&spec.filter)?;
    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments, conditions);
    Ok(CompiledStatement::new(sql, binder.into_params()))
}

fn build_delete(dialect: Dialect, spec: &DeleteSpec) -> DbResult<CompiledStatement> {
    let table = validate_table(&spec.table)?;
    require_entries("filter", &spec.filter)?;

    let mut binder = PlaceholderSequence::new(dialect);
    let conditions = binder.conditions(&spec.filter)?;
    let sql = format!("DELETE FROM {} WHERE {}", table, conditions);
    Ok(CompiledStatement::new(sql, binder.into_params()))
}

fn build_raw(dialect: Dialect, spec: &RawQuerySpec) -> DbResult<CompiledStatement> {
    if spec.sql.trim().is_empty() {
        return Err(DbError::validation("sql must not be empty"));
    }

    let params = match &spec.params {
        RawParams::Named(map) => Params::named_from_json(map),
        RawParams::Positional(values) => Params::positional_from_json(values),
    };

    let sql = match (dialect, &params) {
        (Dialect::MySql | Dialect::Postgres, Params::Named(pairs)) if !pairs.is_empty() => {
            rewrite_named_markers(&spec.sql, dialect, &params)?
        }
        _ => spec.sql.clone(),
    };

    Ok(CompiledStatement::new(sql, params))
}

/// Rewrite `:name` to `%(name)s` for every name present in `params`.
///
/// Markers inside literals, quoted identifiers and comments are left alone,
/// as are `::` casts and markers whose identifier is not a parameter key.
pub fn rewrite_named_markers(sql: &str, dialect: Dialect, params: &Params) -> DbResult<String> {
    lexer::rewrite_code(sql, dialect, |code, out| {
        let mut last = 0;
        let mut idx = 0;
        while idx < code.len() {
            let marker = lexer::colon_marker_at(code, idx).filter(|n| params.get(n).is_some());
            if let Some(name) = marker {
                out.push_str(&code[last..idx]);
                out.push_str("%(");
                out.push_str(name);
                out.push_str(")s");
                idx += name.len() + 1;
                last = idx;
                continue;
            }
            idx += 1;
        }
        out.push_str(&code[last..]);
        Ok(())
    })
}

/// Generates the dialect's positional placeholders and collects bound values.
struct PlaceholderSequence {
    dialect: Dialect,
    values: Vec<QueryParam>,
}

impl PlaceholderSequence {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: &JsonValue) -> String {
        self.values.push(QueryParam::from(value));
        match self.dialect {
            Dialect::MySql | Dialect::Postgres => "%s".to_string(),
            Dialect::Mssql => "?".to_string(),
            Dialect::Oracle => format!(":{}", self.values.len()),
        }
    }

    fn assignments(&mut self, columns: &ColumnMap, separator: &str) -> DbResult<String> {
        let mut parts = Vec::with_capacity(columns.len());
        for (column, value) in columns {
            let column = validate_column(column)?;
            parts.push(format!("{} = {}", column, self.bind(value)));
        }
        Ok(parts.join(separator))
    }

    fn conditions(&mut self, filter: &ColumnMap) -> DbResult<String> {
        self.assignments(filter, " AND ")
    }

    fn into_params(self) -> Params {
        Params::Positional(self.values)
    }
}

fn require_entries(what: &str, map: &ColumnMap) -> DbResult<()> {
    if map.is_empty() {
        return Err(DbError::validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn validate_table(table: &str) -> DbResult<&str> {
    let table = table.trim();
    if table.is_empty() {
        return Err(DbError::validation("table must not be empty"));
    }
    if !is_identifier(table) {
        return Err(DbError::validation(format!(
            "Invalid table name '{}'",
            table
        )));
    }
    Ok(table)
}

fn validate_column(column: &str) -> DbResult<&str> {
    let column = column.trim();
    if !is_identifier(column) {
        return Err(DbError::validation(format!(
            "Invalid column name '{}'",
            column
        )));
    }
    Ok(column)
}

/// Comma separated select list; `*` and `alias.*` are allowed.
fn validate_fields(fields: Option<&str>) -> DbResult<String> {
    let fields = fields.map(str::trim).unwrap_or("");
    if fields.is_empty() {
        return Ok("*".to_string());
    }

    let mut items = Vec::new();
    for item in fields.split(',') {
        let item = item.trim();
        let valid = item == "*"
            || match item.strip_suffix(".*") {
                Some(prefix) => is_identifier(prefix),
                None => is_identifier(item),
            };
        if !valid {
            return Err(DbError::validation(format!("Invalid field '{}'", item)));
        }
        items.push(item);
    }
    Ok(items.join(", "))
}

/// Dot separated parts, each `[A-Za-z_][A-Za-z0-9_$#]*`.
fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_identifier_part)
}

fn is_identifier_part(part: &str) -> bool {
    let mut bytes = part.bytes();
    match bytes.next() {
        Some(first) if lexer::is_ident_start(first) => {
            bytes.all(|b| lexer::is_ident_char(b) || b == b'$' || b == b'#')
        }
        _ => false,
    }
}
