//! Canonical placeholders to native driver markers.
//!
//! The builder emits `%s`/`%(name)s` for MySQL and PostgreSQL and `?` or
//! `:name` for SQL Server. Drivers want `?`, `$n` and `@Pn` respectively, with
//! values flattened into bind order.

use super::lexer;
use crate::error::{DbError, DbResult};
use crate::models::{CompiledStatement, Dialect, Params, QueryParam};

/// Native marker style of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStyle {
    /// `?` (MySQL)
    Question,
    /// `$1`, `$2` (PostgreSQL)
    Dollar,
    /// `@P1`, `@P2` (SQL Server)
    AtP,
}

impl NativeStyle {
    fn marker(self, index: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${}", index),
            Self::AtP => format!("@P{}", index),
        }
    }

    /// Whether a repeated name can reuse one bind slot.
    fn numbered(self) -> bool {
        !matches!(self, Self::Question)
    }
}

/// SQL text in native markers plus values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeStatement {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

/// Translate `%s`, `%(name)s` and `%%` (MySQL and PostgreSQL).
pub fn translate_pyformat(
    stmt: &CompiledStatement,
    dialect: Dialect,
    style: NativeStyle,
) -> DbResult<NativeStatement> {
    if stmt.params.is_empty() {
        return Ok(verbatim(stmt));
    }

    let mut binder = Binder::new(&stmt.params, style);
    let sql = lexer::rewrite_code(&stmt.sql, dialect, |code, out| {
        let bytes = code.as_bytes();
        let mut last = 0;
        let mut idx = 0;
        while idx < bytes.len() {
            if bytes[idx] != b'%' {
                idx += 1;
                continue;
            }
            let (replacement, consumed) = match bytes.get(idx + 1) {
                Some(b'%') => ("%".to_string(), 2),
                Some(b's') => (binder.positional()?, 2),
                Some(b'(') => match named_pyformat_len(code, idx) {
                    Some((name, len)) => (binder.named(name)?, len),
                    None => {
                        idx += 1;
                        continue;
                    }
                },
                _ => {
                    idx += 1;
                    continue;
                }
            };
            out.push_str(&code[last..idx]);
            out.push_str(&replacement);
            idx += consumed;
            last = idx;
        }
        out.push_str(&code[last..]);
        Ok(())
    })?;

    Ok(NativeStatement {
        sql,
        values: binder.finish()?,
    })
}

/// Translate `?` and, with named parameters, `:name` to `@Pn` (SQL Server).
pub fn translate_qmark(stmt: &CompiledStatement) -> DbResult<NativeStatement> {
    if stmt.params.is_empty() {
        return Ok(verbatim(stmt));
    }

    let named = matches!(stmt.params, Params::Named(_));
    let mut binder = Binder::new(&stmt.params, NativeStyle::AtP);
    let sql = lexer::rewrite_code(&stmt.sql, Dialect::Mssql, |code, out| {
        let bytes = code.as_bytes();
        let mut last = 0;
        let mut idx = 0;
        while idx < bytes.len() {
            let (replacement, consumed) = if bytes[idx] == b'?' {
                (binder.positional()?, 1)
            } else if let Some(name) = lexer::colon_marker_at(code, idx).filter(|_| named) {
                (binder.named(name)?, name.len() + 1)
            } else {
                idx += 1;
                continue;
            };
            out.push_str(&code[last..idx]);
            out.push_str(&replacement);
            idx += consumed;
            last = idx;
        }
        out.push_str(&code[last..]);
        Ok(())
    })?;

    Ok(NativeStatement {
        sql,
        values: binder.finish()?,
    })
}

/// Named values whose `:name` marker appears in the SQL (Oracle).
///
/// Oracle rejects binds for names the statement does not reference, so
/// extra keys supplied by the caller are dropped here.
pub fn referenced_named(stmt: &CompiledStatement) -> DbResult<Vec<(String, QueryParam)>> {
    let Params::Named(pairs) = &stmt.params else {
        return Ok(Vec::new());
    };

    let mut bound: Vec<(String, QueryParam)> = Vec::new();
    for marker in lexer::colon_markers(&stmt.sql, Dialect::Oracle) {
        if bound.iter().any(|(name, _)| name.eq_ignore_ascii_case(&marker)) {
            continue;
        }
        let value = pairs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&marker))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| missing_key(&marker))?;
        bound.push((marker, value));
    }
    Ok(bound)
}

fn verbatim(stmt: &CompiledStatement) -> NativeStatement {
    NativeStatement {
        sql: stmt.sql.clone(),
        values: Vec::new(),
    }
}

/// `%(name)s` at `idx`: returns the name and the token length.
fn named_pyformat_len(code: &str, idx: usize) -> Option<(&str, usize)> {
    let close = code[idx + 2..].find(')')? + idx + 2;
    let name = &code[idx + 2..close];
    if name.is_empty() || code.as_bytes().get(close + 1) != Some(&b's') {
        return None;
    }
    Some((name, close + 2 - idx))
}

fn missing_key(name: &str) -> DbError {
    DbError::validation(format!("Missing value for parameter '{}'", name))
}

struct Binder<'p> {
    params: &'p Params,
    style: NativeStyle,
    next_positional: usize,
    values: Vec<QueryParam>,
    slots: Vec<(&'p str, usize)>,
}

impl<'p> Binder<'p> {
    fn new(params: &'p Params, style: NativeStyle) -> Self {
        Self {
            params,
            style,
            next_positional: 0,
            values: Vec::with_capacity(params.len()),
            slots: Vec::new(),
        }
    }

    fn positional(&mut self) -> DbResult<String> {
        let Params::Positional(values) = self.params else {
            return Err(DbError::validation(
                "Positional placeholder used with named parameters",
            ));
        };
        let value = values.get(self.next_positional).ok_or_else(|| {
            DbError::validation(format!(
                "Statement has more placeholders than the {} supplied parameters",
                values.len()
            ))
        })?;
        self.next_positional += 1;
        Ok(self.push(value.clone()))
    }

    fn named(&mut self, name: &str) -> DbResult<String> {
        let Params::Named(pairs) = self.params else {
            return Err(DbError::validation(format!(
                "Named placeholder '{}' used with positional parameters",
                name
            )));
        };
        if self.style.numbered() {
            if let Some((_, slot)) = self.slots.iter().find(|(n, _)| *n == name) {
                return Ok(self.style.marker(*slot));
            }
        }
        let (key, value) = pairs
            .iter()
            .find(|(key, _)| key == name)
            .ok_or_else(|| missing_key(name))?;
        let marker = self.push(value.clone());
        self.slots.push((key.as_str(), self.values.len()));
        Ok(marker)
    }

    fn push(&mut self, value: QueryParam) -> String {
        self.values.push(value);
        self.style.marker(self.values.len())
    }

    fn finish(self) -> DbResult<Vec<QueryParam>> {
        if let Params::Positional(values) = self.params {
            if self.next_positional != values.len() {
                return Err(DbError::validation(format!(
                    "Statement has {} placeholders but {} parameters were supplied",
                    self.next_positional,
                    values.len()
                )));
            }
        }
        Ok(self.values)
    }
}
