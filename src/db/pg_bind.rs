//! PostgreSQL parameter encoding.
//!
//! sqlx sends every parameter in binary format, so the bytes must match the
//! parameter type the server settled on when the statement was prepared. A
//! JSON string bound as TEXT cannot land in a DATE, UUID or INTEGER column.
//! [`PgBind::coerce`] converts each request value into the Rust type for the
//! inferred parameter type before it is bound.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Encode, Postgres, Type, TypeInfo};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;

const NUMERIC_OID: Oid = Oid(1700);
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Largest decimal exponent accepted in a NUMERIC literal.
const MAX_NUMERIC_EXPONENT: u32 = 16383;

/// A request value converted for one PostgreSQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum PgBind {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Binary NUMERIC payload.
    Numeric(Vec<u8>),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(JsonValue),
}

impl PgBind {
    /// Convert `param` for a parameter the server typed as `ty`.
    ///
    /// Types without a dedicated conversion receive the value's text, which
    /// is also the binary form of enums and the character types.
    pub fn coerce(param: &QueryParam, ty: &PgTypeInfo) -> DbResult<Self> {
        if matches!(param, QueryParam::Null) {
            return Ok(Self::Null);
        }

        let name = ty.name();
        let converted = match name {
            "BOOL" => as_bool(param).map(Self::Bool),
            "INT2" => as_i64(param)
                .and_then(|v| i16::try_from(v).ok())
                .map(Self::Int2),
            "INT4" => as_i64(param)
                .and_then(|v| i32::try_from(v).ok())
                .map(Self::Int4),
            "INT8" => as_i64(param).map(Self::Int8),
            "FLOAT4" => as_f64(param).map(|v| Self::Float4(v as f32)),
            "FLOAT8" => as_f64(param).map(Self::Float8),
            "NUMERIC" => numeric_bytes(&plain_text(param)).map(Self::Numeric),
            "DATE" => text_of(param).and_then(parse_date).map(Self::Date),
            "TIME" => text_of(param).and_then(parse_time).map(Self::Time),
            "TIMESTAMP" => text_of(param)
                .and_then(parse_timestamp)
                .map(Self::Timestamp),
            "TIMESTAMPTZ" => text_of(param)
                .and_then(parse_timestamptz)
                .map(Self::TimestampTz),
            "UUID" => text_of(param)
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .map(Self::Uuid),
            "JSON" | "JSONB" => Some(Self::Json(json_of(param))),
            "BYTEA" => Some(Self::Bytes(bytes_of(param))),
            _ => Some(Self::Text(plain_text(param))),
        };

        converted.ok_or_else(|| {
            DbError::validation(format!(
                "Cannot bind {} value {} to a {} parameter",
                param.type_name(),
                plain_text(param),
                name
            ))
        })
    }

    /// Conversion used when the server reported no parameter types.
    pub fn untyped(param: &QueryParam) -> Self {
        match param {
            QueryParam::Null => Self::Null,
            QueryParam::Bool(v) => Self::Bool(*v),
            QueryParam::Int(v) => Self::Int8(*v),
            QueryParam::UInt(v) => match numeric_bytes(&v.to_string()) {
                Some(bytes) => Self::Numeric(bytes),
                None => Self::Text(v.to_string()),
            },
            QueryParam::Float(v) => Self::Float8(*v),
            QueryParam::String(v) => Self::Text(v.clone()),
        }
    }

    pub fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Self::Null => query.bind(None::<String>),
            Self::Bool(v) => query.bind(v),
            Self::Int2(v) => query.bind(v),
            Self::Int4(v) => query.bind(v),
            Self::Int8(v) => query.bind(v),
            Self::Float4(v) => query.bind(v),
            Self::Float8(v) => query.bind(v),
            Self::Numeric(bytes) => query.bind(NumericBytes(bytes)),
            Self::Text(v) => query.bind(v),
            Self::Bytes(v) => query.bind(v),
            Self::Date(v) => query.bind(v),
            Self::Time(v) => query.bind(v),
            Self::Timestamp(v) => query.bind(v),
            Self::TimestampTz(v) => query.bind(v),
            Self::Uuid(v) => query.bind(v),
            Self::Json(v) => query.bind(Json(v)),
        }
    }
}

/// Pre-encoded binary NUMERIC.
struct NumericBytes(Vec<u8>);

impl Type<Postgres> for NumericBytes {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(NUMERIC_OID)
    }
}

impl Encode<'_, Postgres> for NumericBytes {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&[u8] as Encode<Postgres>>::encode_by_ref(&self.0.as_slice(), buf)
    }
}

fn as_bool(param: &QueryParam) -> Option<bool> {
    match param {
        QueryParam::Bool(v) => Some(*v),
        QueryParam::Int(v) => Some(*v != 0),
        QueryParam::UInt(v) => Some(*v != 0),
        QueryParam::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        QueryParam::Float(_) | QueryParam::Null => None,
    }
}

fn as_i64(param: &QueryParam) -> Option<i64> {
    match param {
        QueryParam::Int(v) => Some(*v),
        QueryParam::UInt(v) => i64::try_from(*v).ok(),
        QueryParam::Bool(v) => Some(i64::from(*v)),
        QueryParam::Float(v) => {
            if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
                Some(*v as i64)
            } else {
                None
            }
        }
        QueryParam::String(s) => s.trim().parse().ok(),
        QueryParam::Null => None,
    }
}

fn as_f64(param: &QueryParam) -> Option<f64> {
    match param {
        QueryParam::Int(v) => Some(*v as f64),
        QueryParam::UInt(v) => Some(*v as f64),
        QueryParam::Float(v) => Some(*v),
        QueryParam::String(s) => s.trim().parse().ok(),
        QueryParam::Bool(_) | QueryParam::Null => None,
    }
}

fn text_of(param: &QueryParam) -> Option<&str> {
    match param {
        QueryParam::String(s) => Some(s.trim()),
        _ => None,
    }
}

fn plain_text(param: &QueryParam) -> String {
    match param {
        QueryParam::Null => "null".to_string(),
        QueryParam::Bool(v) => v.to_string(),
        QueryParam::Int(v) => v.to_string(),
        QueryParam::UInt(v) => v.to_string(),
        QueryParam::Float(v) => v.to_string(),
        QueryParam::String(s) => s.clone(),
    }
}

/// JSON column value: strings holding JSON text are parsed, others are kept
/// as JSON strings.
fn json_of(param: &QueryParam) -> JsonValue {
    match param {
        QueryParam::Null => JsonValue::Null,
        QueryParam::Bool(v) => JsonValue::Bool(*v),
        QueryParam::Int(v) => JsonValue::from(*v),
        QueryParam::UInt(v) => JsonValue::from(*v),
        QueryParam::Float(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        QueryParam::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone()))
        }
    }
}

/// BYTEA value: base64 text as returned by the read path, else raw bytes.
fn bytes_of(param: &QueryParam) -> Vec<u8> {
    match param {
        QueryParam::String(s) => BASE64
            .decode(s.trim())
            .unwrap_or_else(|_| s.as_bytes().to_vec()),
        other => plain_text(other).into_bytes(),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|t| t.date()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_local()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Offsets are honored; a value without one is taken as UTC.
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .or_else(|| parse_timestamp(s).map(|t| t.and_utc()))
}

/// Binary NUMERIC for a decimal literal such as `-12.50` or `1e3`.
///
/// Layout: ndigits, weight, sign and dscale as big-endian 16-bit words,
/// followed by the base-10000 digits.
pub fn numeric_bytes(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        return Some(numeric_payload(0, NUMERIC_NAN, 0, &[]));
    }

    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], unsigned[pos + 1..].parse::<i32>().ok()?),
        None => (unsigned, 0),
    };
    if exponent.unsigned_abs() > MAX_NUMERIC_EXPONENT {
        return None;
    }
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part
        .bytes()
        .chain(frac_part.bytes())
        .all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let dscale = u16::try_from((frac_part.len() as i32 - exponent).max(0)).ok()?;
    let mut digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes())
        .map(|b| b - b'0')
        .collect();
    let mut point = int_part.len() as i32 + exponent;

    // decimal point on a group boundary, at least one integer group
    while point <= 0 || point % 4 != 0 {
        digits.insert(0, 0);
        point += 1;
    }
    while (digits.len() as i32) < point || digits.len() % 4 != 0 {
        digits.push(0);
    }

    let mut groups: Vec<i16> = digits
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, d| acc * 10 + i16::from(*d)))
        .collect();
    let mut weight = point / 4 - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        return Some(numeric_payload(0, NUMERIC_POS, dscale, &[]));
    }
    let sign = if negative { NUMERIC_NEG } else { NUMERIC_POS };
    Some(numeric_payload(i16::try_from(weight).ok()?, sign, dscale, &groups))
}

fn numeric_payload(weight: i16, sign: u16, dscale: u16, groups: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + groups.len() * 2);
    out.extend_from_slice(&(groups.len() as i16).to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    for group in groups {
        out.extend_from_slice(&group.to_be_bytes());
    }
    out
}

/// Text form of a binary NUMERIC, keeping its display scale.
pub fn numeric_text(bytes: &[u8]) -> Option<String> {
    let word = |at: usize| {
        bytes
            .get(at..at + 2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);
    if sign == NUMERIC_NAN {
        return Some("NaN".to_string());
    }
    let groups = (0..ndigits)
        .map(|i| word(8 + i * 2))
        .collect::<Option<Vec<u16>>>()?;
    let group = |idx: i32| {
        usize::try_from(idx)
            .ok()
            .and_then(|i| groups.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && !groups.is_empty() {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for idx in 1..=weight {
            out.push_str(&format!("{:04}", group(idx)));
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(idx)));
            idx += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(name: &'static str) -> PgTypeInfo {
        PgTypeInfo::with_name(name)
    }

    fn string(s: &str) -> QueryParam {
        QueryParam::from(s)
    }

    #[test]
    fn test_strings_take_the_inferred_column_type() {
        assert_eq!(
            PgBind::coerce(&string("2024-01-02"), &ty("DATE")).unwrap(),
            PgBind::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
        assert_eq!(
            PgBind::coerce(&string("5"), &ty("INT4")).unwrap(),
            PgBind::Int4(5)
        );
        assert_eq!(
            PgBind::coerce(&string("67e55044-10b1-426f-9247-bb680e5fe0c8"), &ty("UUID")).unwrap(),
            PgBind::Uuid(Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap())
        );
        assert_eq!(
            PgBind::coerce(&string("active"), &ty("VARCHAR")).unwrap(),
            PgBind::Text("active".to_string())
        );
    }

    #[test]
    fn test_null_binds_for_any_type() {
        for name in ["INT4", "DATE", "UUID", "NUMERIC", "TEXT"] {
            assert_eq!(
                PgBind::coerce(&QueryParam::Null, &ty(name)).unwrap(),
                PgBind::Null
            );
        }
    }

    #[test]
    fn test_timestamps() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(
            PgBind::coerce(&string("2024-01-02 10:30:00"), &ty("TIMESTAMP")).unwrap(),
            PgBind::Timestamp(naive)
        );
        assert_eq!(
            PgBind::coerce(&string("2024-01-02T12:30:00+02:00"), &ty("TIMESTAMPTZ")).unwrap(),
            PgBind::TimestampTz(naive.and_utc())
        );
        assert_eq!(
            PgBind::coerce(&string("2024-01-02T10:30:00"), &ty("TIMESTAMPTZ")).unwrap(),
            PgBind::TimestampTz(naive.and_utc())
        );
    }

    #[test]
    fn test_numbers_narrow_to_column_width() {
        assert_eq!(
            PgBind::coerce(&QueryParam::Int(7), &ty("INT2")).unwrap(),
            PgBind::Int2(7)
        );
        assert_eq!(
            PgBind::coerce(&QueryParam::Float(2.0), &ty("INT8")).unwrap(),
            PgBind::Int8(2)
        );
        assert_eq!(
            PgBind::coerce(&QueryParam::Int(3), &ty("FLOAT8")).unwrap(),
            PgBind::Float8(3.0)
        );
        assert!(matches!(
            PgBind::coerce(&QueryParam::Int(70_000), &ty("INT2")),
            Err(DbError::Validation { .. })
        ));
        assert!(matches!(
            PgBind::coerce(&QueryParam::UInt(u64::MAX), &ty("INT8")),
            Err(DbError::Validation { .. })
        ));
        assert_eq!(
            PgBind::coerce(&QueryParam::UInt(u64::MAX), &ty("NUMERIC")).unwrap(),
            PgBind::Numeric(numeric_bytes("18446744073709551615").unwrap())
        );
    }

    #[test]
    fn test_unparsable_value_is_validation_error() {
        let err = PgBind::coerce(&string("yesterday-ish"), &ty("DATE")).unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(err.to_string().contains("DATE"));
    }

    #[test]
    fn test_bool_and_json() {
        assert_eq!(
            PgBind::coerce(&string("t"), &ty("BOOL")).unwrap(),
            PgBind::Bool(true)
        );
        assert_eq!(
            PgBind::coerce(&string(r#"{"a":1}"#), &ty("JSONB")).unwrap(),
            PgBind::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            PgBind::coerce(&string("plain"), &ty("JSON")).unwrap(),
            PgBind::Json(JsonValue::String("plain".to_string()))
        );
    }

    #[test]
    fn test_numeric_bytes() {
        // 123.45 -> digits [123, 4500], weight 0, dscale 2
        assert_eq!(
            numeric_bytes("123.45").unwrap(),
            vec![0, 2, 0, 0, 0, 0, 0, 2, 0, 123, 0x11, 0x94]
        );
        // -0.001 -> digits [10], weight -1, dscale 3
        assert_eq!(
            numeric_bytes("-0.001").unwrap(),
            vec![0, 1, 0xff, 0xff, 0x40, 0x00, 0, 3, 0, 10]
        );
        // 1e3 -> digits [1000], weight 0
        assert_eq!(
            numeric_bytes("1e3").unwrap(),
            vec![0, 1, 0, 0, 0, 0, 0, 0, 0x03, 0xe8]
        );
        assert_eq!(numeric_bytes("0").unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 0]);
        // 18446744073709551615 -> [1844, 6744, 737, 955, 1615], weight 4
        let max = numeric_bytes(&u64::MAX.to_string()).unwrap();
        assert_eq!(&max[..4], &[0u8, 5, 0, 4][..]);
        assert!(numeric_bytes("12a").is_none());
        assert!(numeric_bytes("").is_none());
        assert!(numeric_bytes(".").is_none());
    }

    #[test]
    fn test_numeric_text() {
        for text in ["123.45", "-0.001", "12.50", "0", "1000", "18446744073709551615"] {
            let bytes = numeric_bytes(text).unwrap();
            assert_eq!(numeric_text(&bytes).unwrap(), text);
        }
        assert_eq!(numeric_text(&numeric_bytes("NaN").unwrap()).unwrap(), "NaN");
        assert!(numeric_text(&[0, 1]).is_none());
    }

    #[test]
    fn test_untyped_keeps_native_types() {
        assert_eq!(PgBind::untyped(&QueryParam::Int(1)), PgBind::Int8(1));
        assert_eq!(PgBind::untyped(&string("x")), PgBind::Text("x".to_string()));
        assert!(matches!(
            PgBind::untyped(&QueryParam::UInt(u64::MAX)),
            PgBind::Numeric(_)
        ));
    }
}
