//! Per-value encoding of result columns and decoding of bound parameters,
//! in both text and binary formats.

use bytes::{BufMut, BytesMut};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use pgbridge_core::pgtype::oids;
use pgbridge_core::{GatewayError, PgType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    Text,
    Binary,
}

impl FormatCode {
    pub fn from_code(code: i16) -> Result<Self, GatewayError> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            other => Err(GatewayError::InvalidMessage(format!("invalid format code {other}"))),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            FormatCode::Text => 0,
            FormatCode::Binary => 1,
        }
    }
}

/// Expands Bind-time format codes to one code per column: no codes means
/// text everywhere, a single code applies to every column, otherwise the
/// count must match the column count.
pub fn resolve_formats(codes: &[i16], columns: usize) -> Result<Vec<FormatCode>, GatewayError> {
    match codes.len() {
        0 => Ok(vec![FormatCode::Text; columns]),
        1 => Ok(vec![FormatCode::from_code(codes[0])?; columns]),
        n if n == columns => codes.iter().map(|c| FormatCode::from_code(*c)).collect(),
        n => Err(GatewayError::InvalidMessage(format!(
            "bind message has {n} result formats but query has {columns} columns"
        ))),
    }
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

fn pg_epoch() -> NaiveDateTime {
    pg_epoch_date().and_time(NaiveTime::MIN)
}

/// Encodes one value for a column of type `pg`. NULL is always `None`,
/// which the DataRow writer turns into the -1 length sentinel.
pub fn encode_value(
    value: &Value,
    pg: &PgType,
    format: FormatCode,
) -> Result<Option<Vec<u8>>, GatewayError> {
    if value.is_null() {
        return Ok(None);
    }
    let bytes = match format {
        FormatCode::Text => encode_text(value, pg)?.into_bytes(),
        FormatCode::Binary => encode_binary(value, pg)?,
    };
    Ok(Some(bytes))
}

fn mismatch(value: &Value, pg: &PgType) -> GatewayError {
    GatewayError::Internal(format!("cannot encode {value:?} as {}", pg.name))
}

fn encode_text(value: &Value, pg: &PgType) -> Result<String, GatewayError> {
    let text = match pg.oid {
        oids::BOOL => match value.as_bool() {
            Some(true) => "t".to_string(),
            Some(false) => "f".to_string(),
            None => return Err(mismatch(value, pg)),
        },
        oids::INT2 | oids::INT4 | oids::INT8 | oids::OID => match value {
            Value::Text(s) => s.trim().to_string(),
            other => other.as_i64().ok_or_else(|| mismatch(value, pg))?.to_string(),
        },
        oids::FLOAT4 | oids::FLOAT8 => {
            let v = value.as_f64().ok_or_else(|| mismatch(value, pg))?;
            format_float(v)
        }
        oids::TIMESTAMP | oids::TIMESTAMPTZ => match value {
            Value::Timestamp(ts) => format_timestamp(ts),
            Value::Date(d) => format_timestamp(&d.and_time(NaiveTime::MIN)),
            other => other.to_string(),
        },
        oids::TIME => match value {
            Value::Time(t) => format_time(t),
            other => other.to_string(),
        },
        oids::BYTEA => match value {
            Value::Bytes(bytes) => Value::Bytes(bytes.clone()).to_string(),
            other => Value::Bytes(other.to_string().into_bytes()).to_string(),
        },
        oids::VECTOR => match value {
            Value::Text(s) => match Value::parse_vector(s) {
                Some(items) => Value::Vector(items).to_string(),
                None => s.clone(),
            },
            other => other.to_string(),
        },
        _ if pg.is_array() => match value {
            Value::Array(items) => format_array(items),
            Value::Vector(items) => format_array(
                &items.iter().map(|f| Value::Float(f64::from(*f))).collect::<Vec<_>>(),
            ),
            other => other.to_string(),
        },
        _ => match value {
            Value::Bool(b) if pg.oid == oids::TEXT || pg.oid == oids::VARCHAR => {
                (if *b { "1" } else { "0" }).to_string()
            }
            Value::Float(f) => format_float(*f),
            Value::Timestamp(ts) => format_timestamp(ts),
            other => other.to_string(),
        },
    };
    Ok(text)
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        (if v > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else {
        v.to_string()
    }
}

fn micros_suffix(nanos: u32) -> String {
    let micros = nanos / 1_000;
    if micros == 0 {
        return String::new();
    }
    let digits = format!("{micros:06}");
    format!(".{}", digits.trim_end_matches('0'))
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    format!(
        "{}{}",
        ts.format("%Y-%m-%d %H:%M:%S"),
        micros_suffix(ts.nanosecond())
    )
}

fn format_time(t: &NaiveTime) -> String {
    format!("{}{}", t.format("%H:%M:%S"), micros_suffix(t.nanosecond()))
}

fn format_array(items: &[Value]) -> String {
    let mut out = String::from("{");
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Text(s) => {
                let needs_quotes = s.is_empty()
                    || s.eq_ignore_ascii_case("null")
                    || s.chars().any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\' | ' '));
                if needs_quotes {
                    out.push('"');
                    for c in s.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                } else {
                    out.push_str(s);
                }
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            other => out.push_str(&other.to_string()),
        }
    }
    out.push('}');
    out
}

fn encode_binary(value: &Value, pg: &PgType) -> Result<Vec<u8>, GatewayError> {
    let mut buf = BytesMut::new();
    match pg.oid {
        oids::BOOL => buf.put_u8(u8::from(value.as_bool().ok_or_else(|| mismatch(value, pg))?)),
        oids::INT2 => {
            let v = value.as_i64().ok_or_else(|| mismatch(value, pg))?;
            buf.put_i16(i16::try_from(v).map_err(|_| mismatch(value, pg))?);
        }
        oids::INT4 => {
            let v = value.as_i64().ok_or_else(|| mismatch(value, pg))?;
            buf.put_i32(i32::try_from(v).map_err(|_| mismatch(value, pg))?);
        }
        oids::INT8 => buf.put_i64(value.as_i64().ok_or_else(|| mismatch(value, pg))?),
        oids::OID | oids::REGCLASS => {
            let v = value.as_i64().ok_or_else(|| mismatch(value, pg))?;
            buf.put_u32(u32::try_from(v).map_err(|_| mismatch(value, pg))?);
        }
        oids::FLOAT4 => buf.put_f32(value.as_f64().ok_or_else(|| mismatch(value, pg))? as f32),
        oids::FLOAT8 => buf.put_f64(value.as_f64().ok_or_else(|| mismatch(value, pg))?),
        oids::NUMERIC => {
            let text = match value {
                Value::Float(f) => format_float(*f),
                other => other.to_string(),
            };
            encode_numeric(&mut buf, &text).ok_or_else(|| mismatch(value, pg))?;
        }
        oids::DATE => {
            let date = match value {
                Value::Date(d) => *d,
                Value::Timestamp(ts) => ts.date(),
                Value::Text(s) => parse_date(s).ok_or_else(|| mismatch(value, pg))?,
                _ => return Err(mismatch(value, pg)),
            };
            let days = date.signed_duration_since(pg_epoch_date()).num_days();
            buf.put_i32(i32::try_from(days).map_err(|_| mismatch(value, pg))?);
        }
        oids::TIME => {
            let time = match value {
                Value::Time(t) => *t,
                Value::Timestamp(ts) => ts.time(),
                Value::Text(s) => parse_time(s).ok_or_else(|| mismatch(value, pg))?,
                _ => return Err(mismatch(value, pg)),
            };
            let micros = i64::from(time.num_seconds_from_midnight()) * 1_000_000
                + i64::from(time.nanosecond() / 1_000);
            buf.put_i64(micros);
        }
        oids::TIMESTAMP | oids::TIMESTAMPTZ => {
            let ts = match value {
                Value::Timestamp(ts) => *ts,
                Value::Date(d) => d.and_time(NaiveTime::MIN),
                Value::Text(s) => parse_timestamp(s).ok_or_else(|| mismatch(value, pg))?,
                _ => return Err(mismatch(value, pg)),
            };
            let micros = ts
                .signed_duration_since(pg_epoch())
                .num_microseconds()
                .ok_or_else(|| mismatch(value, pg))?;
            buf.put_i64(micros);
        }
        oids::BYTEA => match value {
            Value::Bytes(bytes) => buf.extend_from_slice(bytes),
            other => buf.extend_from_slice(other.to_string().as_bytes()),
        },
        oids::VECTOR => {
            let items = match value {
                Value::Vector(items) => items.clone(),
                Value::Text(s) => Value::parse_vector(s).ok_or_else(|| mismatch(value, pg))?,
                _ => return Err(mismatch(value, pg)),
            };
            buf.put_i16(items.len() as i16);
            buf.put_i16(0);
            for item in items {
                buf.put_f32(item);
            }
        }
        _ if pg.is_array() => {
            let elem = pg.element().ok_or_else(|| mismatch(value, pg))?;
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                Value::Vector(items) => items.iter().map(|f| Value::Float(f64::from(*f))).collect(),
                _ => return Err(mismatch(value, pg)),
            };
            encode_array(&mut buf, &items, &elem)?;
        }
        _ => match value {
            Value::Bytes(bytes) => buf.extend_from_slice(bytes),
            other => buf.extend_from_slice(encode_text(other, pg)?.as_bytes()),
        },
    }
    Ok(buf.to_vec())
}

fn encode_array(buf: &mut BytesMut, items: &[Value], elem: &PgType) -> Result<(), GatewayError> {
    if items.is_empty() {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(elem.oid);
        return Ok(());
    }
    buf.put_i32(1);
    buf.put_i32(i32::from(items.iter().any(Value::is_null)));
    buf.put_u32(elem.oid);
    buf.put_i32(items.len() as i32);
    buf.put_i32(1);
    for item in items {
        match encode_value(item, elem, FormatCode::Binary)? {
            Some(bytes) => {
                buf.put_i32(bytes.len() as i32);
                buf.extend_from_slice(&bytes);
            }
            None => buf.put_i32(-1),
        }
    }
    Ok(())
}

/// PostgreSQL binary numeric: base-10000 digits with weight, sign and
/// display scale.
fn encode_numeric(buf: &mut BytesMut, text: &str) -> Option<()> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        buf.put_i16(0);
        buf.put_i16(0);
        buf.put_u16(0xC000);
        buf.put_i16(0);
        return Some(());
    }
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let int_part = int_part.trim_start_matches('0');
    let dscale = frac_part.len();

    let int_pad = (4 - int_part.len() % 4) % 4;
    let int_digits = format!("{}{}", "0".repeat(int_pad), int_part);
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let frac_digits = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let mut groups: Vec<i16> = Vec::new();
    for chunk in int_digits.as_bytes().chunks(4).chain(frac_digits.as_bytes().chunks(4)) {
        let s = std::str::from_utf8(chunk).ok()?;
        groups.push(s.parse().ok()?);
    }
    let mut weight = (int_digits.len() / 4) as i16 - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }
    buf.put_i16(groups.len() as i16);
    buf.put_i16(weight);
    buf.put_u16(if negative && !groups.is_empty() { 0x4000 } else { 0 });
    buf.put_i16(dscale as i16);
    for group in groups {
        buf.put_i16(group);
    }
    Some(())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok()
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let s = s.strip_suffix("+00").or_else(|| s.strip_suffix('Z')).unwrap_or(s);
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_date(s).map(|d| d.and_time(NaiveTime::MIN)))
}

/// Decodes one bound parameter. `type_oid` is the type declared at Parse
/// (0 when the client left it unspecified).
pub fn decode_param(
    raw: Option<&[u8]>,
    type_oid: u32,
    format: FormatCode,
) -> Result<Value, GatewayError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    match format {
        FormatCode::Text => {
            let text = std::str::from_utf8(raw).map_err(|_| {
                GatewayError::InvalidParameter("invalid UTF-8 in text parameter".into())
            })?;
            decode_text_param(text, type_oid)
        }
        FormatCode::Binary => decode_binary_param(raw, type_oid),
    }
}

fn invalid(type_oid: u32, input: &str) -> GatewayError {
    let name = PgType::by_oid(type_oid).map(|t| t.name).unwrap_or("unknown");
    GatewayError::InvalidParameter(format!("invalid input syntax for type {name}: \"{input}\""))
}

fn decode_text_param(text: &str, type_oid: u32) -> Result<Value, GatewayError> {
    let value = match type_oid {
        oids::BOOL => Value::Bool(
            Value::Text(text.to_string())
                .as_bool()
                .ok_or_else(|| invalid(type_oid, text))?,
        ),
        oids::INT2 | oids::INT4 | oids::INT8 | oids::OID => {
            Value::Int(text.trim().parse().map_err(|_| invalid(type_oid, text))?)
        }
        oids::FLOAT4 | oids::FLOAT8 => {
            Value::Float(text.trim().parse().map_err(|_| invalid(type_oid, text))?)
        }
        oids::DATE => Value::Date(parse_date(text).ok_or_else(|| invalid(type_oid, text))?),
        oids::TIME => Value::Time(parse_time(text).ok_or_else(|| invalid(type_oid, text))?),
        oids::TIMESTAMP | oids::TIMESTAMPTZ => {
            Value::Timestamp(parse_timestamp(text).ok_or_else(|| invalid(type_oid, text))?)
        }
        oids::BYTEA => Value::Bytes(decode_bytea_text(text).ok_or_else(|| invalid(type_oid, text))?),
        _ => Value::Text(text.to_string()),
    };
    Ok(value)
}

fn decode_bytea_text(text: &str) -> Option<Vec<u8>> {
    match text.strip_prefix("\\x") {
        Some(hex) => {
            if hex.len() % 2 != 0 {
                return None;
            }
            (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
                .collect()
        }
        None => Some(text.as_bytes().to_vec()),
    }
}

fn decode_binary_param(raw: &[u8], type_oid: u32) -> Result<Value, GatewayError> {
    let wrong_len = || {
        GatewayError::InvalidParameter(format!(
            "incorrect binary data length {} for parameter of type {type_oid}",
            raw.len()
        ))
    };
    let value = match type_oid {
        oids::BOOL => Value::Bool(*raw.first().ok_or_else(wrong_len)? != 0),
        oids::INT2 => Value::Int(i64::from(i16::from_be_bytes(
            raw.try_into().map_err(|_| wrong_len())?,
        ))),
        oids::INT4 => Value::Int(i64::from(i32::from_be_bytes(
            raw.try_into().map_err(|_| wrong_len())?,
        ))),
        oids::OID => Value::Int(i64::from(u32::from_be_bytes(
            raw.try_into().map_err(|_| wrong_len())?,
        ))),
        oids::INT8 => Value::Int(i64::from_be_bytes(raw.try_into().map_err(|_| wrong_len())?)),
        oids::FLOAT4 => Value::Float(f64::from(f32::from_be_bytes(
            raw.try_into().map_err(|_| wrong_len())?,
        ))),
        oids::FLOAT8 => Value::Float(f64::from_be_bytes(raw.try_into().map_err(|_| wrong_len())?)),
        oids::BYTEA => Value::Bytes(raw.to_vec()),
        oids::DATE => {
            let days = i32::from_be_bytes(raw.try_into().map_err(|_| wrong_len())?);
            let date = pg_epoch_date()
                .checked_add_signed(Duration::days(i64::from(days)))
                .ok_or_else(wrong_len)?;
            Value::Date(date)
        }
        oids::TIMESTAMP | oids::TIMESTAMPTZ => {
            let micros = i64::from_be_bytes(raw.try_into().map_err(|_| wrong_len())?);
            let ts = pg_epoch()
                .checked_add_signed(Duration::microseconds(micros))
                .ok_or_else(wrong_len)?;
            Value::Timestamp(ts)
        }
        oids::VECTOR => decode_pgvector(raw).ok_or_else(wrong_len)?,
        oids::FLOAT4_ARRAY | oids::FLOAT8_ARRAY | oids::INT2_ARRAY | oids::INT4_ARRAY
        | oids::INT8_ARRAY | oids::TEXT_ARRAY => decode_binary_array(raw).ok_or_else(wrong_len)?,
        oids::TEXT | oids::VARCHAR | oids::BPCHAR | oids::NAME => Value::Text(
            String::from_utf8(raw.to_vec()).map_err(|_| {
                GatewayError::InvalidParameter("invalid UTF-8 in binary text parameter".into())
            })?,
        ),
        _ => infer_unknown_binary(raw),
    };
    Ok(value)
}

/// Binary parameter with no declared type: arrays are recognised by their
/// header, otherwise integers are inferred from the width.
fn infer_unknown_binary(raw: &[u8]) -> Value {
    if raw.len() >= 12 {
        if let Some(value) = decode_binary_array(raw) {
            return value;
        }
    }
    match raw.len() {
        2 => Value::Int(i64::from(i16::from_be_bytes([raw[0], raw[1]]))),
        4 => Value::Int(i64::from(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            Value::Int(i64::from_be_bytes(bytes))
        }
        _ => Value::Text(String::from_utf8_lossy(raw).to_string()),
    }
}

fn decode_pgvector(raw: &[u8]) -> Option<Value> {
    if raw.len() < 4 {
        return None;
    }
    let dim = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let body = &raw[4..];
    if body.len() != dim * 4 {
        return None;
    }
    let items = body
        .chunks(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Value::Vector(items))
}

/// One-dimensional binary array. Float arrays become vectors.
fn decode_binary_array(raw: &[u8]) -> Option<Value> {
    let read_i32 = |pos: usize| -> Option<i32> {
        raw.get(pos..pos + 4)
            .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    };
    let ndim = read_i32(0)?;
    let elem_oid = read_i32(8)? as u32;
    if ndim == 0 {
        return Some(Value::Array(Vec::new()));
    }
    if ndim != 1 {
        return None;
    }
    let count = usize::try_from(read_i32(12)?).ok()?;
    // Each element carries at least its 4-byte length.
    if count > raw.len().saturating_sub(20) / 4 {
        return None;
    }
    let mut pos = 20;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_i32(pos)?;
        pos += 4;
        if len < 0 {
            items.push(Value::Null);
            continue;
        }
        let len = len as usize;
        let elem = raw.get(pos..pos + len)?;
        pos += len;
        items.push(decode_binary_param(elem, elem_oid).ok()?);
    }
    if pos != raw.len() {
        return None;
    }
    if matches!(elem_oid, oids::FLOAT4 | oids::FLOAT8) && items.iter().all(|v| !v.is_null()) {
        let floats = items
            .iter()
            .filter_map(Value::as_f64)
            .map(|f| f as f32)
            .collect();
        return Some(Value::Vector(floats));
    }
    Some(Value::Array(items))
}
