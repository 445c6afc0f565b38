use super::EvalError;
use chrono::Utc;
use pgbridge_core::Value;
use std::cmp::Ordering;

/// Scalar functions available everywhere. `None` when `name` is not one.
pub(crate) fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    let result = match name.to_ascii_lowercase().as_str() {
        "lower" => text_fn(args, |s| s.to_lowercase()),
        "upper" => text_fn(args, |s| s.to_uppercase()),
        "length" | "char_length" | "character_length" => match arg(args, 0) {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::Int(v.to_string().chars().count() as i64)),
        },
        "abs" => match arg(args, 0) {
            Value::Null => Ok(Value::Null),
            Value::Int(n) => Ok(Value::Int(n.abs())),
            v => float_of(&v).map(|f| Value::Float(f.abs())),
        },
        "round" => round(args),
        "coalesce" => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        "nullif" => {
            let (a, b) = (arg(args, 0), arg(args, 1));
            if a.sql_eq(&b) == Some(true) {
                Ok(Value::Null)
            } else {
                Ok(a)
            }
        }
        "concat" => Ok(Value::Text(
            args.iter().filter_map(Value::to_text).collect::<String>(),
        )),
        "now" | "current_timestamp" | "localtimestamp" => {
            Ok(Value::Timestamp(Utc::now().naive_utc()))
        }
        "current_date" => Ok(Value::Date(Utc::now().date_naive())),
        "greatest" => Ok(extreme(args, Ordering::Greater)),
        "least" => Ok(extreme(args, Ordering::Less)),
        "to_vector" => match arg(args, 0) {
            Value::Null => Ok(Value::Null),
            v => vector_arg(&v).map(Value::Vector),
        },
        "vector_cosine" => vector_fn(args, cosine_similarity),
        "vector_l2" => vector_fn(args, l2_distance),
        "vector_dot_product" => vector_fn(args, dot_product),
        _ => return None,
    };
    Some(result)
}

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or(Value::Null)
}

fn text_fn(args: &[Value], f: impl Fn(&str) -> String) -> Result<Value, EvalError> {
    Ok(match arg(args, 0) {
        Value::Null => Value::Null,
        v => Value::Text(f(&v.to_string())),
    })
}

fn float_of(value: &Value) -> Result<f64, EvalError> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::InvalidValue(format!("invalid numeric input \"{value}\"")))
}

fn round(args: &[Value]) -> Result<Value, EvalError> {
    let value = arg(args, 0);
    if value.is_null() {
        return Ok(Value::Null);
    }
    let places = arg(args, 1).as_i64().unwrap_or(0);
    if let (Value::Int(n), true) = (&value, places >= 0) {
        return Ok(Value::Int(*n));
    }
    let factor = 10f64.powi(places as i32);
    Ok(Value::Float((float_of(&value)? * factor).round() / factor))
}

fn extreme(args: &[Value], want: Ordering) -> Value {
    args.iter()
        .filter(|v| !v.is_null())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.compare(b) != want => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Accepts a vector value, a numeric array, or vector text such as `[1,2,3]`.
pub(crate) fn vector_arg(value: &Value) -> Result<Vec<f32>, EvalError> {
    let parsed = match value {
        Value::Vector(v) => Some(v.clone()),
        Value::Text(s) => Value::parse_vector(s),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_f64().map(|f| f as f32))
            .collect(),
        _ => None,
    };
    parsed.ok_or_else(|| EvalError::InvalidValue(format!("invalid vector input \"{value}\"")))
}

fn vector_fn(args: &[Value], f: fn(&[f32], &[f32]) -> f64) -> Result<Value, EvalError> {
    let (a, b) = (arg(args, 0), arg(args, 1));
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let (a, b) = (vector_arg(&a)?, vector_arg(&b)?);
    if a.len() != b.len() {
        return Err(EvalError::InvalidValue(format!(
            "different vector dimensions {} and {}",
            a.len(),
            b.len()
        )));
    }
    Ok(Value::Float(f(&a, &b)))
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum()
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity; zero-length vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / (norm_a * norm_b)
}

/// SQL LIKE matching with `%` and `_` wildcards and `\` as escape.
pub fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| {
        if case_insensitive {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };
    let text: Vec<char> = fold(text).chars().collect();
    let pattern: Vec<char> = fold(pattern).chars().collect();
    like_at(&text, &pattern)
}

fn like_at(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => (0..=text.len()).any(|skip| like_at(&text[skip..], &pattern[1..])),
        Some('_') => !text.is_empty() && like_at(&text[1..], &pattern[1..]),
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && like_at(&text[1..], &pattern[2..])
        }
        Some(c) => text.first() == Some(c) && like_at(&text[1..], &pattern[1..]),
    }
}
