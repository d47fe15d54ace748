use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SHORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)([KkMm]?)$").unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*").unwrap());

/// A count as it shows up in the wild: missing, already numeric, or text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawCount<'a> {
    Missing,
    Int(i64),
    Float(f64),
    Text(&'a str),
}

impl From<i64> for RawCount<'_> {
    fn from(n: i64) -> Self {
        RawCount::Int(n)
    }
}

impl From<u64> for RawCount<'_> {
    fn from(n: u64) -> Self {
        i64::try_from(n).map(RawCount::Int).unwrap_or(RawCount::Float(n as f64))
    }
}

impl From<i32> for RawCount<'_> {
    fn from(n: i32) -> Self {
        RawCount::Int(n.into())
    }
}

impl From<f64> for RawCount<'_> {
    fn from(n: f64) -> Self {
        RawCount::Float(n)
    }
}

impl<'a> From<&'a str> for RawCount<'a> {
    fn from(s: &'a str) -> Self {
        RawCount::Text(s)
    }
}

impl<'a> From<&'a String> for RawCount<'a> {
    fn from(s: &'a String) -> Self {
        RawCount::Text(s)
    }
}

impl<'a, T: Into<RawCount<'a>>> From<Option<T>> for RawCount<'a> {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawCount::Missing)
    }
}

impl<'a> From<&'a Value> for RawCount<'a> {
    fn from(v: &'a Value) -> Self {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) => RawCount::Int(i),
                None => n.as_f64().map(RawCount::Float).unwrap_or(RawCount::Missing),
            },
            Value::String(s) => RawCount::Text(s),
            _ => RawCount::Missing,
        }
    }
}

/// Parse an abbreviated human count ("1.2K", "3M", "4,500") into an integer.
///
/// Never fails: anything that cannot be read as a non-negative count is `None`.
pub fn parse_count<'a>(input: impl Into<RawCount<'a>>) -> Option<u64> {
    match input.into() {
        RawCount::Missing => None,
        RawCount::Int(n) => u64::try_from(n).ok(),
        RawCount::Float(f) => float_to_count(f),
        RawCount::Text(s) => parse_text(s),
    }
}

fn parse_text(s: &str) -> Option<u64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '\u{00A0}')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    if let Some(caps) = SHORT_RE.captures(&cleaned) {
        if caps[2].is_empty() {
            if let Ok(n) = caps[1].parse::<u64>() {
                return Some(n);
            }
        }
        let num: f64 = caps[1].parse().ok()?;
        let scale = match caps[2].to_ascii_uppercase().as_str() {
            "K" => 1_000.0,
            "M" => 1_000_000.0,
            _ => 1.0,
        };
        return float_to_count(num * scale);
    }

    DIGITS_RE
        .find(&cleaned)
        .and_then(|m| m.as_str().replace(',', "").parse::<u64>().ok())
}

fn float_to_count(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 {
        Some(f.trunc() as u64)
    } else {
        None
    }
}
