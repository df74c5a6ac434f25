//! Dynamically typed cell values.
//!
//! Every column accessor yields a [`CellValue`]. The filter, sort and
//! aggregation stages only ever see rows through these values, so this module
//! owns all the coercions they rely on: stringification, numeric and boolean
//! coercion, date parsing and the advanced-filter value key.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Value key used by advanced value filters for null or empty cells.
pub const EMPTY_VALUE_KEY: &str = "__empty__";

/// A single cell value.
///
/// Serializes untagged, so JSON `null`, booleans, numbers and strings map
/// directly onto the corresponding variants. Dates serialize as ISO 8601
/// strings and come back as [`CellValue::String`]; the date filter parses
/// strings on demand, so nothing is lost.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    String(String),
    /// Date and time value.
    Date(NaiveDateTime),
}

/// Hashable identity of a primitive value, used to partition rows into groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    String(String),
    Date(NaiveDateTime),
}

impl CellValue {
    /// Returns `true` if this is `CellValue::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns `true` for null values and empty strings.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Returns `true` for integer and float values.
    pub fn is_number(&self) -> bool {
        matches!(self, CellValue::Int(_) | CellValue::Float(_))
    }

    /// Attempts to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attempts to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to get the value as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to get the value as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CellValue::Float(n) => Some(*n),
            CellValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Stringifies the value. Null becomes the empty string.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(n) => n.to_string(),
            CellValue::Float(n) => format_float(*n),
            CellValue::String(s) => s.clone(),
            CellValue::Date(d) => d.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        }
    }

    /// Coerces the value to a number.
    ///
    /// Booleans count as `1`/`0`, strings are parsed after trimming and dates
    /// yield their millisecond timestamp. Null, blank strings and anything
    /// that does not parse yield `None`, so they never satisfy a numeric
    /// comparison.
    pub fn to_number(&self) -> Option<f64> {
        let n = match self {
            CellValue::Null => return None,
            CellValue::Bool(b) => f64::from(u8::from(*b)),
            CellValue::Int(n) => *n as f64,
            CellValue::Float(n) => *n,
            CellValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
            CellValue::Date(d) => d.and_utc().timestamp_millis() as f64,
        };
        (!n.is_nan()).then_some(n)
    }

    /// Like [`to_number`](Self::to_number) but rejects infinities.
    pub fn to_finite_number(&self) -> Option<f64> {
        self.to_number().filter(|n| n.is_finite())
    }

    /// Coerces booleans and the strings `"true"`/`"false"` to a boolean.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            CellValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Parses the value as a date and time.
    ///
    /// Accepts date values, RFC 3339 strings, ISO dates and date-times (with
    /// `T` or a space separator), `MM/DD/YYYY` and epoch milliseconds.
    pub fn to_date(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Int(ms) => DateTime::from_timestamp_millis(*ms).map(|d| d.naive_utc()),
            CellValue::Float(ms) if ms.is_finite() => {
                DateTime::from_timestamp_millis(*ms as i64).map(|d| d.naive_utc())
            }
            CellValue::String(s) => parse_date(s.trim()),
            _ => None,
        }
    }

    /// Key used by advanced value filters: [`EMPTY_VALUE_KEY`] for null or
    /// empty values, else the stringified value.
    pub fn value_key(&self) -> String {
        if self.is_empty() {
            EMPTY_VALUE_KEY.to_string()
        } else {
            self.to_text()
        }
    }

    /// Loose equality: numbers compare numerically across representations,
    /// a number equals a string that parses to it, booleans compare as
    /// `1`/`0`, and null only equals null.
    pub fn loose_eq(&self, other: &CellValue) -> bool {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => true,
            (CellValue::Null, _) | (_, CellValue::Null) => false,
            (CellValue::String(a), CellValue::String(b)) => a == b,
            (CellValue::Date(a), CellValue::Date(b)) => a == b,
            (a, b) if a.is_number() || b.is_number() => {
                matches!((a.to_number(), b.to_number()), (Some(x), Some(y)) if x == y)
            }
            (CellValue::Bool(_), _) | (_, CellValue::Bool(_)) => {
                matches!((self.to_number(), other.to_number()), (Some(x), Some(y)) if x == y)
            }
            _ => self.to_text() == other.to_text(),
        }
    }

    pub(crate) fn group_key(&self) -> GroupKey {
        match self {
            CellValue::Null => GroupKey::Null,
            CellValue::Bool(b) => GroupKey::Bool(*b),
            CellValue::Int(n) => GroupKey::Int(*n),
            CellValue::Float(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                GroupKey::Int(*n as i64)
            }
            CellValue::Float(n) => GroupKey::Float(n.to_bits()),
            CellValue::String(s) => GroupKey::String(s.clone()),
            CellValue::Date(d) => GroupKey::Date(*d),
        }
    }

    /// Label used inside group ids; null renders as `null`.
    pub(crate) fn group_label(&self) -> String {
        match self {
            CellValue::Null => "null".to_string(),
            other => other.to_text(),
        }
    }
}

fn format_float(n: f64) -> String {
    if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        n.to_string()
    }
}

fn parse_date(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    const DATE_TIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<&String> for CellValue {
    fn from(s: &String) -> Self {
        CellValue::String(s.clone())
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Int(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Int(i64::from(n))
    }
}

impl From<u32> for CellValue {
    fn from(n: u32) -> Self {
        CellValue::Int(i64::from(n))
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Float(n)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(d: NaiveDateTime) -> Self {
        CellValue::Date(d)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d.and_time(NaiveTime::MIN))
    }
}

impl<V: Into<CellValue>> From<Option<V>> for CellValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(CellValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values() {
        assert!(CellValue::Null.is_empty());
        assert!(CellValue::from("").is_empty());
        assert!(!CellValue::from(" ").is_empty());
        assert!(!CellValue::Int(0).is_empty());
        assert!(!CellValue::Bool(false).is_empty());
    }

    #[test]
    fn test_to_text() {
        assert_eq!(CellValue::Null.to_text(), "");
        assert_eq!(CellValue::Int(42).to_text(), "42");
        assert_eq!(CellValue::Float(3.0).to_text(), "3");
        assert_eq!(CellValue::Float(2.5).to_text(), "2.5");
        assert_eq!(CellValue::Float(f64::INFINITY).to_text(), "Infinity");
        assert_eq!(CellValue::Bool(true).to_text(), "true");
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(CellValue::from(" 12.5 ").to_number(), Some(12.5));
        assert_eq!(CellValue::from("abc").to_number(), None);
        assert_eq!(CellValue::from("").to_number(), None);
        assert_eq!(CellValue::Null.to_number(), None);
        assert_eq!(CellValue::Bool(true).to_number(), Some(1.0));
        assert_eq!(CellValue::Float(f64::NAN).to_number(), None);
        assert_eq!(CellValue::Float(f64::INFINITY).to_finite_number(), None);
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(CellValue::from("true").to_bool(), Some(true));
        assert_eq!(CellValue::from("FALSE").to_bool(), Some(false));
        assert_eq!(CellValue::Bool(true).to_bool(), Some(true));
        assert_eq!(CellValue::from("yes").to_bool(), None);
        assert_eq!(CellValue::Int(1).to_bool(), None);
    }

    #[test]
    fn test_date_parsing() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(CellValue::from("2024-03-15").to_date(), Some(expected));
        assert_eq!(CellValue::from("03/15/2024").to_date(), Some(expected));

        let with_time = CellValue::from("2024-03-15T10:30:00").to_date().unwrap();
        assert_eq!(with_time.date(), expected.date());

        let rfc = CellValue::from("2024-03-15T10:30:00+02:00").to_date().unwrap();
        assert_eq!(rfc.format("%H:%M").to_string(), "10:30");

        assert_eq!(CellValue::from("not a date").to_date(), None);
        assert_eq!(CellValue::Null.to_date(), None);
    }

    #[test]
    fn test_value_key() {
        assert_eq!(CellValue::Null.value_key(), EMPTY_VALUE_KEY);
        assert_eq!(CellValue::from("").value_key(), EMPTY_VALUE_KEY);
        assert_eq!(CellValue::Int(7).value_key(), "7");
        assert_eq!(CellValue::from("Sales").value_key(), "Sales");
    }

    #[test]
    fn test_loose_equality() {
        assert!(CellValue::Int(5).loose_eq(&CellValue::Float(5.0)));
        assert!(CellValue::Int(5).loose_eq(&CellValue::from("5")));
        assert!(CellValue::from("5").loose_eq(&CellValue::Int(5)));
        assert!(CellValue::Bool(true).loose_eq(&CellValue::Int(1)));
        assert!(CellValue::Null.loose_eq(&CellValue::Null));
        assert!(!CellValue::Null.loose_eq(&CellValue::from("")));
        assert!(!CellValue::from("a").loose_eq(&CellValue::from("A")));
    }

    #[test]
    fn test_group_key_normalizes_integral_floats() {
        assert_eq!(CellValue::Int(3).group_key(), CellValue::Float(3.0).group_key());
        assert_ne!(CellValue::Int(3).group_key(), CellValue::from("3").group_key());
    }

    #[test]
    fn test_json_round_trip_shapes() {
        let values: Vec<CellValue> =
            serde_json::from_str(r#"[null, true, 95000, 1.5, "Alice"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int(95000),
                CellValue::Float(1.5),
                CellValue::from("Alice"),
            ]
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(CellValue::from(None::<i64>), CellValue::Null);
        assert_eq!(CellValue::from(Some("x")), CellValue::from("x"));
    }
}
