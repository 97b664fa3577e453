//! Cell values and total conversions into canonical field values.
//!
//! Every converter returns a default on input it cannot use. Messy sheets
//! degrade to zeros and empty strings, never to errors.

use crate::report_type::{CanonicalField, FieldKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Untyped spreadsheet cell, as read from the sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Date(dt) => serializer.serialize_str(&format_datetime(dt)),
            CellValue::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => CellValue::Text(s),
            serde_json::Value::Number(n) => CellValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Null => CellValue::Empty,
            other => CellValue::Text(other.to_string()),
        })
    }
}

/// Typed canonical value. Dates are carried as ISO calendar-date text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Coerce a cell into the declared type of `field`.
pub fn coerce(field: CanonicalField, cell: &CellValue) -> FieldValue {
    match field.kind() {
        FieldKind::Number => FieldValue::Number(to_number(cell)),
        FieldKind::Text => FieldValue::Text(to_text(cell)),
        FieldKind::Date => FieldValue::Text(to_date(cell)),
        FieldKind::Boolean => FieldValue::Boolean(to_boolean(cell)),
    }
}

/// Numeric value of a cell; thousands separators are ignored. Defaults to 0.
pub fn to_number(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Number(n) => *n,
        CellValue::Text(s) => parse_number(s),
        _ => 0.0,
    }
}

/// Trimmed text of a cell. Defaults to the empty string.
pub fn to_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number(n) => format_number(*n),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Date(dt) => dt.date().format("%Y-%m-%d").to_string(),
        CellValue::Empty => String::new(),
    }
}

/// Calendar date of a cell as `YYYY-MM-DD`. Text passes through unchanged.
pub fn to_date(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => s.clone(),
        CellValue::Date(dt) => dt.date().format("%Y-%m-%d").to_string(),
        _ => String::new(),
    }
}

/// Yes/true/1/y (any case) are true; everything else is false.
pub fn to_boolean(cell: &CellValue) -> bool {
    match cell {
        CellValue::Bool(b) => *b,
        CellValue::Text(s) => is_truthy(s),
        CellValue::Number(n) => is_truthy(&format_number(*n)),
        _ => false,
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1" | "y")
}

/// Parse the leading decimal literal of `s` after removing `,` separators.
fn parse_number(s: &str) -> f64 {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim_start();
    let bytes = cleaned.as_bytes();

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return 0.0;
    }

    // Exponent only counts when followed by at least one digit.
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    cleaned[..end].parse::<f64>().unwrap_or(0.0)
}

/// Render a number the way a sheet displays it: whole floats drop `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.date().format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&text("1,234.50")), 1234.5);
        assert_eq!(to_number(&text("abc")), 0.0);
        assert_eq!(to_number(&CellValue::Number(42.0)), 42.0);
        assert_eq!(to_number(&text("")), 0.0);
        assert_eq!(to_number(&CellValue::Empty), 0.0);
        assert_eq!(to_number(&CellValue::Bool(true)), 0.0);
    }

    #[test]
    fn test_to_number_leading_literal() {
        assert_eq!(to_number(&text("  12 rooms")), 12.0);
        assert_eq!(to_number(&text("-3.5")), -3.5);
        assert_eq!(to_number(&text(".5")), 0.5);
        assert_eq!(to_number(&text("1e3")), 1000.0);
        assert_eq!(to_number(&text("7e")), 7.0);
        assert_eq!(to_number(&text("-")), 0.0);
        assert_eq!(to_number(&text(".")), 0.0);
    }

    #[test]
    fn test_to_boolean() {
        assert!(to_boolean(&text("Y")));
        assert!(to_boolean(&text("Yes")));
        assert!(to_boolean(&text("TRUE")));
        assert!(to_boolean(&text("1")));
        assert!(!to_boolean(&text("no")));
        assert!(!to_boolean(&CellValue::Number(0.0)));
        assert!(to_boolean(&CellValue::Number(1.0)));
        assert!(to_boolean(&CellValue::Bool(true)));
        assert!(!to_boolean(&CellValue::Empty));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&text("  Suite ")), "Suite");
        assert_eq!(to_text(&CellValue::Number(101.0)), "101");
        assert_eq!(to_text(&CellValue::Number(2.5)), "2.5");
        assert_eq!(to_text(&CellValue::Empty), "");
    }

    #[test]
    fn test_to_date() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        assert_eq!(to_date(&CellValue::Date(dt)), "2024-03-09");
        assert_eq!(to_date(&text("09/03/2024")), "09/03/2024");
        assert_eq!(to_date(&CellValue::Number(45000.0)), "");
        assert_eq!(to_date(&CellValue::Empty), "");
    }

    #[test]
    fn test_coerce_dispatches_on_kind() {
        assert_eq!(
            coerce(CanonicalField::RoomRate, &text("1,200")),
            FieldValue::Number(1200.0)
        );
        assert_eq!(
            coerce(CanonicalField::RoomNumber, &CellValue::Number(305.0)),
            FieldValue::Text("305".to_string())
        );
        assert_eq!(
            coerce(CanonicalField::ChargedToRoom, &text("y")),
            FieldValue::Boolean(true)
        );
        assert_eq!(
            coerce(CanonicalField::Date, &text("2024-01-05")),
            FieldValue::Text("2024-01-05".to_string())
        );
    }

    #[test]
    fn test_cell_value_json() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(serde_json::to_string(&CellValue::Date(dt)).unwrap(), "\"2024-01-05\"");
        assert_eq!(serde_json::to_string(&CellValue::Empty).unwrap(), "null");
        let back: CellValue = serde_json::from_str("12.5").unwrap();
        assert_eq!(back, CellValue::Number(12.5));
    }

    #[test]
    fn test_field_value_untagged() {
        let values: Vec<FieldValue> = serde_json::from_str("[true, 3, \"x\"]").unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Boolean(true),
                FieldValue::Number(3.0),
                FieldValue::Text("x".to_string())
            ]
        );
    }
}
