//! Lenient readers for loosely-typed JSON payloads.
//!
//! The Nayax API is inconsistent about field casing and about whether
//! numbers arrive as numbers or strings, so readers take a list of
//! candidate keys and coerce where it is unambiguous.

use serde_json::Value;

/// First non-empty string under any of `keys`. Numbers are stringified so
/// numeric identifiers (machine ids, selection codes) are accepted.
pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match v.get(*key) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// First numeric value under any of `keys`; numeric strings are parsed.
pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(f) = n.as_f64() {
                    return Some(f);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(f) = s.trim().parse::<f64>() {
                    return Some(f);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Some(i);
                }
                if let Some(f) = n.as_f64() {
                    return Some(f.round() as i64);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Unwrap a list payload that may be a bare array or wrapped under one of
/// `wrappers` (searched one level deep, then inside `data`).
pub(crate) fn array_payload<'a>(v: &'a Value, wrappers: &[&str]) -> Option<&'a Vec<Value>> {
    if let Value::Array(arr) = v {
        return Some(arr);
    }
    for key in wrappers {
        if let Some(Value::Array(arr)) = v.get(*key) {
            return Some(arr);
        }
    }
    if let Some(data) = v.get("data").or_else(|| v.get("Data")) {
        if let Value::Array(arr) = data {
            return Some(arr);
        }
        for key in wrappers {
            if let Some(Value::Array(arr)) = data.get(*key) {
                return Some(arr);
            }
        }
    }
    None
}

/// Trim and drop empty strings.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_str_accepts_numbers_and_alias_order() {
        let v = json!({ "MachineID": 1234, "machine_id": "ignored" });
        assert_eq!(
            value_str(&v, &["MachineID", "machine_id"]).as_deref(),
            Some("1234")
        );
        let v = json!({ "name": "   ", "ProductName": "Cola" });
        assert_eq!(
            value_str(&v, &["name", "ProductName"]).as_deref(),
            Some("Cola")
        );
    }

    #[test]
    fn numeric_readers_parse_strings() {
        let v = json!({ "Price": "1.75", "Stock": "4", "Qty": 2.6 });
        assert_eq!(value_f64(&v, &["Price"]), Some(1.75));
        assert_eq!(value_i64(&v, &["Stock"]), Some(4));
        assert_eq!(value_i64(&v, &["Qty"]), Some(3));
        assert_eq!(value_f64(&v, &["Missing"]), None);
    }

    #[test]
    fn array_payload_handles_wrappers() {
        let bare = json!([1, 2]);
        let wrapped = json!({ "Products": [1] });
        let nested = json!({ "data": { "items": [1, 2, 3] } });
        assert_eq!(array_payload(&bare, &["Products"]).map(Vec::len), Some(2));
        assert_eq!(array_payload(&wrapped, &["Products"]).map(Vec::len), Some(1));
        assert_eq!(array_payload(&nested, &["items"]).map(Vec::len), Some(3));
        assert!(array_payload(&json!({ "other": 1 }), &["items"]).is_none());
    }
}
