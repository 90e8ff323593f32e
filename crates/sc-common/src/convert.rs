//! Tolerant conversions for device and MES payload values.
//!
//! Station peripherals report numbers in whatever shape their firmware
//! produces: `111`, `"111"`, `"111.0"`, `" 111,0 "`. These helpers normalize
//! that zoo without ever failing a script over formatting.

use serde_json::Value;

/// Convert a payload value to `i64`, falling back to `default`.
pub fn to_i64(value: &Value, default: i64) -> i64 {
    match value {
        Value::Null => default,
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Value::String(s) => parse_numeric(s).map(|f| f as i64).unwrap_or(default),
        _ => default,
    }
}

/// Convert a payload value to `f64`, falling back to `default`.
pub fn to_f64(value: &Value, default: f64) -> f64 {
    match value {
        Value::Null => default,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(default),
        Value::String(s) => parse_numeric(s).unwrap_or(default),
        _ => default,
    }
}

/// Render a payload value as text. Strings come back unquoted, everything
/// else as compact JSON.
pub fn to_string_lossy(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Loose truthiness matching how operators read payloads: empty string,
/// zero, null, empty array/object are all false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn parse_numeric(raw: &str) -> Option<f64> {
    let s = raw.trim().replace(',', ".");
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_i64_handles_device_formats() {
        assert_eq!(to_i64(&json!(111), 0), 111);
        assert_eq!(to_i64(&json!("111"), 0), 111);
        assert_eq!(to_i64(&json!("111.0"), 0), 111);
        assert_eq!(to_i64(&json!(" 111,0 "), 0), 111);
        assert_eq!(to_i64(&json!(null), 7), 7);
        assert_eq!(to_i64(&json!(""), 7), 7);
        assert_eq!(to_i64(&json!(true), 0), 1);
        assert_eq!(to_i64(&json!([1]), 7), 7);
    }

    #[test]
    fn to_f64_handles_comma_decimals() {
        assert_eq!(to_f64(&json!("1,5"), 0.0), 1.5);
        assert_eq!(to_f64(&json!(2.5), 0.0), 2.5);
        assert_eq!(to_f64(&json!("garbage"), 9.0), 9.0);
    }

    #[test]
    fn to_string_lossy_keeps_strings_unquoted() {
        assert_eq!(to_string_lossy(&json!("abc")), "abc");
        assert_eq!(to_string_lossy(&json!(3)), "3");
        assert_eq!(to_string_lossy(&json!(null)), "");
    }

    #[test]
    fn truthy_matches_operator_expectations() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!({})));
    }
}
