//! Completeness scoring for normalized payloads

use crate::layer::Quality;
use serde_json::Value;

/// Count (total, null) scalar leaves below a value
fn count_leaves(value: &Value, total: &mut usize, nulls: &mut usize) {
    match value {
        Value::Object(map) => {
            for child in map.values() {
                count_leaves(child, total, nulls);
            }
        }
        Value::Array(items) => {
            for child in items {
                count_leaves(child, total, nulls);
            }
        }
        Value::Null => {
            *total += 1;
            *nulls += 1;
        }
        _ => *total += 1,
    }
}

/// Rate a payload high (>= 90% complete), medium (>= 70%) or low
///
/// Thresholds are compared in integer arithmetic so that exactly 9 of 10 leaves is `high`.
pub fn assess_quality(payload: &Value) -> Quality {
    if !(payload.is_object() || payload.is_array()) {
        return Quality::Low;
    }
    let (mut total, mut nulls) = (0usize, 0usize);
    count_leaves(payload, &mut total, &mut nulls);
    if total == 0 {
        return Quality::Low;
    }

    let present = total - nulls;
    if present * 10 >= total * 9 {
        Quality::High
    } else if present * 10 >= total * 7 {
        Quality::Medium
    } else {
        Quality::Low
    }
}

/// Quality of a normalized layer value, judged on its `data` portion when it has one
pub fn payload_quality(payload: &Value) -> Quality {
    match payload.get("data") {
        Some(data) => assess_quality(data),
        None => assess_quality(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_nulls_is_high() {
        assert_eq!(assess_quality(&json!({"a": 1, "b": {"c": "x"}})), Quality::High);
    }

    #[test]
    fn test_all_nulls_is_low() {
        assert_eq!(assess_quality(&json!({"a": null, "b": {"c": null}})), Quality::Low);
    }

    #[test]
    fn test_one_null_in_ten_is_high() {
        let payload = json!({
            "a": 1, "b": 2, "c": 3, "d": 4, "e": 5,
            "f": {"g": 6, "h": 7, "i": [8, 9]},
            "j": null
        });
        assert_eq!(assess_quality(&payload), Quality::High);
    }

    #[test]
    fn test_one_null_in_two_is_low() {
        assert_eq!(assess_quality(&json!({"a": 1, "b": null})), Quality::Low);
    }

    #[test]
    fn test_medium_band() {
        // 3 of 4 present
        assert_eq!(
            assess_quality(&json!({"a": 1, "b": 2, "c": 3, "d": null})),
            Quality::Medium
        );
    }

    #[test]
    fn test_empty_or_scalar_is_low() {
        assert_eq!(assess_quality(&json!({})), Quality::Low);
        assert_eq!(assess_quality(&json!([])), Quality::Low);
        assert_eq!(assess_quality(&json!("text")), Quality::Low);
        assert_eq!(assess_quality(&Value::Null), Quality::Low);
        assert_eq!(assess_quality(&json!(42)), Quality::Low);
    }

    #[test]
    fn test_payload_quality_looks_at_data() {
        let payload = json!({"type": "weather", "source": "error", "data": null, "error": "bad"});
        assert_eq!(payload_quality(&payload), Quality::Low);
        assert_eq!(payload_quality(&json!({"data": {"a": 1}, "analysis": null})), Quality::High);
    }
}
