//! JSON output formatting for crmflow.

use serde::Serialize;
use serde_json::json;

use crate::error::CrmError;

/// Format a list as `{"count": n, "items": [...]}`
///
/// # Errors
///
/// Returns `CrmError::Parse` if JSON serialization fails.
pub fn format_list_json<T: Serialize>(items: &[T]) -> Result<String, CrmError> {
    let output = json!({
        "count": items.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `CrmError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CrmError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_list_json() {
        let text = format_list_json(&["a", "b"]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["items"][1], "b");
    }

    #[test]
    fn test_to_json_unsized() {
        let items: &[i64] = &[1, 2];
        assert_eq!(to_json(items).unwrap(), "[\n  1,\n  2\n]");
        assert_eq!(to_json("lead").unwrap(), "\"lead\"");
    }
}
