//! Service types: the raw shape returned by the backend and the mapped shape
//! handed to callers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A service as returned by the backend and as stored in the cache.
///
/// Fields the cache does not interpret are kept in `extra` and written back
/// verbatim. Decoding never rejects an object: scalar fields of the wrong
/// type are coerced to text, and `id` is only read when `_id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiService {
  #[serde(rename = "_id")]
  pub id: String,
  pub label: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  /// Boolean-like; see [`is_truthy`](super::mapper::is_truthy)
  pub status: Value,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for ApiService {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let mut fields = Map::<String, Value>::deserialize(deserializer)?;

    let id = match fields.remove("_id") {
      Some(id) => id,
      None => fields.remove("id").unwrap_or(Value::Null),
    };
    let label = fields.remove("label").unwrap_or(Value::Null);
    let value = fields.remove("value").and_then(optional_text);
    let status = fields.remove("status").unwrap_or(Value::Null);

    Ok(Self {
      id: text(id),
      label: text(label),
      value,
      status,
      extra: fields,
    })
  }
}

impl ApiService {
  pub fn new(id: impl Into<String>, label: impl Into<String>, enabled: bool) -> Self {
    Self {
      id: id.into(),
      label: label.into(),
      value: None,
      status: Value::Bool(enabled),
      extra: Map::new(),
    }
  }

  pub fn with_value(mut self, value: impl Into<String>) -> Self {
    self.value = Some(value.into());
    self
  }
}

/// A service as surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
  pub id: String,
  pub label: String,
  /// URL/key-safe identifier, never empty
  pub slug: String,
  pub enabled: bool,
}

/// Strings as-is, other values as their JSON text; `null` becomes empty.
fn text(value: Value) -> String {
  optional_text(value).unwrap_or_default()
}

fn optional_text(value: Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    other => Some(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unknown_fields_round_trip() {
    let raw = json!({
      "_id": "abc",
      "label": "Funding",
      "status": true,
      "createdBy": "ops",
      "order": 4
    });

    let service: ApiService = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(service.extra.get("createdBy"), Some(&json!("ops")));
    assert_eq!(serde_json::to_value(&service).unwrap(), raw);
  }

  #[test]
  fn test_missing_fields_default() {
    let service: ApiService = serde_json::from_value(json!({ "id": 17, "label": null })).unwrap();

    assert_eq!(service.id, "17");
    assert_eq!(service.label, "");
    assert_eq!(service.value, None);
    assert_eq!(service.status, Value::Null);
  }

  #[test]
  fn test_scalar_value_is_coerced_to_text() {
    let service: ApiService =
      serde_json::from_value(json!({"_id": "2", "label": "Two", "value": 5})).unwrap();
    assert_eq!(service.value.as_deref(), Some("5"));

    let service: ApiService =
      serde_json::from_value(json!({"_id": "2", "label": "Two", "value": null})).unwrap();
    assert_eq!(service.value, None);
  }

  #[test]
  fn test_underscore_id_wins_over_id() {
    let service: ApiService =
      serde_json::from_value(json!({"_id": "mongo-1", "id": "legacy-9", "label": "A"})).unwrap();

    assert_eq!(service.id, "mongo-1");
    assert_eq!(service.extra.get("id"), Some(&json!("legacy-9")));
  }

  #[test]
  fn test_non_object_is_rejected() {
    assert!(serde_json::from_value::<ApiService>(json!("not an object")).is_err());
  }
}
