//! Mapping from stored services to the shape callers see.

use serde_json::Value;

use super::types::{ApiService, Service};

/// Slug used when neither label nor id contain anything slug-worthy.
const FALLBACK_SLUG: &str = "service";

/// Slugify "Y Combinator" -> "y-combinator".
///
/// Lower-cases ASCII letters, collapses every run of other characters into a
/// single hyphen and strips hyphens at both ends.
pub fn slugify(input: &str) -> String {
  let mut slug = String::with_capacity(input.len());
  let mut pending_hyphen = false;

  for c in input.chars() {
    if c.is_ascii_alphanumeric() {
      if pending_hyphen && !slug.is_empty() {
        slug.push('-');
      }
      pending_hyphen = false;
      slug.push(c.to_ascii_lowercase());
    } else {
      pending_hyphen = true;
    }
  }

  slug
}

/// Boolean reading of a loosely typed flag.
///
/// Only `null`, `false`, zero and the empty string are false. Any other
/// string is true, including "false" and "0".
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

/// Guarantee a Service with a non-empty slug.
pub fn map_service(raw: &ApiService) -> Service {
  let slug = raw
    .value
    .as_deref()
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(String::from)
    .or_else(|| Some(slugify(&raw.label)).filter(|s| !s.is_empty()))
    .or_else(|| Some(slugify(&raw.id)).filter(|s| !s.is_empty()))
    .unwrap_or_else(|| FALLBACK_SLUG.to_string());

  Service {
    id: raw.id.clone(),
    label: raw.label.clone(),
    slug,
    enabled: is_truthy(&raw.status),
  }
}

/// Map every service and keep only the enabled ones, preserving order.
pub fn map_enabled(raw: &[ApiService]) -> Vec<Service> {
  raw
    .iter()
    .map(map_service)
    .filter(|service| service.enabled)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_slugify() {
    assert_eq!(slugify("Y Combinator"), "y-combinator");
    assert_eq!(slugify("abc_123"), "abc-123");
    assert_eq!(slugify("  --Seed & Series A!!  "), "seed-series-a");
    assert_eq!(slugify("GST/Tax  Filing"), "gst-tax-filing");
    assert_eq!(slugify("!!!"), "");
  }

  #[test]
  fn test_slug_derived_from_label() {
    let service = map_service(&ApiService::new("1", "Y Combinator", true));
    assert_eq!(service.slug, "y-combinator");
  }

  #[test]
  fn test_slug_falls_back_to_id() {
    let service = map_service(&ApiService::new("abc_123", "", true));
    assert_eq!(service.slug, "abc-123");

    let service = map_service(&ApiService::new("abc_123", "???", true));
    assert_eq!(service.slug, "abc-123");
  }

  #[test]
  fn test_slug_never_empty() {
    let service = map_service(&ApiService::new("#", "", true));
    assert_eq!(service.slug, "service");
  }

  #[test]
  fn test_supplied_value_wins_unless_blank() {
    let service = map_service(&ApiService::new("1", "Y Combinator", true).with_value("yc"));
    assert_eq!(service.slug, "yc");

    let service = map_service(&ApiService::new("1", "Y Combinator", true).with_value("   "));
    assert_eq!(service.slug, "y-combinator");
  }

  #[test]
  fn test_truthiness() {
    for value in [
      json!(true),
      json!(1),
      json!(-2.5),
      json!("true"),
      json!("false"),
      json!("0"),
      json!(" "),
      json!([]),
      json!({}),
    ] {
      assert!(is_truthy(&value), "{} should be truthy", value);
    }
    for value in [json!(false), json!(0), json!(0.0), json!(null), json!("")] {
      assert!(!is_truthy(&value), "{} should be falsy", value);
    }
  }

  #[test]
  fn test_string_status_false_is_still_enabled() {
    let raw: ApiService =
      serde_json::from_value(json!({"_id": "1", "label": "A", "status": "false"})).unwrap();

    assert!(map_service(&raw).enabled);
  }

  #[test]
  fn test_map_enabled_filters_disabled() {
    let raw = vec![
      ApiService::new("1", "One", true),
      ApiService::new("2", "Two", false),
    ];

    let mapped = map_enabled(&raw);

    assert_eq!(mapped.len(), 1);
    assert_eq!(mapped[0].id, "1");
  }
}
