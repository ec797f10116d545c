//! HTTP client for the services endpoint.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;

use super::types::ApiService;

/// Why a fetch from the services endpoint failed.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  #[error("request to {url} timed out")]
  Timeout { url: String },
  #[error("request to {url} failed: {source}")]
  Network {
    url: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("HTTP {status} from {url}")]
  Status { url: String, status: StatusCode },
  #[error("unexpected response body from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

/// The authoritative source of services.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// Fetch the complete service list. `token` is sent as the `Authorization` header.
  async fn fetch_services(&self, token: Option<&str>) -> Result<Vec<ApiService>, RemoteError>;
}

/// Services endpoint client
#[derive(Clone)]
pub struct ServicesClient {
  http: reqwest::Client,
  endpoint: Url,
}

impl ServicesClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(format!("svcache/{}", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoint: config.services_url()?,
    })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }
}

#[async_trait]
impl RemoteSource for ServicesClient {
  async fn fetch_services(&self, token: Option<&str>) -> Result<Vec<ApiService>, RemoteError> {
    let url = self.endpoint.to_string();

    let mut request = self.http.get(self.endpoint.clone());
    if let Some(token) = token {
      request = request.header(AUTHORIZATION, token);
    }

    let response = request.send().await.map_err(|source| {
      if source.is_timeout() {
        RemoteError::Timeout { url: url.clone() }
      } else {
        RemoteError::Network {
          url: url.clone(),
          source,
        }
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(RemoteError::Status { url, status });
    }

    let body: Vec<Value> = response.json().await.map_err(|source| RemoteError::Decode {
      url: url.clone(),
      source,
    })?;

    let services = decode_services(body);
    debug!(url = %url, count = services.len(), "fetched services");
    Ok(services)
  }
}

/// Decode each element on its own so one bad entry doesn't sink the list.
///
/// Objects with odd field types are kept; entries that aren't objects, or that
/// carry no id, can't be keyed and are skipped.
pub fn decode_services(body: Vec<Value>) -> Vec<ApiService> {
  body
    .into_iter()
    .enumerate()
    .filter_map(|(index, raw)| match serde_json::from_value::<ApiService>(raw) {
      Ok(service) if !service.id.trim().is_empty() => Some(service),
      Ok(_) => {
        warn!(index, "skipping service without an id");
        None
      }
      Err(e) => {
        warn!(index, error = %e, "skipping malformed service");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use serde_json::json;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server: &MockServer) -> ServicesClient {
    let config = ApiConfig {
      base_url: server.uri(),
      services_path: "/api/services".to_string(),
      timeout_secs: 2,
    };
    ServicesClient::new(&config).unwrap()
  }

  #[test]
  fn test_decode_skips_unkeyable_entries() {
    let body = vec![
      json!({"_id": "1", "label": "One", "status": true}),
      json!("not an object"),
      json!({"label": "No id", "status": true}),
      json!({"_id": "2", "label": "Two", "value": 5}),
    ];

    let services = decode_services(body);

    assert_eq!(services.len(), 2);
    assert_eq!(services[0].id, "1");
    assert_eq!(services[1].id, "2");
    assert_eq!(services[1].value.as_deref(), Some("5"));
  }

  #[tokio::test]
  async fn test_fetch_sends_token_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/services"))
      .and(header("authorization", "secret-token"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"_id": "1", "label": "Seed Funding", "status": true},
        {"_id": "2", "label": "Audit", "value": "audit", "status": false}
      ])))
      .expect(1)
      .mount(&server)
      .await;

    let services = client_for(&server)
      .fetch_services(Some("secret-token"))
      .await
      .unwrap();

    assert_eq!(services.len(), 2);
    assert_eq!(services[1].value.as_deref(), Some("audit"));
  }

  #[tokio::test]
  async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/services"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let err = client_for(&server).fetch_services(None).await.unwrap_err();

    assert!(matches!(
      err,
      RemoteError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
    ));
  }

  #[tokio::test]
  async fn test_non_array_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/services"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
      .mount(&server)
      .await;

    let err = client_for(&server).fetch_services(None).await.unwrap_err();

    assert!(matches!(err, RemoteError::Decode { .. }));
  }
}
