// src/services/catalog.rs

//! Remote catalog access and outcome classification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::Result;
use crate::models::{FetcherConfig, ModelId, Outcome, Record};

/// Upstream source of records.
///
/// Implementations must be safe to call from many workers at once and must
/// never fail `classify` by other means than returning an error outcome.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch one id and classify the result.
    async fn classify(&self, id: ModelId) -> Outcome;

    /// Highest id in the catalog's "latest items" listing, if any.
    async fn latest_max_id(&self) -> Result<Option<ModelId>>;
}

/// HTTP-backed catalog.
pub struct HttpCatalog {
    client: Client,
    base_url: Url,
    latest_url: Url,
    config: FetcherConfig,
}

impl HttpCatalog {
    /// Create a catalog with a client built from the configuration.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(client, config)
    }

    /// Create a catalog around an existing client.
    pub fn with_client(client: Client, config: &FetcherConfig) -> Result<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            latest_url: Url::parse(&config.latest_url)?,
            config: config.clone(),
        })
    }

    /// URL of the record for `id`.
    pub fn record_url(&self, id: ModelId) -> Result<Url> {
        Ok(self.base_url.join(&id.to_string())?)
    }

    /// One request, no retries. `Err` only for timeouts.
    async fn attempt(&self, url: &Url) -> std::result::Result<Outcome, reqwest::Error> {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => return Ok(transport_error(&e)),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Outcome::NotFound);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Outcome::RateLimited);
        }
        if !status.is_success() {
            return Ok(status_error(status));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => return Ok(transport_error(&e)),
        };
        Ok(classify_body(&body))
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn classify(&self, id: ModelId) -> Outcome {
        let url = match self.record_url(id) {
            Ok(url) => url,
            Err(e) => return Outcome::PermanentError(format!("ERR {e}")),
        };

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(&url).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    log::debug!(
                        "Timeout fetching {} (attempt {}/{}): {}",
                        id,
                        attempt,
                        max_attempts,
                        e
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Outcome::TransientError("timeout".to_string())
    }

    async fn latest_max_id(&self) -> Result<Option<ModelId>> {
        let bytes = self
            .client
            .get(self.latest_url.clone())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        Ok(max_item_id(&body))
    }
}

/// Classify a 2xx body.
fn classify_body(body: &[u8]) -> Outcome {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => return Outcome::PermanentError(format!("ERR invalid JSON: {e}")),
    };

    if let Some(message) = value.get("error") {
        let message = message
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| message.to_string());
        if message.contains("No model") {
            return Outcome::NotFound;
        }
        return Outcome::PermanentError(format!("ERR upstream error: {message}"));
    }

    Outcome::Success(Record::new(value))
}

fn status_error(status: StatusCode) -> Outcome {
    let reason = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
    );
    if status.is_server_error() {
        Outcome::TransientError(reason)
    } else {
        Outcome::PermanentError(reason)
    }
}

fn transport_error(error: &reqwest::Error) -> Outcome {
    match error.status() {
        Some(status) => Outcome::TransientError(format!("{} {}", status.as_u16(), error)),
        None => Outcome::TransientError(format!("ERR {error}")),
    }
}

/// Largest `id` in a listing shaped as `{"items": [...]}` or a bare array.
fn max_item_id(body: &Value) -> Option<ModelId> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .or_else(|| body.as_array())?;
    items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_u64))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(server: &MockServer) -> FetcherConfig {
        FetcherConfig {
            base_url: format!("{}/api/v1/models", server.uri()),
            latest_url: format!("{}/api/v1/models?sort=Newest", server.uri()),
            max_attempts: 3,
            backoff_unit_ms: 1,
            ..FetcherConfig::default()
        }
    }

    fn catalog(server: &MockServer, timeout: Duration) -> HttpCatalog {
        let client = Client::builder().timeout(timeout).build().unwrap();
        HttpCatalog::with_client(client, &fast_config(server)).unwrap()
    }

    #[tokio::test]
    async fn test_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 7, "name": "seven"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(7).await;
        assert_eq!(
            outcome,
            Outcome::Success(Record::new(json!({"id": 7, "name": "seven"})))
        );
    }

    #[tokio::test]
    async fn test_http_404_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(2).await;
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_error_payload_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": "No model with id 3"})),
            )
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(3).await;
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_other_error_payload_is_not_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/4"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Internal failure"})),
            )
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(4).await;
        assert!(matches!(outcome, Outcome::PermanentError(r) if r.contains("Internal failure")));
    }

    #[tokio::test]
    async fn test_429_is_rate_limited_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/5"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(5).await;
        assert_eq!(outcome, Outcome::RateLimited);
    }

    #[tokio::test]
    async fn test_server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/6"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(6).await;
        assert_eq!(
            outcome,
            Outcome::TransientError("503 Service Unavailable".into())
        );
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/8"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(8).await;
        assert_eq!(outcome, Outcome::PermanentError("403 Forbidden".into()));
    }

    #[tokio::test]
    async fn test_invalid_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops"))
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_secs(5)).classify(9).await;
        assert!(matches!(outcome, Outcome::PermanentError(r) if r.starts_with("ERR invalid JSON")));
    }

    #[tokio::test]
    async fn test_timeout_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models/10"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": 10}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let outcome = catalog(&server, Duration::from_millis(50))
            .classify(10)
            .await;
        assert_eq!(outcome, Outcome::TransientError("timeout".into()));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let config = FetcherConfig {
            base_url: "http://127.0.0.1:1/models".into(),
            ..FetcherConfig::default()
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let catalog = HttpCatalog::with_client(client, &config).unwrap();

        let outcome = catalog.classify(1).await;
        assert!(matches!(outcome, Outcome::TransientError(r) if r.starts_with("ERR")));
    }

    #[tokio::test]
    async fn test_latest_max_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": 120}, {"id": 131}, {"id": 97}, {"name": "no id"}],
                "metadata": {"nextCursor": "abc"}
            })))
            .mount(&server)
            .await;

        let latest = catalog(&server, Duration::from_secs(5))
            .latest_max_id()
            .await
            .unwrap();
        assert_eq!(latest, Some(131));
    }

    #[test]
    fn test_record_url() {
        let config = FetcherConfig {
            base_url: "https://example.com/api/v1/models/".into(),
            ..FetcherConfig::default()
        };
        let catalog = HttpCatalog::new(&config).unwrap();
        assert_eq!(
            catalog.record_url(42).unwrap().as_str(),
            "https://example.com/api/v1/models/42"
        );
    }

    #[test]
    fn test_max_item_id_shapes() {
        assert_eq!(max_item_id(&json!([{"id": 3}, {"id": 9}])), Some(9));
        assert_eq!(max_item_id(&json!({"items": []})), None);
        assert_eq!(max_item_id(&json!({"unexpected": true})), None);
    }
}
