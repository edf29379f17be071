use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::warn;
use waypoint_shared::{Poi, PoiQuery};

use crate::config::HttpBackendConfig;
use crate::error::BackendError;

pub type QueryResult = Result<Vec<Poi>, BackendError>;

const MAX_ERROR_BODY_CHARS: usize = 256;

/// The backend POI store. Implementations must be cheap to call concurrently.
pub trait PoiBackend: Send + Sync {
    fn query<'a>(&'a self, query: &'a PoiQuery) -> BoxFuture<'a, QueryResult>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PoiResponse {
    List(Vec<Poi>),
    Wrapped { pois: Vec<Poi> },
}

impl From<PoiResponse> for Vec<Poi> {
    fn from(response: PoiResponse) -> Self {
        match response {
            PoiResponse::List(pois) | PoiResponse::Wrapped { pois } => pois,
        }
    }
}

/// JSON-over-HTTP backend: `GET endpoint?north=..&south=..&east=..&west=..`.
#[derive(Debug, Clone)]
pub struct HttpPoiBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPoiBackend {
    pub fn new(endpoint: impl Into<String>, config: &HttpBackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("waypoint/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .or_else(|e| {
                warn!(
                    error = %e,
                    "failed to build configured HTTP client, retrying without custom user-agent"
                );
                reqwest::Client::builder()
                    .timeout(config.request_timeout)
                    .connect_timeout(config.connect_timeout)
                    .build()
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &HttpBackendConfig) -> Option<Self> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, query: &PoiQuery) -> QueryResult {
        let bounds = &query.bounds;
        let mut params: Vec<(&str, String)> = vec![
            ("north", bounds.north.to_string()),
            ("south", bounds.south.to_string()),
            ("east", bounds.east.to_string()),
            ("west", bounds.west.to_string()),
        ];
        if !query.categories.is_empty() {
            params.push(("categories", query.categories.join(",")));
        }
        if let Some(audience) = &query.audience {
            params.push(("audience", audience.clone()));
        }

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = resp.bytes().await?;
        let parsed: PoiResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.into())
    }
}

impl PoiBackend for HttpPoiBackend {
    fn query<'a>(&'a self, query: &'a PoiQuery) -> BoxFuture<'a, QueryResult> {
        Box::pin(self.fetch(query))
    }
}
