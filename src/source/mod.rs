//! Read-only client for the upstream point-of-sale API.
//!
//! One client per location: the API is authenticated per retailer with
//! HTTP Basic using the location's opaque API key as the username and an
//! empty password. All fetches are idempotent and retried per policy.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::models::{CatalogItem, Promotion, SourceCredentials};
use crate::retry::RetryPolicy;

/// Connection settings shared by every location's client.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub api_url: String,
    pub lookback_hours: i64,
    pub timeout: Duration,
}

pub struct SourceClient {
    http: Client,
    base_url: String,
    retailer_id: String,
    lookback_hours: i64,
    retry: RetryPolicy,
}

impl SourceClient {
    pub fn new(
        config: &SourceConfig,
        credentials: &SourceCredentials,
        retry: RetryPolicy,
    ) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        let token = BASE64.encode(format!("{}:", credentials.api_key));
        let mut auth = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|err| ServiceError::ConfigError(format!("invalid api key: {err}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                ServiceError::ConfigError(format!("failed to construct http client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            retailer_id: credentials.retailer_id.clone(),
            lookback_hours: config.lookback_hours,
            retry,
        })
    }

    /// Active products modified within the lookback window.
    #[instrument(skip(self), fields(retailer_id = %self.retailer_id))]
    pub async fn fetch_products(&self) -> Result<Vec<CatalogItem>, ServiceError> {
        let from = (Utc::now() - ChronoDuration::hours(self.lookback_hours))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        debug!(lookback_hours = self.lookback_hours, from = %from, "fetching products");
        let items: Vec<CatalogItem> = self
            .get_json(
                "/products",
                &[
                    ("fromLastModifiedDateUTC", from.as_str()),
                    ("isActive", "true"),
                ],
            )
            .await?;
        debug!(count = items.len(), "fetched products");
        Ok(items)
    }

    /// Active promotions with their inclusion/exclusion filter data.
    #[instrument(skip(self), fields(retailer_id = %self.retailer_id))]
    pub async fn fetch_promotions(&self) -> Result<Vec<Promotion>, ServiceError> {
        let promotions: Vec<Promotion> = self
            .get_json(
                "/discounts",
                &[
                    ("includeInactive", "false"),
                    ("includeInclusionExclusionData", "true"),
                ],
            )
            .await?;
        debug!(count = promotions.len(), "fetched promotions");
        Ok(promotions)
    }

    /// Full inventory snapshot from the reporting feed; the basis for
    /// reconciliation.
    #[instrument(skip(self), fields(retailer_id = %self.retailer_id))]
    pub async fn fetch_inventory(&self) -> Result<Vec<CatalogItem>, ServiceError> {
        let items: Vec<CatalogItem> = self
            .get_json("/reporting/inventory", &[("includeRoomQuantities", "true")])
            .await?;
        debug!(count = items.len(), "fetched inventory");
        Ok(items)
    }

    /// Full promotion snapshot from the reporting feed, including inactive
    /// and soft-deleted rows.
    #[instrument(skip(self), fields(retailer_id = %self.retailer_id))]
    pub async fn fetch_reporting_promotions(&self) -> Result<Vec<Promotion>, ServiceError> {
        let promotions: Vec<Promotion> = self.get_json("/reporting/discounts", &[]).await?;
        debug!(count = promotions.len(), "fetched reporting promotions");
        Ok(promotions)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        self.retry.execute(|| self.fetch_once(url, query)).await
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let response = self.http.get(url).query(query).send().await?;
        let response = Self::check_status(response)?;
        Ok(response.json::<T>().await?)
    }

    fn check_status(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().clone();
        if status == StatusCode::NOT_FOUND {
            Err(ServiceError::NotFound(format!("{url} returned 404")))
        } else if status.is_server_error() {
            Err(ServiceError::ExternalServiceError(format!(
                "{url} returned {status}"
            )))
        } else {
            Err(ServiceError::ExternalApiError(format!(
                "{url} returned {status}"
            )))
        }
    }
}
