//! REST collection adapter for the downstream store.
//!
//! The collection API exposes `GET/POST/PUT/DELETE` on paginated
//! collections filterable by field equality. Older deployments wrap row
//! fields in an `attributes` object; rows are normalized into one flat
//! shape here and the ambiguity never leaves this module. The API has no
//! native upsert, so concurrent creates are resolved by re-finding and
//! updating — and skipped silently when another writer owns the row.

use std::time::Duration;

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    ItemRecord, LocationProvider, LookupOutcome, PromotionRecord, SinkAdapter, UpsertOutcome,
};
use crate::errors::ServiceError;
use crate::models::Location;

const ITEMS_COLLECTION: &str = "items";
const PROMOTIONS_COLLECTION: &str = "promotions";
const LOCATIONS_COLLECTION: &str = "locations";
const PAGE_SIZE: usize = 100;
/// Concurrent row requests per burst when emulating bulk writes.
const WRITE_CONCURRENCY: usize = 20;

pub struct RestSink {
    http: Client,
    base_url: String,
}

impl RestSink {
    pub fn new(api_url: &str, api_token: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_token}"))
            .map_err(|err| ServiceError::ConfigError(format!("invalid sink token: {err}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                ServiceError::ConfigError(format!("failed to construct http client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/api/{}", self.base_url, collection)
    }

    fn row_url(&self, collection: &str, row_id: i64) -> String {
        format!("{}/api/{}/{}", self.base_url, collection, row_id)
    }

    /// Normalizes a v4 `attributes`-wrapped row or a v5 flat row into one
    /// flat object.
    fn flatten_row(mut row: Value) -> Value {
        if let Some(obj) = row.as_object_mut() {
            if let Some(Value::Object(attributes)) = obj.remove("attributes") {
                for (key, value) in attributes {
                    obj.entry(key).or_insert(value);
                }
            }
        }
        row
    }

    fn row_id(row: &Value) -> Option<i64> {
        row.get("id").and_then(Value::as_i64)
    }

    async fn error_from_response(response: Response) -> ServiceError {
        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.to_ascii_lowercase().contains("unique") {
            return ServiceError::Conflict(format!("{url}: {body}"));
        }
        if status == StatusCode::NOT_FOUND {
            return ServiceError::NotFound(format!("{url} returned 404"));
        }
        if status.is_server_error() {
            return ServiceError::ExternalServiceError(format!("{url} returned {status}"));
        }
        ServiceError::ExternalApiError(format!("{url} returned {status}: {body}"))
    }

    async fn fetch_page(
        &self,
        collection: &str,
        filters: &[(String, String)],
        page: usize,
    ) -> Result<Vec<Value>, ServiceError> {
        let mut request = self.http.get(self.collection_url(collection)).query(&[
            ("pagination[pageSize]".to_string(), PAGE_SIZE.to_string()),
            ("pagination[page]".to_string(), page.to_string()),
        ]);
        for (field, value) in filters {
            request = request.query(&[(format!("filters[{field}][$eq]"), value.clone())]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let body: Value = response.json().await?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_all(
        &self,
        collection: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<Value>, ServiceError> {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_page(collection, filters, page).await?;
            let last_page = batch.len() < PAGE_SIZE;
            rows.extend(batch);
            if last_page {
                return Ok(rows);
            }
            page += 1;
        }
    }

    /// Single-row lookup by field equality, returning the collection row id
    /// alongside the flattened row.
    async fn find_row(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<(i64, Value)>, ServiceError> {
        let response = self
            .http
            .get(self.collection_url(collection))
            .query(&[
                (format!("filters[{field}][$eq]"), value.to_string()),
                ("pagination[pageSize]".to_string(), "1".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let body: Value = response.json().await?;
        let row = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .cloned();
        Ok(row.and_then(|row| {
            let id = Self::row_id(&row)?;
            Some((id, Self::flatten_row(row)))
        }))
    }

    async fn create_row(&self, collection: &str, data: &Value) -> Result<(), ServiceError> {
        let response = self
            .http
            .post(self.collection_url(collection))
            .json(&json!({ "data": data }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn update_row(
        &self,
        collection: &str,
        row_id: i64,
        data: &Value,
    ) -> Result<(), ServiceError> {
        let response = self
            .http
            .put(self.row_url(collection, row_id))
            .json(&json!({ "data": data }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// Deleting a row that is already gone is success, not an error.
    async fn delete_row(&self, collection: &str, row_id: i64) -> Result<(), ServiceError> {
        let response = self
            .http
            .delete(self.row_url(collection, row_id))
            .send()
            .await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// Writes one item row, resolving a unique-constraint race by updating
    /// the row the other writer created.
    async fn write_item_row(&self, record: &ItemRecord) -> Result<(), ServiceError> {
        let data = serde_json::to_value(record)?;
        match self.create_row(ITEMS_COLLECTION, &data).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unique_violation() => {
                match self
                    .find_row(ITEMS_COLLECTION, "itemId", &record.item_id)
                    .await?
                {
                    Some((row_id, _)) => self.update_row(ITEMS_COLLECTION, row_id, &data).await,
                    // Another writer owns the row now.
                    None => Ok(()),
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait::async_trait]
impl SinkAdapter for RestSink {
    async fn delete_items(&self, location_id: &str) -> Result<u64, ServiceError> {
        let rows = self
            .fetch_all(
                ITEMS_COLLECTION,
                &[("locationId".to_string(), location_id.to_string())],
            )
            .await?;
        let row_ids: Vec<i64> = rows.iter().filter_map(Self::row_id).collect();
        let mut deleted = 0u64;
        for chunk in row_ids.chunks(WRITE_CONCURRENCY) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|row_id| self.delete_row(ITEMS_COLLECTION, *row_id)),
            )
            .await;
            for result in results {
                result?;
                deleted += 1;
            }
        }
        debug!(location_id, deleted, "cleared item rows");
        Ok(deleted)
    }

    async fn insert_items(&self, rows: &[ItemRecord]) -> Result<(), ServiceError> {
        for chunk in rows.chunks(WRITE_CONCURRENCY) {
            let results = join_all(chunk.iter().map(|record| self.write_item_row(record))).await;
            for result in results {
                result?;
            }
        }
        Ok(())
    }

    async fn find_promotion(
        &self,
        promotion_id: &str,
    ) -> Result<LookupOutcome<PromotionRecord>, ServiceError> {
        match self
            .find_row(PROMOTIONS_COLLECTION, "promotionId", promotion_id)
            .await?
        {
            Some((_, row)) => Ok(LookupOutcome::Found(serde_json::from_value(row)?)),
            None => Ok(LookupOutcome::NotFound),
        }
    }

    async fn upsert_promotion(&self, row: &PromotionRecord) -> Result<UpsertOutcome, ServiceError> {
        let data = serde_json::to_value(row)?;
        let existing = self
            .find_row(PROMOTIONS_COLLECTION, "promotionId", &row.promotion_id)
            .await?;

        match existing {
            Some((row_id, _)) => {
                match self.update_row(PROMOTIONS_COLLECTION, row_id, &data).await {
                    Ok(()) => Ok(UpsertOutcome::Updated),
                    // The row was deleted between lookup and update.
                    Err(ServiceError::NotFound(_)) => {
                        self.create_row(PROMOTIONS_COLLECTION, &data).await?;
                        Ok(UpsertOutcome::Created)
                    }
                    Err(err) => Err(err),
                }
            }
            None => match self.create_row(PROMOTIONS_COLLECTION, &data).await {
                Ok(()) => Ok(UpsertOutcome::Created),
                Err(err) if err.is_unique_violation() => {
                    // Another writer created the promotion between our
                    // lookup and create.
                    match self
                        .find_row(PROMOTIONS_COLLECTION, "promotionId", &row.promotion_id)
                        .await?
                    {
                        Some((row_id, _)) => {
                            self.update_row(PROMOTIONS_COLLECTION, row_id, &data).await?;
                            Ok(UpsertOutcome::Updated)
                        }
                        None => {
                            warn!(
                                promotion_id = %row.promotion_id,
                                "promotion vanished after conflicting create; skipping"
                            );
                            Ok(UpsertOutcome::Skipped)
                        }
                    }
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn list_promotions(&self) -> Result<Vec<PromotionRecord>, ServiceError> {
        let rows = self.fetch_all(PROMOTIONS_COLLECTION, &[]).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let flattened = Self::flatten_row(row);
            match serde_json::from_value::<PromotionRecord>(flattened) {
                Ok(record) => records.push(record),
                Err(err) => warn!(error = %err, "skipping malformed promotion row"),
            }
        }
        Ok(records)
    }

    async fn delete_promotion(&self, promotion_id: &str) -> Result<(), ServiceError> {
        match self
            .find_row(PROMOTIONS_COLLECTION, "promotionId", promotion_id)
            .await?
        {
            Some((row_id, _)) => self.delete_row(PROMOTIONS_COLLECTION, row_id).await,
            None => Ok(()),
        }
    }

    fn supports_native_upsert(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl LocationProvider for RestSink {
    async fn active_locations(&self) -> Result<Vec<Location>, ServiceError> {
        let rows = self.fetch_all(LOCATIONS_COLLECTION, &[]).await?;
        let mut locations = Vec::with_capacity(rows.len());
        for row in rows {
            let row_id = Self::row_id(&row);
            let mut flattened = Self::flatten_row(row);
            // The collection row id doubles as the location identifier.
            if let (Some(id), Some(obj)) = (row_id, flattened.as_object_mut()) {
                obj.insert("id".to_string(), Value::String(id.to_string()));
            }
            match serde_json::from_value::<Location>(flattened) {
                Ok(location) if location.is_active => locations.push(location),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "skipping malformed location row"),
            }
        }
        debug!(count = locations.len(), "fetched active locations");
        Ok(locations)
    }
}
