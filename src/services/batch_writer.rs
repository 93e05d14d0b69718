//! Sink reconciliation with delete-then-replace semantics.
//!
//! Batches commit independently: a failure in one batch never rolls back
//! the batches before it, and the next scheduled pass self-corrects any
//! partial state. The report carries aggregate counts instead of an
//! all-or-nothing result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{CatalogItem, Location, Promotion};
use crate::retry::RetryPolicy;
use crate::sink::{ItemRecord, LookupOutcome, PromotionRecord, SinkAdapter, UpsertOutcome};

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_QUANTITY_FLOOR: i64 = 5;
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub batch_size: usize,
    pub quantity_floor: i64,
    /// Scheduled pause between batches, keeping pressure off the sink.
    pub batch_pause: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            quantity_floor: DEFAULT_QUANTITY_FLOOR,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

/// Aggregate counts for one replace operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl WriteReport {
    pub fn absorb(&mut self, other: &WriteReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

pub struct BatchWriter {
    sink: Arc<dyn SinkAdapter>,
    retry: RetryPolicy,
    config: BatchWriterConfig,
}

impl BatchWriter {
    pub fn new(sink: Arc<dyn SinkAdapter>, retry: RetryPolicy, config: BatchWriterConfig) -> Self {
        Self {
            sink,
            retry,
            config,
        }
    }

    /// Replaces the location's item rows with the fresh snapshot:
    /// location-scoped delete, then batched inserts. Rows below the
    /// quantity floor or failing validation are dropped up front.
    #[instrument(skip(self, items), fields(location = %location.name, fetched = items.len()))]
    pub async fn replace_items(&self, location: &Location, items: &[CatalogItem]) -> WriteReport {
        let mut report = WriteReport::default();

        let mut rows: Vec<ItemRecord> = Vec::with_capacity(items.len());
        for item in items {
            if !item.meets_quantity_floor(self.config.quantity_floor) {
                report.skipped += 1;
                continue;
            }
            let record = ItemRecord::from_item(location, item);
            match record.validate() {
                Ok(()) => rows.push(record),
                Err(err) => {
                    report.errors += 1;
                    debug!(error = %err, "dropping invalid item row");
                }
            }
        }

        match self
            .retry
            .execute(|| self.sink.delete_items(&location.id))
            .await
        {
            Ok(deleted) => report.deleted = deleted,
            Err(err) => {
                error!(error = %err, "failed to clear existing item rows; aborting replace");
                report.errors += rows.len() as u64;
                return report;
            }
        }

        for (index, batch) in rows.chunks(self.config.batch_size).enumerate() {
            if index > 0 && !self.config.batch_pause.is_zero() {
                sleep(self.config.batch_pause).await;
            }
            match self.retry.execute(|| self.sink.insert_items(batch)).await {
                Ok(()) => {
                    report.created += batch.len() as u64;
                    debug!(batch = index, rows = batch.len(), "batch committed");
                }
                Err(err) => {
                    // Earlier batches stay committed; the next pass heals.
                    report.errors += batch.len() as u64;
                    error!(batch = index, error = %err, "batch insert failed");
                }
            }
        }

        info!(
            created = report.created,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors,
            "item reconciliation complete"
        );
        report
    }

    /// Reconciles the location's promotions by upsert, rebuilding each
    /// record's location association list as a union with what the sink
    /// already knows. Inactive, soft-deleted, and expired promotions are
    /// dropped up front.
    #[instrument(skip(self, promotions), fields(location = %location.name, fetched = promotions.len()))]
    pub async fn replace_promotions(
        &self,
        location: &Location,
        promotions: &[Promotion],
        now: DateTime<Utc>,
    ) -> WriteReport {
        let mut report = WriteReport::default();

        for promotion in promotions {
            if !promotion.is_live(now) {
                report.skipped += 1;
                continue;
            }
            let mut record = PromotionRecord::from_promotion(location, promotion);
            if let Err(err) = record.validate() {
                report.errors += 1;
                debug!(error = %err, "dropping invalid promotion row");
                continue;
            }
            match self.upsert_with_membership(&mut record, location).await {
                Ok(UpsertOutcome::Created) => report.created += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(
                        promotion_id = %record.promotion_id,
                        error = %err,
                        "promotion upsert failed"
                    );
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            "promotion reconciliation complete"
        );
        report
    }

    async fn upsert_with_membership(
        &self,
        record: &mut PromotionRecord,
        location: &Location,
    ) -> Result<UpsertOutcome, ServiceError> {
        if let LookupOutcome::Found(existing) = self
            .retry
            .execute(|| self.sink.find_promotion(&record.promotion_id))
            .await?
        {
            record.absorb_locations(&existing.applies_to_locations, location);
        }

        let record = &*record;
        match self
            .retry
            .execute(|| self.sink.upsert_promotion(record))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_unique_violation() => {
                // Benign race: another writer created the row first. Re-find
                // and refresh; if it still cannot be found, the other writer
                // owns it now.
                match self
                    .retry
                    .execute(|| self.sink.find_promotion(&record.promotion_id))
                    .await?
                {
                    LookupOutcome::Found(_) => {
                        self.retry
                            .execute(|| self.sink.upsert_promotion(record))
                            .await
                    }
                    LookupOutcome::NotFound => Ok(UpsertOutcome::Skipped),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Purges sink promotions that are expired, soft-deleted, or no longer
    /// offered by any location. Runs once per full pass, after every
    /// location has been reconciled.
    #[instrument(skip(self, active_ids))]
    pub async fn purge_stale_promotions(
        &self,
        active_ids: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let known = self.retry.execute(|| self.sink.list_promotions()).await?;
        let mut purged = 0u64;
        for record in known {
            let expired = record.valid_until.map_or(false, |until| until <= now);
            let stale = record.is_deleted
                || !record.is_active
                || expired
                || !active_ids.contains(&record.promotion_id);
            if !stale {
                continue;
            }
            match self
                .retry
                .execute(|| self.sink.delete_promotion(&record.promotion_id))
                .await
            {
                Ok(()) => {
                    purged += 1;
                    debug!(promotion_id = %record.promotion_id, "purged stale promotion");
                }
                Err(err) => {
                    warn!(promotion_id = %record.promotion_id, error = %err, "failed to purge promotion");
                }
            }
        }
        if purged > 0 {
            info!(purged, "stale promotions removed from sink");
        }
        Ok(purged)
    }
}
