//! Per-location synchronization orchestrator.
//!
//! One pass walks `FetchingLocations -> PerLocation(Fetching -> Matching ->
//! CachePopulating -> Writing) -> Cleanup`. Locations are processed
//! strictly sequentially so two passes never race on shared promotion
//! rows; inside one location, the catalog and promotion fetches overlap.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use strum::Display;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::PromotionCache;
use crate::errors::ServiceError;
use crate::events::{EventSender, SyncEvent};
use crate::matching;
use crate::models::{Location, SourceCredentials};
use crate::retry::RetryPolicy;
use crate::services::batch_writer::{BatchWriter, WriteReport};
use crate::sink::LocationProvider;
use crate::source::{SourceClient, SourceConfig};

/// Phases of one reconciliation pass, carried in spans and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    FetchingLocations,
    Fetching,
    Matching,
    CachePopulating,
    Writing,
    Cleanup,
}

/// Counts for one location's pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LocationStats {
    pub location_id: String,
    pub location_name: String,
    pub items_fetched: u64,
    pub promotions_fetched: u64,
    pub matched_pairs: u64,
    pub items: WriteReport,
    pub promotions: WriteReport,
    pub errors: u64,
}

/// Aggregate counts for one full run across all locations.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub locations_total: u64,
    pub locations_synced: u64,
    pub locations_skipped: u64,
    pub locations_failed: u64,
    pub items_fetched: u64,
    pub promotions_fetched: u64,
    pub matched_pairs: u64,
    pub items: WriteReport,
    pub promotions: WriteReport,
    pub promotions_purged: u64,
    pub errors: u64,
    pub per_location: Vec<LocationStats>,
}

impl RunStats {
    fn absorb(&mut self, location: LocationStats) {
        self.items_fetched += location.items_fetched;
        self.promotions_fetched += location.promotions_fetched;
        self.matched_pairs += location.matched_pairs;
        self.items.absorb(&location.items);
        self.promotions.absorb(&location.promotions);
        self.errors += location.errors;
        self.per_location.push(location);
    }
}

pub struct SyncOrchestrator {
    locations: Arc<dyn LocationProvider>,
    writer: BatchWriter,
    cache: Arc<PromotionCache>,
    retry: RetryPolicy,
    source_config: SourceConfig,
    interval: Option<Duration>,
    events: Option<EventSender>,
}

impl SyncOrchestrator {
    pub fn new(
        locations: Arc<dyn LocationProvider>,
        writer: BatchWriter,
        cache: Arc<PromotionCache>,
        retry: RetryPolicy,
        source_config: SourceConfig,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            locations,
            writer,
            cache,
            retry,
            source_config,
            interval,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    async fn emit(&self, event: SyncEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event).await;
        }
    }

    /// Runs one full reconciliation pass. Only a failure to enumerate
    /// locations is fatal; each location's failure is recorded in the
    /// statistics and the pass moves on.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RunStats, ServiceError> {
        let run_id = Uuid::new_v4();
        info!(phase = %SyncPhase::FetchingLocations, "loading locations");
        let locations = self.locations.active_locations().await?;

        let mut stats = RunStats {
            run_id,
            locations_total: locations.len() as u64,
            ..RunStats::default()
        };
        info!(%run_id, locations = locations.len(), "starting reconciliation run");
        self.emit(SyncEvent::RunStarted {
            run_id,
            locations: locations.len() as u64,
            timestamp: Utc::now(),
        })
        .await;

        let mut live_promotion_ids: HashSet<String> = HashSet::new();

        for location in &locations {
            let Some(credentials) = location.credentials() else {
                warn!(location = %location.name, "skipping location without source credentials");
                stats.locations_skipped += 1;
                self.emit(SyncEvent::LocationSkipped {
                    run_id,
                    location_id: location.id.clone(),
                    reason: "missing source credentials".into(),
                })
                .await;
                continue;
            };

            match self
                .sync_location(location, &credentials, &mut live_promotion_ids)
                .await
            {
                Ok(location_stats) => {
                    stats.locations_synced += 1;
                    self.emit(SyncEvent::LocationSynced {
                        run_id,
                        location_id: location.id.clone(),
                        matched_pairs: location_stats.matched_pairs,
                        errors: location_stats.errors,
                    })
                    .await;
                    stats.absorb(location_stats);
                }
                Err(err) => {
                    error!(location = %location.name, error = %err, "location pass failed");
                    stats.locations_failed += 1;
                    stats.errors += 1;
                    stats.per_location.push(LocationStats {
                        location_id: location.id.clone(),
                        location_name: location.name.clone(),
                        errors: 1,
                        ..LocationStats::default()
                    });
                    self.emit(SyncEvent::LocationFailed {
                        run_id,
                        location_id: location.id.clone(),
                        error: err.to_string(),
                    })
                    .await;
                }
            }
        }

        let now = Utc::now();
        info!(phase = %SyncPhase::Cleanup, live = live_promotion_ids.len(), "purging stale promotions");
        match self
            .writer
            .purge_stale_promotions(&live_promotion_ids, now)
            .await
        {
            Ok(purged) => stats.promotions_purged = purged,
            Err(err) => {
                warn!(error = %err, "promotion cleanup failed");
                stats.errors += 1;
            }
        }

        info!(
            %run_id,
            locations_synced = stats.locations_synced,
            locations_skipped = stats.locations_skipped,
            locations_failed = stats.locations_failed,
            items_fetched = stats.items_fetched,
            promotions_fetched = stats.promotions_fetched,
            matched_pairs = stats.matched_pairs,
            created = stats.items.created + stats.promotions.created,
            deleted = stats.items.deleted + stats.promotions.deleted,
            purged = stats.promotions_purged,
            errors = stats.errors,
            "reconciliation run complete"
        );
        self.emit(SyncEvent::RunCompleted {
            run_id,
            locations_synced: stats.locations_synced,
            matched_pairs: stats.matched_pairs,
            errors: stats.errors,
            promotions_purged: stats.promotions_purged,
            timestamp: Utc::now(),
        })
        .await;

        Ok(stats)
    }

    /// One location's pass: concurrent fetches, the matching loop, cache
    /// population, then sink writes.
    #[instrument(skip(self, credentials, live_promotion_ids), fields(location = %location.name))]
    async fn sync_location(
        &self,
        location: &Location,
        credentials: &SourceCredentials,
        live_promotion_ids: &mut HashSet<String>,
    ) -> Result<LocationStats, ServiceError> {
        let source = SourceClient::new(&self.source_config, credentials, self.retry.clone())?;

        // Fetching: both feeds are read-only and safe to overlap.
        info!(phase = %SyncPhase::Fetching, "fetching catalog and promotions");
        let (items, promotions) =
            tokio::try_join!(source.fetch_inventory(), source.fetch_promotions())?;

        let now = Utc::now();
        let mut stats = LocationStats {
            location_id: location.id.clone(),
            location_name: location.name.clone(),
            items_fetched: items.len() as u64,
            promotions_fetched: promotions.len() as u64,
            ..LocationStats::default()
        };

        // Matching: the O(items x promotions) hot loop. Cache population is
        // fire-and-forget relative to the sink writes below.
        let mut cached = 0usize;
        for item in &items {
            let matched = matching::applicable_promotions(item, &promotions, now);
            if matched.is_empty() {
                continue;
            }
            stats.matched_pairs += matched.len() as u64;
            self.cache.put(location, item, &matched, now);
            cached += 1;
        }
        info!(
            phase = %SyncPhase::Matching,
            items = items.len(),
            promotions = promotions.len(),
            matched_pairs = stats.matched_pairs,
            "matching complete"
        );
        info!(phase = %SyncPhase::CachePopulating, entries = cached, "cache refreshed");

        for promotion in &promotions {
            if promotion.is_live(now) {
                live_promotion_ids.insert(promotion.promotion_id.to_string());
            }
        }

        // Writing: items first, then promotions, both batch-scoped.
        info!(phase = %SyncPhase::Writing, "reconciling into sink");
        stats.items = self.writer.replace_items(location, &items).await;
        stats.promotions = self
            .writer
            .replace_promotions(location, &promotions, now)
            .await;
        stats.errors = stats.items.errors + stats.promotions.errors;

        Ok(stats)
    }

    /// Runs forever on the configured interval, or once when no interval is
    /// set. Passes never overlap: the next tick waits for the previous pass
    /// to finish.
    pub async fn run_with_schedule(&self) -> Result<(), ServiceError> {
        let Some(every) = self.interval else {
            self.run_once().await?;
            return Ok(());
        };

        info!(interval_secs = every.as_secs(), "starting scheduled sync loop");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                // The next scheduled pass self-corrects; keep the loop alive.
                error!(error = %err, "reconciliation run failed");
            }
            info!(phase = %SyncPhase::Idle, "awaiting next scheduled pass");
        }
    }
}
