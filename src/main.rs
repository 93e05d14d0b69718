use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;

use promo_sync as app;

use app::config::SinkMode;
use app::services::batch_writer::{BatchWriter, BatchWriterConfig};
use app::services::sync::SyncOrchestrator;
use app::sink::relational::RelationalSink;
use app::sink::rest::RestSink;
use app::sink::{LocationProvider, SinkAdapter, StaticLocationProvider};

#[derive(Debug, Parser)]
#[command(
    name = "promo-sync",
    about = "Reconciles point-of-sale catalog and promotion data into the downstream store",
    version
)]
struct Args {
    /// Run a single reconciliation pass and exit, ignoring any configured
    /// interval.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let cfg = app::config::load_config()?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    let (event_tx, event_rx) = app::events::channel(1024);
    tokio::spawn(app::events::process_events(event_rx));

    let retry = cfg.retry_policy();
    let cache = Arc::new(app::cache::PromotionCache::new(cfg.cache_ttl()));

    let (sink, locations): (Arc<dyn SinkAdapter>, Arc<dyn LocationProvider>) = match cfg.sink.mode {
        SinkMode::Rest => {
            let rest = Arc::new(
                RestSink::new(&cfg.sink.api_url, &cfg.sink.api_token, cfg.http_timeout())
                    .context("failed to construct sink client")?,
            );
            let provider: Arc<dyn LocationProvider> = if cfg.locations.is_empty() {
                rest.clone()
            } else {
                Arc::new(StaticLocationProvider::new(cfg.locations.clone()))
            };
            (rest, provider)
        }
        SinkMode::Database => {
            let relational = RelationalSink::connect(&cfg.sink.database_url)
                .await
                .context("failed to connect to sink database")?;
            relational
                .ensure_schema()
                .await
                .context("failed to verify sink schema contract")?;
            let provider: Arc<dyn LocationProvider> =
                Arc::new(StaticLocationProvider::new(cfg.locations.clone()));
            (Arc::new(relational), provider)
        }
    };

    let writer = BatchWriter::new(
        sink,
        retry.clone(),
        BatchWriterConfig {
            batch_size: cfg.batch_size,
            quantity_floor: cfg.quantity_floor,
            batch_pause: cfg.batch_pause(),
        },
    );

    let interval = if args.once { None } else { cfg.interval() };
    let orchestrator = SyncOrchestrator::new(
        locations,
        writer,
        cache,
        retry,
        cfg.source_config(),
        interval,
    )
    .with_events(event_tx);

    tokio::select! {
        result = orchestrator.run_with_schedule() => {
            result?;
            info!("sync complete");
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, exiting");
        }
    }

    Ok(())
}
