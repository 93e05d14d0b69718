// Reconciliation services.

pub mod batch_writer;
pub mod sync;

pub use batch_writer::{BatchWriter, BatchWriterConfig, WriteReport};
pub use sync::{LocationStats, RunStats, SyncOrchestrator};
