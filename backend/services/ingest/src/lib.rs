pub mod checkpoint;
pub mod engine;
pub mod fetcher;
pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod status;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::SyncEngine;
pub use orchestrator::{Stores, SyncOrchestrator, SyncRunResult};
pub use status::{StatusFeed, SyncStage, SyncStatus};
