//! In-memory progress snapshots, one `watch` channel per running sync.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use ferry_common::types::{RecordCategory, SyncClass};
use ferry_db::checkpoint::models::Checkpoint;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStage {
    Init,
    Fetching,
    Writing,
    Checkpointing,
    Waiting,
    Completed,
    Aborted,
    Cancelled,
}

impl SyncStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStage::Completed | SyncStage::Aborted | SyncStage::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub tenant_id: Uuid,
    pub sync_class: SyncClass,
    pub category: Option<RecordCategory>,
    pub stage: SyncStage,
    pub items_so_far: u64,
    pub current_page: u32,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn new(tenant_id: Uuid, sync_class: SyncClass) -> Self {
        Self {
            tenant_id,
            sync_class,
            category: None,
            stage: SyncStage::Init,
            items_so_far: 0,
            current_page: 0,
            message: "starting".to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Coarse status for a run that left a checkpoint behind.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let message = match checkpoint.failed_pages.len() {
            0 => format!("interrupted before page {}", checkpoint.page_index),
            n => format!(
                "interrupted before page {} ({n} failed pages)",
                checkpoint.page_index
            ),
        };
        Self {
            tenant_id: checkpoint.key.tenant_id,
            sync_class: checkpoint.key.sync_class,
            category: Some(checkpoint.key.category),
            stage: SyncStage::Aborted,
            items_so_far: checkpoint.items_persisted,
            current_page: checkpoint.page_index,
            message,
            updated_at: checkpoint.updated_at,
        }
    }
}

/// Registry of the latest status per tenant.
///
/// Writers own a [`StatusPublisher`]; readers only see the receiver side, so
/// a slow reader never blocks a run.
#[derive(Clone, Default)]
pub struct StatusFeed {
    channels: Arc<RwLock<HashMap<Uuid, watch::Receiver<SyncStatus>>>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start publishing for a new run; replaces any earlier run's channel.
    pub fn register(&self, tenant_id: Uuid, sync_class: SyncClass) -> StatusPublisher {
        let (tx, rx) = watch::channel(SyncStatus::new(tenant_id, sync_class));
        self.channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tenant_id, rx);
        StatusPublisher { tx }
    }

    pub fn get_status(&self, tenant_id: Uuid) -> Option<SyncStatus> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&tenant_id)
            .map(|rx| rx.borrow().clone())
    }

    pub fn subscribe(&self, tenant_id: Uuid) -> Option<watch::Receiver<SyncStatus>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&tenant_id)
            .cloned()
    }
}

pub struct StatusPublisher {
    tx: watch::Sender<SyncStatus>,
}

impl StatusPublisher {
    pub fn publish(
        &self,
        category: Option<RecordCategory>,
        stage: SyncStage,
        items_so_far: u64,
        current_page: u32,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::debug!(?stage, page = current_page, items = items_so_far, %message, "sync stage");
        self.tx.send_modify(|status| {
            status.category = category;
            status.stage = stage;
            status.items_so_far = items_so_far;
            status.current_page = current_page;
            status.message = message;
            status.updated_at = Utc::now();
        });
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }
}
