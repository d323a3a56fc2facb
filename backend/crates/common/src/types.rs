use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FerryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub instance_id: Uuid,
}

impl ServiceInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            instance_id: Uuid::new_v4(),
        }
    }
}

/// Cadence/scope of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncClass {
    Full,
    Incremental,
    Manual,
}

impl SyncClass {
    pub const ALL: [SyncClass; 3] = [SyncClass::Full, SyncClass::Incremental, SyncClass::Manual];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncClass::Full => "full",
            SyncClass::Incremental => "incremental",
            SyncClass::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncClass {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncClass::Full),
            "incremental" => Ok(SyncClass::Incremental),
            "manual" => Ok(SyncClass::Manual),
            other => Err(FerryError::Validation(format!("unknown sync class: {other}"))),
        }
    }
}

/// Kind of upstream record. Selects both the upstream path and the
/// destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Orders,
    Transactions,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::Orders => "orders",
            RecordCategory::Transactions => "transactions",
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordCategory {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orders" | "order" => Ok(RecordCategory::Orders),
            "transactions" | "transaction" => Ok(RecordCategory::Transactions),
            other => Err(FerryError::Validation(format!(
                "unknown record category: {other}"
            ))),
        }
    }
}

/// Partition key shared by checkpoints and the failed-batch ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey {
    pub tenant_id: Uuid,
    pub sync_class: SyncClass,
    pub category: RecordCategory,
}

impl SyncKey {
    pub fn new(tenant_id: Uuid, sync_class: SyncClass, category: RecordCategory) -> Self {
        Self {
            tenant_id,
            sync_class,
            category,
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.sync_class, self.category)
    }
}
