use std::str::FromStr;
use std::time::Duration;

use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::SyncClass;
use uuid::Uuid;

use crate::env::{get_var_or, parse_var_or};

/// What one invocation of the ingest binary does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sync(SyncClass),
    /// Re-attempt ledgered batches instead of syncing.
    Replay,
}

impl FromStr for RunMode {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(RunMode::Replay),
            other => other
                .parse::<SyncClass>()
                .map(RunMode::Sync)
                .map_err(|_| FerryError::Config(format!("unknown SYNC_MODE: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub mode: RunMode,
    /// Explicit tenant list; `None` means every enabled connection.
    pub tenants: Option<Vec<Uuid>>,
    /// Repeat incremental runs on this interval until shutdown.
    pub interval: Option<Duration>,
}

impl ServiceConfig {
    pub fn from_env() -> FerryResult<Self> {
        let mode: RunMode = get_var_or("SYNC_MODE", "incremental").parse()?;
        let tenants = parse_tenants(&get_var_or("SYNC_TENANTS", ""))?;
        let interval_secs: u64 = parse_var_or("SYNC_INTERVAL_SECS", 0)?;

        let interval = match interval_secs {
            0 => None,
            secs if mode == RunMode::Sync(SyncClass::Incremental) => Some(Duration::from_secs(secs)),
            _ => {
                return Err(FerryError::Config(
                    "SYNC_INTERVAL_SECS is only supported with SYNC_MODE=incremental".into(),
                ))
            }
        };

        Ok(Self {
            mode,
            tenants,
            interval,
        })
    }
}

fn parse_tenants(raw: &str) -> FerryResult<Option<Vec<Uuid>>> {
    let mut tenants = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = Uuid::parse_str(part)
            .map_err(|e| FerryError::Config(format!("invalid tenant id in SYNC_TENANTS: {part}: {e}")))?;
        if !tenants.contains(&id) {
            tenants.push(id);
        }
    }
    Ok((!tenants.is_empty()).then_some(tenants))
}
