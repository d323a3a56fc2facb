use std::str::FromStr;
use std::time::Duration;

use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::{RecordCategory, SyncClass};

use crate::env::{get_var_or, parse_var_or};

/// What the orchestrator does when a page fetch fails after all retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailurePolicy {
    /// Continue with a next cursor taken from the failed response, if it exposed one.
    SkipForward,
    /// Stop the run and leave the checkpoint for a later resume.
    Abort,
}

impl FromStr for FetchFailurePolicy {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip_forward" | "skip" => Ok(FetchFailurePolicy::SkipForward),
            "abort" => Ok(FetchFailurePolicy::Abort),
            other => Err(FerryError::Config(format!(
                "unknown fetch failure policy: {other}"
            ))),
        }
    }
}

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    pub batch_size: usize,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_rate_limit_waits: u32,
    pub inter_batch_delay: Duration,
    pub wait_full: Duration,
    pub wait_incremental: Duration,
    pub wait_manual: Duration,
    pub checkpoint_ttl: Duration,
    pub http_timeout: Duration,
    pub max_concurrent_tenants: usize,
    pub categories: Vec<RecordCategory>,
    pub fetch_failure_policy: FetchFailurePolicy,
    pub incremental_overlap: Duration,
    pub incremental_lookback_days: u32,
    pub lock_stale_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 250,
            batch_size: 25,
            max_retries: 3,
            initial_backoff: Duration::from_millis(1_000),
            max_backoff: Duration::from_millis(30_000),
            max_rate_limit_waits: 10,
            inter_batch_delay: Duration::from_millis(100),
            wait_full: Duration::from_millis(2_000),
            wait_incremental: Duration::from_millis(500),
            wait_manual: Duration::from_millis(2_000),
            checkpoint_ttl: Duration::from_secs(7 * 24 * 3600),
            http_timeout: Duration::from_secs(30),
            max_concurrent_tenants: 4,
            categories: vec![RecordCategory::Orders],
            fetch_failure_policy: FetchFailurePolicy::SkipForward,
            incremental_overlap: Duration::from_secs(3600),
            incremental_lookback_days: 7,
            lock_stale_after: Duration::from_secs(3600),
        }
    }
}

impl SyncConfig {
    /// Load sync settings from `SYNC_*` environment variables, using
    /// [`SyncConfig::default`] for anything unset.
    pub fn from_env() -> FerryResult<Self> {
        let d = Self::default();

        let page_size: u32 = parse_var_or("SYNC_PAGE_SIZE", d.page_size)?;
        if page_size == 0 {
            return Err(FerryError::Config("SYNC_PAGE_SIZE must be positive".into()));
        }
        let batch_size: usize = parse_var_or("SYNC_BATCH_SIZE", d.batch_size)?;
        if batch_size == 0 {
            return Err(FerryError::Config("SYNC_BATCH_SIZE must be positive".into()));
        }
        let max_concurrent_tenants: usize =
            parse_var_or("SYNC_MAX_CONCURRENT_TENANTS", d.max_concurrent_tenants)?;
        if max_concurrent_tenants == 0 {
            return Err(FerryError::Config(
                "SYNC_MAX_CONCURRENT_TENANTS must be positive".into(),
            ));
        }

        let initial_backoff = millis("SYNC_INITIAL_BACKOFF_MS", d.initial_backoff)?;
        let max_backoff = millis("SYNC_MAX_BACKOFF_MS", d.max_backoff)?;
        if max_backoff < initial_backoff {
            return Err(FerryError::Config(
                "SYNC_MAX_BACKOFF_MS must not be lower than SYNC_INITIAL_BACKOFF_MS".into(),
            ));
        }

        let checkpoint_ttl_hours: u64 = parse_var_or("SYNC_CHECKPOINT_TTL_HOURS", 168)?;

        Ok(Self {
            page_size,
            batch_size,
            max_retries: parse_var_or("SYNC_MAX_RETRIES", d.max_retries)?,
            initial_backoff,
            max_backoff,
            max_rate_limit_waits: parse_var_or("SYNC_MAX_RATE_LIMIT_WAITS", d.max_rate_limit_waits)?,
            inter_batch_delay: millis("SYNC_INTER_BATCH_DELAY_MS", d.inter_batch_delay)?,
            wait_full: millis("SYNC_WAIT_FULL_MS", d.wait_full)?,
            wait_incremental: millis("SYNC_WAIT_INCREMENTAL_MS", d.wait_incremental)?,
            wait_manual: millis("SYNC_WAIT_MANUAL_MS", d.wait_manual)?,
            checkpoint_ttl: Duration::from_secs(checkpoint_ttl_hours * 3600),
            http_timeout: Duration::from_secs(parse_var_or(
                "SYNC_HTTP_TIMEOUT_SECS",
                d.http_timeout.as_secs(),
            )?),
            max_concurrent_tenants,
            categories: parse_categories(&get_var_or("SYNC_CATEGORIES", "orders"))?,
            fetch_failure_policy: get_var_or("SYNC_FETCH_FAILURE_POLICY", "skip_forward").parse()?,
            incremental_overlap: Duration::from_secs(
                60 * parse_var_or::<u64>("SYNC_INCREMENTAL_OVERLAP_MINUTES", 60)?,
            ),
            incremental_lookback_days: parse_var_or(
                "SYNC_INCREMENTAL_LOOKBACK_DAYS",
                d.incremental_lookback_days,
            )?,
            lock_stale_after: Duration::from_secs(
                60 * parse_var_or::<u64>("SYNC_LOCK_STALE_MINUTES", 60)?,
            ),
        })
    }

    /// Pause between pages. Incremental runs are short and latency-sensitive;
    /// full and manual runs walk the whole history and pace themselves harder.
    pub fn wait_interval(&self, class: SyncClass) -> Duration {
        match class {
            SyncClass::Full => self.wait_full,
            SyncClass::Incremental => self.wait_incremental,
            SyncClass::Manual => self.wait_manual,
        }
    }
}

fn millis(key: &str, default: Duration) -> FerryResult<Duration> {
    let ms: u64 = parse_var_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

/// Parse a comma-separated category list, keeping first occurrence order.
/// Returns `Err` if every entry is blank.
pub fn parse_categories(raw: &str) -> FerryResult<Vec<RecordCategory>> {
    let mut categories = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let category: RecordCategory = part
            .parse()
            .map_err(|e: FerryError| FerryError::Config(e.to_string()))?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    if categories.is_empty() {
        return Err(FerryError::Config(
            "SYNC_CATEGORIES is set but contains no valid categories".into(),
        ));
    }
    Ok(categories)
}
