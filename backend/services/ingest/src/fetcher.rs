use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_common::types::RecordCategory;
use ferry_db::connections::models::TenantConnection;

use crate::retry::{self, RetryPolicy};
use crate::source::{Page, PageRequest, PageSource, SourceError};

/// Fetches single pages from the upstream API with bounded retries.
#[derive(Clone)]
pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
    page_size: u32,
}

impl PageFetcher {
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy, page_size: u32) -> Self {
        Self {
            source,
            policy,
            page_size,
        }
    }

    /// Fetch the page at `cursor` (`None` = first page).
    ///
    /// On exhaustion the last [`SourceError`] is returned; callers can ask it
    /// for whatever next cursor the failed response exposed.
    pub async fn fetch(
        &self,
        connection: &TenantConnection,
        category: RecordCategory,
        cursor: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page, SourceError> {
        let request = PageRequest {
            endpoint: connection.endpoint.clone(),
            access_token: connection.access_token.clone(),
            category,
            cursor: cursor.map(str::to_string),
            updated_since: if cursor.is_none() { updated_since } else { None },
            page_size: self.page_size,
        };
        let label = format!("fetch {category} page");

        retry::execute(&self.policy, &label, || self.source.fetch_page(&request)).await
    }
}
