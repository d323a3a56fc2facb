use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ferry_common::types::RecordCategory;
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};

use super::models::{non_empty, parse_link_next, Page, PageBody};
use crate::retry::{RetryDisposition, Retryable};

/// Everything needed to request one page.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub endpoint: String,
    pub access_token: String,
    pub category: RecordCategory,
    /// Opaque token or absolute URL from the previous page; `None` for the first page.
    pub cursor: Option<String>,
    /// Only applied to the first page; later pages are positioned by the cursor.
    pub updated_since: Option<DateTime<Utc>>,
    pub page_size: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        retry_after: Duration,
        next_cursor: Option<String>,
    },

    #[error("HTTP {status}: {body}")]
    HttpError {
        status: StatusCode,
        body: String,
        next_cursor: Option<String>,
    },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl SourceError {
    /// Next-page cursor exposed by the failed response, if any.
    pub fn next_cursor(&self) -> Option<&str> {
        match self {
            SourceError::RateLimited { next_cursor, .. }
            | SourceError::HttpError { next_cursor, .. } => next_cursor.as_deref(),
            SourceError::RequestError(_) | SourceError::Decode(_) => None,
        }
    }
}

impl Retryable for SourceError {
    fn disposition(&self) -> RetryDisposition {
        match self {
            SourceError::RateLimited { retry_after, .. } => {
                RetryDisposition::RateLimited(*retry_after)
            }
            SourceError::HttpError { status, .. } if status.is_server_error() => {
                RetryDisposition::Transient
            }
            SourceError::HttpError { status, .. } if *status == StatusCode::REQUEST_TIMEOUT => {
                RetryDisposition::Transient
            }
            SourceError::HttpError { .. } => RetryDisposition::Permanent,
            SourceError::RequestError(e) if e.is_timeout() || e.is_connect() => {
                RetryDisposition::Transient
            }
            SourceError::RequestError(_) | SourceError::Decode(_) => RetryDisposition::Permanent,
        }
    }
}

/// Upstream paginated API. One call = one HTTP round trip, no retries.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError>;
}

#[derive(Clone)]
pub struct HttpPageSource {
    client: Client,
    default_retry_after: Duration,
}

impl HttpPageSource {
    /// `default_retry_after` is used for a 429 without a usable `Retry-After`.
    pub fn new(timeout: Duration, default_retry_after: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            default_retry_after,
        })
    }

    fn build_request(&self, request: &PageRequest) -> Result<reqwest::RequestBuilder, SourceError> {
        let builder = match request.cursor.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                self.client.get(same_origin(url, &request.endpoint)?)
            }
            Some(token) => self
                .client
                .get(list_url(&request.endpoint, request.category))
                .query(&[("cursor", token.to_string()), ("limit", request.page_size.to_string())]),
            None => {
                let mut params = vec![("limit", request.page_size.to_string())];
                if let Some(since) = request.updated_since {
                    params.push((
                        "updated_since",
                        since.to_rfc3339_opts(SecondsFormat::Secs, true),
                    ));
                }
                self.client
                    .get(list_url(&request.endpoint, request.category))
                    .query(&params)
            }
        };
        Ok(builder.bearer_auth(&request.access_token))
    }

    fn retry_after(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

/// An absolute cursor carries the tenant's token, so it must point at the
/// same scheme, host and port as the configured endpoint.
fn same_origin(cursor: &str, endpoint: &str) -> Result<Url, SourceError> {
    let next = Url::parse(cursor).map_err(|e| SourceError::Decode(format!("invalid cursor url: {e}")))?;
    let base = Url::parse(endpoint).map_err(|e| SourceError::Decode(format!("invalid endpoint url: {e}")))?;
    if next.scheme() == base.scheme()
        && next.host_str() == base.host_str()
        && next.port_or_known_default() == base.port_or_known_default()
    {
        Ok(next)
    } else {
        Err(SourceError::Decode(format!(
            "cursor points at {}, not the tenant endpoint",
            next.host_str().unwrap_or("<no host>")
        )))
    }
}

fn list_url(endpoint: &str, category: RecordCategory) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), category.as_str())
}

fn link_next(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_link_next)
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        let response = self.build_request(request)?.send().await?;
        let status = response.status();
        let link_cursor = link_next(response.headers());

        if status.is_success() {
            let body = response
                .json::<PageBody>()
                .await
                .map_err(|e| SourceError::Decode(e.to_string()))?;
            return Ok(Page {
                records: body.records,
                next_cursor: non_empty(body.next_cursor).or(link_cursor),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited {
                retry_after: self.retry_after(response.headers()),
                next_cursor: link_cursor,
            });
        }

        let body = response.text().await.unwrap_or_default();
        // Some gateways still return pagination metadata alongside an error.
        let body_cursor = serde_json::from_str::<PageBody>(&body)
            .ok()
            .and_then(|b| non_empty(b.next_cursor));
        Err(SourceError::HttpError {
            status,
            body,
            next_cursor: body_cursor.or(link_cursor),
        })
    }
}
