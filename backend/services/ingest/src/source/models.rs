use chrono::{DateTime, Utc};
use ferry_common::error::{FerryError, FerryResult};
use ferry_common::types::RecordCategory;
use ferry_db::records::models::Record;
use serde::Deserialize;
use uuid::Uuid;

/// One page of raw upstream records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<serde_json::Value>,
    /// `None` means this was the last page.
    pub next_cursor: Option<String>,
}

/// Response body of the paginated list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PageBody {
    #[serde(default, alias = "data", alias = "items")]
    pub records: Vec<serde_json::Value>,
    #[serde(default, alias = "next", alias = "next_page", alias = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Normalise a cursor: blank strings mean "no next page".
pub fn non_empty(cursor: Option<String>) -> Option<String> {
    cursor.filter(|c| !c.trim().is_empty())
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_link_next(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim().replace(' ', "");
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        (!url.is_empty()).then(|| url.to_string())
    })
}

/// Convert one raw upstream object into a [`Record`].
///
/// The only hard requirement is an `id` (string or number); every derived
/// field is best-effort.
pub fn to_record(
    tenant_id: Uuid,
    category: RecordCategory,
    raw: &serde_json::Value,
    synced_at: DateTime<Utc>,
) -> FerryResult<Record> {
    let obj = raw
        .as_object()
        .ok_or_else(|| FerryError::Validation("record is not a JSON object".into()))?;

    let source_id = match obj.get("id") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(FerryError::Validation("record has no usable id".into())),
    };

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
    };
    let timestamp = |key: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    let amount_minor = ["total_price", "amount", "total"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(amount_to_minor);

    Ok(Record {
        tenant_id,
        category,
        source_id,
        status: text(&["status", "financial_status"]),
        currency: text(&["currency"]).map(|c| c.to_uppercase()),
        amount_minor,
        source_created_at: timestamp("created_at"),
        source_updated_at: timestamp("updated_at"),
        payload: raw.clone(),
        synced_at,
    })
}

/// Parse a decimal amount ("12.5", 12.5, "-3") into minor units (two places).
/// Extra fractional digits are truncated.
pub fn amount_to_minor(value: &serde_json::Value) -> Option<i64> {
    let raw = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.as_str()),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac[..2].parse().ok()?,
    };
    let minor = whole.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -minor } else { minor })
}
