use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::insights::InsightMetrics;

/// One page of an insights listing.
///
/// `next_page_token` is `None` when the listing is exhausted; the API may
/// signal that with `null`, an empty string or by omitting the field.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightPage<T> {
    #[serde(default, deserialize_with = "non_empty_token")]
    pub next_page_token: Option<String>,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// A summary item from the workflows or jobs insights endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightItem {
    /// Workflow or job name
    pub name: String,
    #[serde(default)]
    pub metrics: InsightMetrics,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

fn non_empty_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let token: Option<String> = Option::deserialize(deserializer)?;
    Ok(token.filter(|t| !t.is_empty()))
}
