use log::debug;

use super::client::InsightsClient;
use super::types::{InsightItem, InsightPage};
use crate::config::ReportingWindow;
use crate::error::{ExporterError, Result};
use crate::insights::InsightScope;

/// Longest response body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// A scope whose contribution was dropped from the current cycle.
#[derive(Debug, Clone)]
pub struct SkippedScope {
    pub scope: InsightScope,
    pub reason: String,
}

impl InsightsClient {
    /// Fetch every page of `scope`, following `next_page_token` until the API
    /// reports no more pages.
    ///
    /// Items are returned in page order. The listing is abandoned with
    /// `ExporterError::Pagination` if a token repeats or more than `max_pages`
    /// pages are requested, since the API does not promise termination.
    ///
    /// # Errors
    ///
    /// - `Network` on transport failure
    /// - `UnexpectedStatus` for any status outside 2xx
    /// - `Decode` when a page body is not a valid insights page
    /// - `Pagination` when the cursor does not terminate
    pub(super) async fn fetch_all_pages(
        &self,
        scope: &InsightScope,
        window: ReportingWindow,
    ) -> Result<Vec<InsightItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=self.max_pages {
            let url = self.insights_url(scope, window, page_token.as_deref())?;
            let raw = self.fetch_page(url).await?;

            if !raw.status.is_success() {
                return Err(ExporterError::UnexpectedStatus {
                    status: raw.status.as_u16(),
                    body: truncate_body(&raw.body),
                });
            }

            let page: InsightPage<InsightItem> =
                serde_json::from_str(&raw.body).map_err(|source| ExporterError::Decode {
                    source,
                    body: truncate_body(&raw.body),
                })?;

            debug!(
                "{}: page {} returned {} items",
                scope,
                page_number,
                page.items.len()
            );
            items.extend(page.items);

            match page.next_page_token {
                None => return Ok(items),
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    return Err(ExporterError::Pagination(format!(
                        "{scope}: page token '{next}' returned twice in a row"
                    )));
                }
                Some(next) => page_token = Some(next),
            }
        }

        Err(ExporterError::Pagination(format!(
            "{scope}: still paginating after {} pages",
            self.max_pages
        )))
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        truncated.push_str("...");
        truncated
    }
}
