use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::auth::{Token, TOKEN_HEADER};
use crate::config::{ReportingWindow, VcsSlug};
use crate::error::{ExporterError, Result};
use crate::insights::InsightScope;

/// Status and undecoded body of one insights response.
#[derive(Debug)]
pub struct RawPage {
    pub status: StatusCode,
    pub body: String,
}

/// Authenticated client for the CircleCI insights endpoints.
pub struct InsightsClient {
    client: Client,
    api_url: Url,
    vcs: VcsSlug,
    pub(super) max_pages: usize,
}

impl InsightsClient {
    /// Creates a client that sends `token` with every request and gives up on
    /// any single request after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ExporterError::Config` if the token is not a valid header value,
    /// the base URL cannot carry path segments, or the HTTP client cannot be built.
    pub fn new(
        api_url: Url,
        vcs: VcsSlug,
        token: &Token,
        timeout: Duration,
        max_pages: usize,
    ) -> Result<Self> {
        if api_url.cannot_be_a_base() {
            return Err(ExporterError::Config(format!(
                "API URL '{api_url}' cannot be used as a base URL"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER.clone(), token.header_value()?);

        let client = Client::builder()
            .user_agent(concat!("circleci-insights-exporter/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ExporterError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url,
            vcs,
            max_pages,
        })
    }

    /// Builds the insights URL for `scope`.
    ///
    /// Workflow scopes map to `/insights/{vcs}/{org}/{repo}/workflows`, job
    /// scopes to `/insights/{vcs}/{org}/{repo}/workflows/{workflow}/jobs`. The
    /// `page-token` parameter is only sent when continuing a listing.
    pub fn insights_url(
        &self,
        scope: &InsightScope,
        window: ReportingWindow,
        page_token: Option<&str>,
    ) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                ExporterError::Config(format!("Invalid API base URL: {}", self.api_url))
            })?;
            segments.pop_if_empty().push("insights").push(self.vcs.as_str());
            segments.extend(scope.repo.split('/').filter(|part| !part.is_empty()));
            segments.push("workflows");
            if let Some(workflow) = &scope.workflow {
                segments.push(workflow).push("jobs");
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("branch", &scope.branch)
                .append_pair("reporting-window", window.as_str());
            if let Some(token) = page_token {
                query.append_pair("page-token", token);
            }
        }

        Ok(url)
    }

    /// Performs one GET. Only transport failures are errors; the status is
    /// returned as-is for the caller to judge.
    pub async fn fetch_page(&self, url: Url) -> Result<RawPage> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(RawPage { status, body })
    }
}
