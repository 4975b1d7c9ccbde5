use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::ExporterError;
use crate::insights::RepoBranchSelector;

const DEFAULT_API_URL: &str = "https://circleci.com/api/v2";
const DEFAULT_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_PAGES: usize = 100;

/// Trailing range the insights API aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportingWindow {
    #[serde(rename = "last-24-hours")]
    Last24Hours,
    #[default]
    #[serde(rename = "last-7-days")]
    Last7Days,
    #[serde(rename = "last-30-days")]
    Last30Days,
    #[serde(rename = "last-60-days")]
    Last60Days,
    #[serde(rename = "last-90-days")]
    Last90Days,
}

impl ReportingWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Last24Hours => "last-24-hours",
            Self::Last7Days => "last-7-days",
            Self::Last30Days => "last-30-days",
            Self::Last60Days => "last-60-days",
            Self::Last90Days => "last-90-days",
        }
    }
}

impl fmt::Display for ReportingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportingWindow {
    type Err = ExporterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "last-24-hours" => Ok(Self::Last24Hours),
            "last-7-days" => Ok(Self::Last7Days),
            "last-30-days" => Ok(Self::Last30Days),
            "last-60-days" => Ok(Self::Last60Days),
            "last-90-days" => Ok(Self::Last90Days),
            other => Err(ExporterError::Config(format!(
                "Unknown reporting window '{other}'. Expected one of: last-24-hours, \
                 last-7-days, last-30-days, last-60-days, last-90-days"
            ))),
        }
    }
}

/// Version control provider segment of the insights project slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsSlug {
    GitHub,
    Bitbucket,
}

impl VcsSlug {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "gh",
            Self::Bitbucket => "bb",
        }
    }
}

/// What a failed refresh cycle does to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep serving the last committed snapshot and retry next interval
    #[default]
    Degrade,
    /// Terminate the process so staleness is never served
    Exit,
}

/// Configuration file structure.
///
/// Every field is optional; command line flags and environment variables take
/// precedence over values found here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    /// CircleCI personal API token
    pub token: Option<String>,

    /// Insights API base URL
    pub api_url: Option<String>,

    #[serde(default)]
    pub github: SourceConfig,

    #[serde(default)]
    pub bitbucket: SourceConfig,

    pub reporting_window: Option<ReportingWindow>,

    /// Poll interval in seconds
    pub interval: Option<u64>,

    pub port: Option<u16>,

    /// Per-request timeout in seconds
    pub request_timeout: Option<u64>,

    /// Upper bound on pages fetched for one scope
    pub max_pages: Option<usize>,

    pub on_error: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub branches: Vec<String>,
}

impl SourceConfig {
    fn selector(&self) -> Option<RepoBranchSelector> {
        let selector = RepoBranchSelector::new(self.repositories.clone(), self.branches.clone());
        (!selector.is_empty()).then_some(selector)
    }
}

impl FileConfig {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./circleci-exporter.toml
    /// 3. ./circleci-exporter.json
    /// 4. ./circleci-exporter.yaml
    /// 5. ./circleci-exporter.yml
    ///
    /// Returns an empty configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "circleci-exporter.toml",
            "circleci-exporter.json",
            "circleci-exporter.yaml",
            "circleci-exporter.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

/// Values supplied on the command line or through the environment.
///
/// Repository and branch lists are comma-separated, matching the
/// `GITHUB_REPOSITORY` / `GITHUB_BRANCH` variables.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub github_repositories: Option<String>,
    pub github_branches: Option<String>,
    pub bitbucket_repositories: Option<String>,
    pub bitbucket_branches: Option<String>,
    pub reporting_window: Option<String>,
    pub interval: Option<u64>,
    pub port: Option<u16>,
    pub request_timeout: Option<u64>,
    pub max_pages: Option<usize>,
    pub on_error: Option<FailurePolicy>,
}

/// Fully resolved and validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub token: Token,
    pub api_url: Url,
    pub vcs: VcsSlug,
    pub selector: RepoBranchSelector,
    pub reporting_window: ReportingWindow,
    pub interval: Duration,
    pub port: u16,
    pub request_timeout: Duration,
    pub max_pages: usize,
    pub on_error: FailurePolicy,
}

impl Settings {
    /// Merge overrides on top of the file configuration and validate the result.
    ///
    /// # Errors
    ///
    /// Returns `ExporterError::Config` when the token or the repository/branch
    /// lists are missing, or when any value is out of range.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> crate::error::Result<Self> {
        let token = overrides
            .token
            .or(file.token)
            .map(|t| Token::from(t.as_str()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ExporterError::Config("missing environment variable CIRCLECI_TOKEN".to_string())
            })?;

        let api_url = overrides
            .api_url
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url)
            .map_err(|e| ExporterError::Config(format!("Invalid API URL '{api_url}': {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(ExporterError::Config(format!(
                "API URL '{api_url}' cannot be used as a base URL"
            )));
        }

        let github = merge_source(
            &file.github,
            overrides.github_repositories.as_deref(),
            overrides.github_branches.as_deref(),
        );
        let bitbucket = merge_source(
            &file.bitbucket,
            overrides.bitbucket_repositories.as_deref(),
            overrides.bitbucket_branches.as_deref(),
        );

        let (vcs, selector) = match (github.selector(), bitbucket.selector()) {
            (Some(selector), _) => (VcsSlug::GitHub, selector),
            (None, Some(selector)) => (VcsSlug::Bitbucket, selector),
            (None, None) => {
                return Err(ExporterError::Config(
                    "Missing repositories. Define either GITHUB_REPOSITORY and GITHUB_BRANCH, \
                     or BITBUCKET_REPOSITORY and BITBUCKET_BRANCH"
                        .to_string(),
                ))
            }
        };

        let reporting_window = match overrides.reporting_window.as_deref() {
            Some(window) if !window.trim().is_empty() => window.parse()?,
            _ => file.reporting_window.unwrap_or_default(),
        };

        let interval = overrides
            .interval
            .or(file.interval)
            .unwrap_or(DEFAULT_INTERVAL_SECONDS);
        if interval == 0 {
            return Err(ExporterError::Config(
                "Poll interval must be greater than zero seconds".to_string(),
            ));
        }

        let request_timeout = overrides
            .request_timeout
            .or(file.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);
        if request_timeout == 0 {
            return Err(ExporterError::Config(
                "Request timeout must be greater than zero seconds".to_string(),
            ));
        }

        let max_pages = overrides
            .max_pages
            .or(file.max_pages)
            .unwrap_or(DEFAULT_MAX_PAGES);
        if max_pages == 0 {
            return Err(ExporterError::Config(
                "Max pages must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            token,
            api_url,
            vcs,
            selector,
            reporting_window,
            interval: Duration::from_secs(interval),
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
            request_timeout: Duration::from_secs(request_timeout),
            max_pages,
            on_error: overrides.on_error.or(file.on_error).unwrap_or_default(),
        })
    }
}

fn merge_source(
    file: &SourceConfig,
    repositories: Option<&str>,
    branches: Option<&str>,
) -> SourceConfig {
    SourceConfig {
        repositories: repositories
            .map(split_list)
            .unwrap_or_else(|| file.repositories.clone()),
        branches: branches
            .map(split_list)
            .unwrap_or_else(|| file.branches.clone()),
    }
}

/// Split a comma-separated list, dropping blank entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
