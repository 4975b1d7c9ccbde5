use reqwest::header::{HeaderName, HeaderValue};

use crate::error::{ExporterError, Result};

/// Header CircleCI expects personal API tokens in.
pub static TOKEN_HEADER: HeaderName = HeaderName::from_static("circle-token");

/// A CircleCI personal API token. Never printed.
#[derive(Clone)]
pub struct Token(String);

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Header value marked sensitive so it is skipped by reqwest's debug output.
    pub fn header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(self.as_str())
            .map_err(|e| ExporterError::Config(format!("Invalid CircleCI token: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}
