//! HTTP clients for the external services feedpress talks to.
//!
//! Each service sits behind a small trait so pipeline stages can be tested
//! against in-memory fakes, with one reqwest-backed implementation apiece:
//!
//! | Trait | Implementation | Service |
//! |---|---|---|
//! | [`TextGenerator`] | [`OpenAiGenerator`] | OpenAI-compatible chat completions |
//! | [`ImageSearch`] | [`UnsplashClient`] | Unsplash photo search |
//! | [`SpreadsheetApi`] | [`GoogleSheetsClient`] | Google Sheets v4 |
//! | [`ImageHost`] | [`GoogleDriveClient`] | Google Drive v3 |
//!
//! Transient failures (connection errors, timeouts, HTTP 429 and 5xx) come
//! back flagged retryable; [`with_retry`] re-runs those under a
//! [`RetryPolicy`](feedpress_shared::RetryPolicy).

mod drive;
mod openai;
mod retry;
mod sheets;
mod unsplash;

use feedpress_shared::{FeedpressError, Result};

pub use drive::{GoogleDriveClient, ImageHost, public_image_url};
pub use openai::{Generation, OpenAiGenerator, Prompt, TextGenerator};
pub use retry::with_retry;
pub use sheets::{GoogleSheetsClient, SpreadsheetApi};
pub use unsplash::{ImageHit, ImageSearch, UnsplashClient};

/// User-Agent string for all outbound API requests.
const USER_AGENT: &str = concat!("feedpress/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

/// Which pipeline error a failed call maps to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Generation,
    Publish,
}

impl Failure {
    fn error(self, message: String) -> FeedpressError {
        match self {
            Self::Generation => FeedpressError::generation(message),
            Self::Publish => FeedpressError::publish(message),
        }
    }

    /// Map a transport-level failure.
    pub(crate) fn from_send(self, context: &str, e: reqwest::Error) -> FeedpressError {
        let err = self.error(format!("{context}: {e}"));
        if e.is_timeout() || e.is_connect() || e.is_request() {
            err.retryable()
        } else {
            err
        }
    }

    /// Pass successful responses through; turn the rest into errors.
    pub(crate) async fn check(
        self,
        context: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        let err = self.error(format!("{context}: HTTP {status}: {body}"));
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(err.retryable())
        } else {
            Err(err)
        }
    }

    /// Decode a JSON body.
    pub(crate) async fn json<T: serde::de::DeserializeOwned>(
        self,
        context: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| self.error(format!("{context}: invalid response body: {e}")))
    }
}

pub(crate) fn build_http(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FeedpressError::config(format!("failed to build HTTP client: {e}")))
}
