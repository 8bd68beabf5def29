//! HTTP client for the ThetaData terminal: greeks history plus the
//! expiration and quote-date listings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::discovery::parse_date_listing;
use super::{Discovery, Retrieval, RetrievalError};
use crate::catalog::TaskKey;

/// Address of a terminal running on the local machine.
pub const DEFAULT_BASE_URL: &str = "http://localhost:25503";

/// Sampling interval requested when none is configured.
pub const DEFAULT_INTERVAL: &str = "5s";

const GREEKS_HISTORY_PATH: &str = "/v3/option/history/greeks/all";
const EXPIRATIONS_PATH: &str = "/v3/option/list/expirations";
const QUOTE_DATES_PATH: &str = "/v3/option/list/dates/quote";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn user_agent() -> String {
    format!("greeks-harvester/{}", env!("CARGO_PKG_VERSION"))
}

/// Fetches all-greeks history CSV for one (symbol, expiration, date).
///
/// Create once and share; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct ThetaClient {
    client: Client,
    base: Url,
    interval: String,
}

impl ThetaClient {
    /// Builds a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidBaseUrl`] if `base_url` is not an
    /// absolute http(s) URL, or [`RetrievalError::ClientBuild`] if the HTTP
    /// client cannot be constructed.
    pub fn new(
        base_url: &str,
        interval: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let invalid = || RetrievalError::InvalidBaseUrl {
            url: base_url.to_string(),
        };
        let base = Url::parse(base_url).map_err(|_| invalid())?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(invalid());
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .gzip(true)
            .user_agent(user_agent())
            .build()
            .map_err(RetrievalError::ClientBuild)?;

        Ok(Self {
            client,
            base,
            interval: interval.into(),
        })
    }

    /// Returns the requested sampling interval.
    #[must_use]
    pub fn interval(&self) -> &str {
        &self.interval
    }

    /// Joins `path` onto the base URL, keeping any base path prefix.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}{path}", self.base.path().trim_end_matches('/')));
        url.set_query(None);
        url
    }

    fn request_url(&self, key: &TaskKey) -> Url {
        let mut url = self.endpoint(GREEKS_HISTORY_PATH);
        url.query_pairs_mut()
            .append_pair("symbol", &key.symbol)
            .append_pair("expiration", &key.expiration_compact())
            .append_pair("date", &key.target_date_compact())
            .append_pair("interval", &self.interval);
        url
    }

    /// GETs `url` and returns the body of a 2xx response.
    async fn get_body(&self, url: Url) -> Result<(String, Vec<u8>), RetrievalError> {
        let url_str = url.to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RetrievalError::network(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::HttpStatus {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RetrievalError::network(&url_str, e))?;
        Ok((url_str, body.to_vec()))
    }
}

#[async_trait]
impl Retrieval for ThetaClient {
    #[instrument(skip(self), fields(key = %key, interval = %self.interval))]
    async fn fetch(&self, key: &TaskKey) -> Result<Vec<u8>, RetrievalError> {
        let (url, body) = self.get_body(self.request_url(key)).await?;
        validate_csv(&url, &body)?;

        debug!(bytes = body.len(), "greeks history fetched");
        Ok(body)
    }
}

#[async_trait]
impl Discovery for ThetaClient {
    #[instrument(skip(self))]
    async fn list_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, RetrievalError> {
        let mut url = self.endpoint(EXPIRATIONS_PATH);
        url.query_pairs_mut().append_pair("symbol", symbol);

        let (url, body) = self.get_body(url).await?;
        let expirations = parse_date_listing(&url, &body, "expiration", 1)?;
        debug!(count = expirations.len(), "expirations listed");
        Ok(expirations)
    }

    #[instrument(skip(self), fields(expiration = %expiration))]
    async fn list_dates(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<NaiveDate>, RetrievalError> {
        let mut url = self.endpoint(QUOTE_DATES_PATH);
        url.query_pairs_mut()
            .append_pair("symbol", symbol)
            .append_pair("expiration", &expiration.format("%Y%m%d").to_string());

        let (url, body) = self.get_body(url).await?;
        let dates = parse_date_listing(&url, &body, "date", 0)?;
        debug!(count = dates.len(), "quote dates listed");
        Ok(dates)
    }
}

/// Checks that `body` starts with a CSV header row.
///
/// The terminal answers some errors with a 2xx and a plain-text message, so
/// the status alone is not enough.
fn validate_csv(url: &str, body: &[u8]) -> Result<(), RetrievalError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RetrievalError::malformed(url, "body is not valid UTF-8"))?;

    let Some(header) = text.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return Err(RetrievalError::malformed(url, "empty body"));
    };

    let first_column = header.split(',').next().unwrap_or_default().trim_matches('"');
    let looks_like_header = header.contains(',')
        && first_column
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());
    if !looks_like_header {
        let preview: String = header.chars().take(80).collect();
        return Err(RetrievalError::malformed(
            url,
            format!("missing CSV header (first line: {preview:?})"),
        ));
    }
    Ok(())
}
