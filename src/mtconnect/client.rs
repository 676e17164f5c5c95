//! HTTP fetch primitive for MTConnect documents.
//!
//! One GET per call, `Accept: application/xml`, no retries and no caching.
//! Retry policy belongs to the caller; the poller simply waits for its next
//! tick.

use reqwest::header;
use std::time::Duration;

use crate::error::CollectorError;

/// Build the shared HTTP client with the configured per-fetch timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// `/probe` URL for an endpoint, tolerating a trailing slash.
pub fn probe_url(endpoint: &str) -> String {
    format!("{}/probe", endpoint.trim_end_matches('/'))
}

/// `/current` URL for an endpoint, tolerating a trailing slash.
pub fn current_url(endpoint: &str) -> String {
    format!("{}/current", endpoint.trim_end_matches('/'))
}

/// Fetch one XML document. Any non-success status or transport error becomes
/// a [`CollectorError::Fetch`] naming the URL.
pub async fn fetch_xml(client: &reqwest::Client, url: &str) -> Result<String, CollectorError> {
    let response = client
        .get(url)
        .header(header::ACCEPT, "application/xml")
        .send()
        .await
        .map_err(|e| CollectorError::fetch(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CollectorError::fetch(
            url,
            format!("server responded with status {status}"),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| CollectorError::fetch(url, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining_trims_trailing_slash() {
        assert_eq!(probe_url("http://agent:5000/"), "http://agent:5000/probe");
        assert_eq!(probe_url("http://agent:5000"), "http://agent:5000/probe");
        assert_eq!(
            current_url("http://agent:5000/"),
            "http://agent:5000/current"
        );
    }
}
