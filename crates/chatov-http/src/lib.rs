//! HTTP adapter for the overlay.
//!
//! Implements the `chatov-core` Transport port with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use chatov_core::{
    errors::Error,
    ports::{Cursor, HttpResponse, Transport, TransportError},
    Result,
};

const GET_MESSAGES_PATH: &str = "get-messages";

#[derive(Clone, Debug)]
pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// `base_url` is the directory the overlay was served from (with trailing slash).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            endpoint: endpoint_url(base_url),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        format!("{base_url}{GET_MESSAGES_PATH}")
    } else {
        format!("{base_url}/{GET_MESSAGES_PATH}")
    }
}

/// Query pairs for an incremental fetch, empty when there is no cursor.
pub fn cursor_query(cursor: Option<&Cursor>) -> Vec<(&'static str, String)> {
    match cursor {
        Some(c) => vec![
            ("sid", c.session_id.0.clone()),
            ("mid", c.last_message_id.0.clone()),
        ],
        None => Vec::new(),
    }
}

fn map_err(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_messages(
        &self,
        cursor: Option<&Cursor>,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut req = self.http.get(&self.endpoint);
        let query = cursor_query(cursor);
        if !query.is_empty() {
            req = req.query(&query);
        }

        let resp = req.send().await.map_err(map_err)?;
        let status = resp.status();
        tracing::trace!(status = status.as_u16(), "get-messages responded");

        // A body that stalls past the timeout is still a timeout.
        let body = resp.text().await.map_err(map_err)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}
