//! # Transport
//!
//! Delivers an encoded payload to the callback endpoint with a single
//! authenticated HTTP POST. Only `200 OK` counts as delivered.

use crate::collector::DataType;
use crate::constants::TOKEN_HEADER;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("callback URL is not configured")]
    MissingEndpoint,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("callback {url} returned {status}: {body}")]
    Rejected {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("callback {url} returned {status} (response body unreadable)")]
    RejectedUnreadable { url: String, status: StatusCode },
}

impl SendError {
    /// HTTP status of a rejected delivery
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SendError::Rejected { status, .. } | SendError::RejectedUnreadable { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Delivers encoded payloads
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn send(&self, body: Vec<u8>, data_type: DataType) -> Result<(), SendError>;
}

/// POSTs payloads with the callback token in the `Token` header
#[derive(Clone)]
pub struct TokenSender {
    client: Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for TokenSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSender")
            .field("url", &self.url)
            .field("token", &"***")
            .finish()
    }
}

impl TokenSender {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, SendError> {
        let url = url.into();
        if url.is_empty() {
            return Err(SendError::MissingEndpoint);
        }
        let client = Client::builder().build().map_err(SendError::Client)?;
        Ok(Self {
            client,
            url,
            token: token.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSender for TokenSender {
    async fn send(&self, body: Vec<u8>, data_type: DataType) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, data_type.content_type())
            .header(TOKEN_HEADER, &self.token)
            .body(body)
            .send()
            .await
            .map_err(|source| SendError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            debug!(callback.url = %self.url, "transport.delivered");
            return Ok(());
        }

        // Best-effort body read; the status alone is still reported if it fails
        match response.text().await {
            Ok(body) => Err(SendError::Rejected {
                url: self.url.clone(),
                status,
                body,
            }),
            Err(_) => Err(SendError::RejectedUnreadable {
                url: self.url.clone(),
                status,
            }),
        }
    }
}
