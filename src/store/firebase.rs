//! Realtime database REST client for the cloud room records

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::CloudConfig;

/// Bound on one-shot reads and writes. The event stream is left unbounded.
const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a Firebase-style realtime database exposed over REST.
/// Each path maps to `<base>/<path>.json`.
#[derive(Clone, Debug)]
pub struct RealtimeDbClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RealtimeDbClient {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.database_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Get the REST URL for a record
    fn record_url(&self, path: &str) -> String {
        match &self.auth_token {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    async fn check(response: Response) -> Result<Response, RealtimeDbError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeDbError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Read a record; a `null` body means it does not exist
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RealtimeDbError> {
        let response = self
            .client
            .get(self.record_url(path))
            .header("Accept", "application/json")
            .timeout(REST_TIMEOUT)
            .send()
            .await
            .map_err(RealtimeDbError::Request)?;

        Self::check(response)
            .await?
            .json::<Option<T>>()
            .await
            .map_err(RealtimeDbError::Parse)
    }

    /// Overwrite a record with `data`
    pub async fn put<T: Serialize>(&self, path: &str, data: &T) -> Result<(), RealtimeDbError> {
        let response = self
            .client
            .put(self.record_url(path))
            .header("Content-Type", "application/json")
            .json(data)
            .timeout(REST_TIMEOUT)
            .send()
            .await
            .map_err(RealtimeDbError::Request)?;

        Self::check(response).await?;
        Ok(())
    }

    /// Open a server-sent event stream of changes under `path`
    pub async fn listen(&self, path: &str) -> Result<Response, RealtimeDbError> {
        let response = self
            .client
            .get(self.record_url(path))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(RealtimeDbError::Request)?;

        Self::check(response).await
    }
}

/// Realtime database errors
#[derive(Debug, thiserror::Error)]
pub enum RealtimeDbError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_urls_carry_the_optional_token() {
        let open = RealtimeDbClient::new(&CloudConfig {
            database_url: "https://cacho.example.com/".to_string(),
            auth_token: None,
        });
        assert_eq!(
            open.record_url("rooms/AB123"),
            "https://cacho.example.com/rooms/AB123.json"
        );

        let authed = RealtimeDbClient::new(&CloudConfig {
            database_url: "https://cacho.example.com".to_string(),
            auth_token: Some("secret".to_string()),
        });
        assert_eq!(
            authed.record_url("rooms/AB123"),
            "https://cacho.example.com/rooms/AB123.json?auth=secret"
        );
    }
}
