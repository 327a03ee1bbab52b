//! HTTP user directory backed by the marketplace user service.

use super::{DirectoryError, UserDirectory};
use crate::domain::UserId;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Resolves users with `GET {base_url}/users/{id}`: 2xx exists, 404 or 410 gone.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpUserDirectory {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Bound the total time spent retrying one lookup.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// The id is pushed as one path segment, so `/`, `?` and `#` are escaped.
    fn user_url(&self, user_id: &UserId) -> Result<Url, DirectoryError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| DirectoryError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push("users")
            .push(user_id.as_str());
        Ok(url)
    }
}

/// Map a response status to a lookup result.
fn classify(status: StatusCode) -> Result<bool, backoff::Error<DirectoryError>> {
    if status.is_success() {
        return Ok(true);
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Ok(false);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(backoff::Error::transient(DirectoryError::RateLimited));
    }
    if status.is_server_error() {
        return Err(backoff::Error::transient(DirectoryError::Http {
            status: status.as_u16(),
            message: "Server error".to_string(),
        }));
    }
    Err(backoff::Error::permanent(DirectoryError::Http {
        status: status.as_u16(),
        message: "Client error".to_string(),
    }))
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn user_exists(&self, user_id: &UserId) -> Result<bool, DirectoryError> {
        let url = self.user_url(user_id)?;
        debug!(user = %user_id, url = %url, "Resolving user");

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self.client.get(url.clone()).send().await.map_err(|e| {
                backoff::Error::transient(DirectoryError::Network(e.to_string()))
            })?;
            classify(response.status())
        })
        .await
    }
}
