//! Application API client handed to test bodies.
//!
//! A thin wrapper over `reqwest` that carries the base URI, the admin API key
//! and the workspace the test operates on. It only speaks raw JSON; typed
//! resources are the test author's business.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use berth_core::error::BerthError;
use berth_provision::TargetId;

/// Header carrying the admin API key (`X-Octopus-ApiKey`).
pub const API_KEY_HEADER: &str = "x-octopus-apikey";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by [`ApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The API key cannot be sent as a header value.
    #[error("invalid API key: {0}")]
    InvalidApiKey(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// Transport failure.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Non-2xx response.
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Response body is not the expected JSON.
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl From<ClientError> for BerthError {
    fn from(err: ClientError) -> Self {
        BerthError::Infrastructure(err.to_string())
    }
}

/// JSON API client bound to one application instance and workspace.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_uri: String,
    workspace: TargetId,
}

impl ApiClient {
    /// Build a client for `base_uri` authenticating with `api_key`.
    ///
    /// The workspace starts as the default one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidApiKey`] if the key contains characters
    /// not allowed in a header value.
    pub fn new(base_uri: impl Into<String>, api_key: &str) -> Result<Self, ClientError> {
        let mut key =
            HeaderValue::from_str(api_key).map_err(|e| ClientError::InvalidApiKey(e.to_string()))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            http,
            base_uri: base_uri.into().trim_end_matches('/').to_owned(),
            workspace: TargetId::default(),
        })
    }

    /// Same client, scoped to another workspace.
    pub fn for_workspace(&self, workspace: TargetId) -> Self {
        Self {
            http: self.http.clone(),
            base_uri: self.base_uri.clone(),
            workspace,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn workspace(&self) -> &TargetId {
        &self.workspace
    }

    /// `/api/{workspace}/{suffix}` for the current workspace.
    pub fn workspace_path(&self, suffix: &str) -> String {
        format!("/api/{}/{}", self.workspace, suffix.trim_start_matches('/'))
    }

    /// GET `path` (relative to the base URI) and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        let request = self.http.get(&url);
        self.send(url, request).await
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let request = self.http.post(&url).json(body);
        self.send(url, request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_uri, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await.map_err(|e| ClientError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(url = url.as_str(), status = status.as_u16(), "API request failed");
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| ClientError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_path_uses_current_workspace() {
        let client = ApiClient::new("http://localhost:8080/", "API-KEY").unwrap();
        assert_eq!(client.base_uri(), "http://localhost:8080");
        assert_eq!(client.workspace_path("projects"), "/api/Spaces-1/projects");

        let scoped = client.for_workspace(TargetId::new("Spaces-2"));
        assert_eq!(scoped.workspace_path("/projects/all"), "/api/Spaces-2/projects/all");
        assert_eq!(client.workspace().as_str(), "Spaces-1");
    }

    #[test]
    fn api_key_with_newline_is_rejected() {
        let err = ApiClient::new("http://localhost", "API-\nKEY").unwrap_err();
        assert!(matches!(err, ClientError::InvalidApiKey(_)));
    }

    #[test]
    fn client_errors_are_infrastructure_errors() {
        let err: BerthError = ClientError::Status {
            url: "http://localhost/api".to_owned(),
            status: 500,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, BerthError::Infrastructure(_)));
    }
}
