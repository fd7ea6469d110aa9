//! HTTP remote store client.
//!
//! Talks to a JSON document API:
//!   POST   /v1/{collection}                 -> { "id": "..." }
//!   PATCH  /v1/{collection}/{id}?merge=true
//!   PATCH  /v1/{collection}/{id}
//!   POST   /v1/{collection}/{id}/{field}:append
//!
//! The `:append` endpoint is required to deduplicate by item identity;
//! that server-side contract is what keeps chunk replay idempotent.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteStore};

/// Configuration for the REST remote store.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct RestConfig {
    /// Base URL of the document API
    pub base_url: String,

    /// Bearer token
    pub token: String,
}

/// reqwest-backed `RemoteStore` implementation.
pub struct RestRemoteStore {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

impl RestRemoteStore {
    pub fn new(config: RestConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            client: reqwest::Client::new(),
        }
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, collection, id)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/v1/{}", self.base_url, collection)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(RemoteError::Permission(format!("{}: {}", status, body)))
        } else {
            Err(RemoteError::Network(format!("{}: {}", status, body)))
        }
    }

    fn send_error(e: reqwest::Error) -> RemoteError {
        RemoteError::Network(e.to_string())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn create(&self, collection: &str, doc: Value) -> Result<String, RemoteError> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .bearer_auth(&self.token)
            .json(&doc)
            .send()
            .await
            .map_err(Self::send_error)?;

        let response = self.check(response).await?;
        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Network(format!("bad create response: {}", e)))?;
        Ok(created.id)
    }

    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.doc_url(collection, id))
            .query(&[("merge", "true")])
            .bearer_auth(&self.token)
            .json(&fields)
            .send()
            .await
            .map_err(Self::send_error)?;

        self.check(response).await.map(|_| ())
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.doc_url(collection, id))
            .bearer_auth(&self.token)
            .json(&fields)
            .send()
            .await
            .map_err(Self::send_error)?;

        self.check(response).await.map(|_| ())
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        item: Value,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/{}:append", self.doc_url(collection, id), field);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&item)
            .send()
            .await
            .map_err(Self::send_error)?;

        self.check(response).await.map(|_| ())
    }
}
