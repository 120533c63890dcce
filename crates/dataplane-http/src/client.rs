//! HTTP client for the configuration API.

use std::sync::Arc;

use async_trait::async_trait;
use dataplane_common::{
    ApiError, ClientConfig, ConfigVersion, DataplaneError, DataplaneResult, DriverRegistry,
    RemoteConfigClient, ResourceKind, TransactionId,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::driver::HttpResourceDriver;
use crate::wire::TransactionBody;

const API_PREFIX: &str = "services/haproxy";

/// Client for the transactional configuration API.
#[derive(Debug, Clone)]
pub struct DataplaneClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl DataplaneClient {
    /// Builds a client from validated configuration.
    pub fn new(config: &ClientConfig) -> DataplaneResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DataplaneError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A driver for `kind` sharing this client.
    pub fn driver(self: &Arc<Self>, kind: ResourceKind) -> HttpResourceDriver {
        HttpResourceDriver::new(kind, Arc::clone(self))
    }

    /// A registry with one HTTP driver per kind.
    pub fn drivers(self: &Arc<Self>, kinds: impl IntoIterator<Item = ResourceKind>) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        for kind in kinds {
            registry.register(Arc::new(self.driver(kind)));
        }
        registry
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path)
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Sends a request and turns non-success statuses into typed errors.
    pub(crate) async fn send(&self, builder: RequestBuilder) -> DataplaneResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %body, "request rejected");
        Err(DataplaneError::from_api(ApiError::from_body(
            status.as_u16(),
            &body,
        )))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> DataplaneResult<T> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| DataplaneError::transport(format!("invalid response body: {}", e)))
    }
}

fn transport_error(err: reqwest::Error) -> DataplaneError {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        format!("request failed: {}", err)
    };
    DataplaneError::Transport {
        message,
        status: err.status().map(|s| s.as_u16()),
    }
}

#[async_trait]
impl RemoteConfigClient for DataplaneClient {
    #[instrument(skip(self))]
    async fn read_version(&self) -> DataplaneResult<ConfigVersion> {
        let version: u64 = self
            .send_json(self.request(Method::GET, "configuration/version"))
            .await?;
        Ok(ConfigVersion(version))
    }

    #[instrument(skip(self), fields(%version))]
    async fn open_transaction(&self, version: ConfigVersion) -> DataplaneResult<TransactionId> {
        let body: TransactionBody = self
            .send_json(
                self.request(Method::POST, "transactions")
                    .query(&[("version", version.get())]),
            )
            .await?;
        debug!(id = %body.id, status = ?body.status, bound = ?body.version, "transaction opened");
        Ok(TransactionId::new(body.id))
    }

    #[instrument(skip(self), fields(%transaction))]
    async fn commit_transaction(&self, transaction: &TransactionId) -> DataplaneResult<()> {
        let path = format!("transactions/{}", transaction);
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_urls_join_without_double_slash() {
        let client = DataplaneClient::new(&ClientConfig::new("http://lb:5555/v2/")).unwrap();
        assert_eq!(client.base_url(), "http://lb:5555/v2");
        assert_eq!(
            client.url("configuration/version"),
            "http://lb:5555/v2/services/haproxy/configuration/version"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = DataplaneClient::new(&ClientConfig::new("ftp://lb")).unwrap_err();
        assert!(matches!(err, DataplaneError::Validation { .. }));
    }
}
