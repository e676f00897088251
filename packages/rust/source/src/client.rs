//! Magento-style REST catalog client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use catalogsync_shared::{
    AppConfig, CatalogSyncError, CategoryId, CategoryNode, Result, access_token,
};

use crate::{CatalogSource, USER_AGENT};

/// Connection settings for [`MagentoClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// REST base URL, e.g. `https://shop.example.com/rest/default`.
    pub url: String,
    /// Integration access token sent as a bearer credential.
    pub access_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl ClientOptions {
    /// Build options from the `[source]` config section, reading the token
    /// from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            url: config.source.url.clone(),
            access_token: access_token(config)?,
            timeout_secs: config.source.timeout_secs,
        })
    }
}

/// The listing endpoint returns either the single root of the tree or a list
/// of roots depending on the catalog.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<CategoryNode>),
    One(Box<CategoryNode>),
}

/// Catalog client speaking the `V1/categories` REST endpoints.
pub struct MagentoClient {
    client: Client,
    base: Url,
}

impl MagentoClient {
    /// Create a client for the given base URL.
    pub fn new(opts: &ClientOptions) -> Result<Self> {
        let base = Url::parse(&opts.url).map_err(|e| {
            CatalogSyncError::config(format!("invalid source url '{}': {e}", opts.url))
        })?;
        if base.cannot_be_a_base() {
            return Err(CatalogSyncError::config(format!(
                "source url '{}' cannot be used as a base",
                opts.url
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &opts.access_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| CatalogSyncError::config(format!("invalid access token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| CatalogSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base })
    }

    /// Resolve `segments` below the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CatalogSyncError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogSyncError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CatalogSyncError::Network(format!("{url}: failed to read body: {e}")))?;

        serde_json::from_str(&body)
            .map_err(|e| CatalogSyncError::parse(format!("{url}: unexpected response: {e}")))
    }
}

#[async_trait]
impl CatalogSource for MagentoClient {
    #[instrument(skip_all)]
    async fn list_categories(&self) -> Result<Vec<CategoryNode>> {
        let url = self.endpoint(&["V1", "categories"]);
        match self.get_json::<OneOrMany>(url).await? {
            OneOrMany::Many(roots) => Ok(roots),
            OneOrMany::One(root) => Ok(vec![*root]),
        }
    }

    #[instrument(skip_all, fields(category_id = %id))]
    async fn get_single_category(&self, id: &CategoryId) -> Result<CategoryNode> {
        let id = id.to_string();
        let url = self.endpoint(&["V1", "categories", &id]);
        self.get_json(url).await
    }
}
