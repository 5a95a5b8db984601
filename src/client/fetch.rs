//! Fetching fresh values for cache keys

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::Value;

use crate::types::{EntityPath, SyncError, SyncResult};

/// Source of fresh values for a cache key
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(&'a self, key: &'a EntityPath) -> BoxFuture<'a, SyncResult<Value>>;
}

/// Fetches over the REST endpoints. A cache key maps to the URL path made of
/// its segments, so `["sensors", "details", "sensor-3"]` reads
/// `/sensors/details/sensor-3`. A bare collection key such as `["sensors"]`
/// has no route of its own and reads the collection's list.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    /// URL a key is fetched from
    pub fn url_for(&self, key: &EntityPath) -> String {
        let target = if key.len() == 1 {
            EntityPath::list(key.root())
        } else {
            key.clone()
        };
        let path: Vec<String> = target
            .segments()
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base_url, path.join("/"))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, key: &'a EntityPath) -> BoxFuture<'a, SyncResult<Value>> {
        Box::pin(async move {
            let url = self.url_for(key);
            let response = self
                .client
                .get(url.as_str())
                .send()
                .await
                .map_err(SyncError::transport)?;

            match response.status() {
                StatusCode::NOT_FOUND => Err(SyncError::not_found(key.to_string())),
                status if status.is_success() => {
                    response.json::<Value>().await.map_err(SyncError::transport)
                }
                status => Err(SyncError::Transport(format!("GET {url} returned {status}"))),
            }
        })
    }
}
