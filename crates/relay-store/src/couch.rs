//! CouchDB document store.
//!
//! Endpoints:
//! - GET    /{db}/_all_docs?include_docs=true
//! - POST   /{db}
//! - PUT    /{db}/{id}
//! - GET    /{db}/{id}
//! - DELETE /{db}/{id}?rev=<rev>
//! - PUT    /{db}                (database creation on init)

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::*;
use relay_types::RelayError;

/// Database name per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseNames {
    pub requested: String,
    pub queued: String,
    pub committed: String,
    pub failed: String,
    pub dead_letter: String,
}

impl DatabaseNames {
    /// Default names for a network. Anything other than `mainnet` gets the
    /// network name as a suffix, e.g. `zerocache_requests_ropsten`.
    pub fn for_network(network: &str) -> Self {
        let suffix = if network.is_empty() || network == "mainnet" {
            String::new()
        } else {
            format!("_{}", network)
        };
        Self {
            requested: format!("zerocache_requests{}", suffix),
            queued: format!("zerocache_queue{}", suffix),
            committed: format!("zerocache_committed{}", suffix),
            failed: format!("zerocache_failed{}", suffix),
            dead_letter: format!("zerocache_dead_letter{}", suffix),
        }
    }

    pub fn get(&self, collection: Collection) -> &str {
        match collection {
            Collection::Requested => &self.requested,
            Collection::Queued => &self.queued,
            Collection::Committed => &self.committed,
            Collection::Failed => &self.failed,
            Collection::DeadLetter => &self.dead_letter,
        }
    }
}

/// Connection settings for a CouchDB server.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub databases: DatabaseNames,
}

impl Default for CouchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5984".into(),
            username: None,
            password: None,
            timeout_ms: 20_000,
            databases: DatabaseNames::for_network("mainnet"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    id: String,
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    doc: Option<serde_json::Value>,
}

/// CouchDB-backed document store, one database per collection.
pub struct CouchStore {
    base_url: Url,
    client: reqwest::Client,
    config: CouchConfig,
}

impl CouchStore {
    pub fn new(config: CouchConfig) -> Result<Self> {
        let base_url = Url::parse(config.url.trim_end_matches('/'))
            .map_err(|e| RelayError::Config(format!("invalid store url {}: {}", config.url, e)))?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .unwrap_or_default(),
            config,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::Config(format!("store url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| RelayError::Store(format!("store request failed: {}", e)))
    }

    async fn get_meta(&self, collection: Collection, id: &str) -> Result<DocumentMeta> {
        let url = self.url(&[self.config.databases.get(collection), id])?;
        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(RelayError::NotFound { collection, id: id.to_string() });
        }
        let doc: serde_json::Value = read_json(resp).await?;
        meta_of(&doc).ok_or_else(|| RelayError::Store(format!("document {} has no _rev", id)))
    }
}

#[async_trait]
impl DocumentStore for CouchStore {
    /// Create any missing databases.
    async fn init(&self) -> Result<()> {
        for collection in Collection::ALL {
            let db = self.config.databases.get(collection);
            let resp = self.send(self.request(reqwest::Method::PUT, self.url(&[db])?)).await?;
            match resp.status() {
                StatusCode::CREATED | StatusCode::ACCEPTED => info!(db, "Created database"),
                StatusCode::PRECONDITION_FAILED => debug!(db, "Database exists"),
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(RelayError::Store(format!(
                        "creating {} returned status {}: {}",
                        db, status, body
                    )));
                }
            }
        }
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Document>> {
        let mut url = self.url(&[self.config.databases.get(collection), "_all_docs"])?;
        url.query_pairs_mut().append_pair("include_docs", "true");

        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        let all: AllDocsResponse = read_json(resp).await?;

        let docs = all
            .rows
            .into_iter()
            .filter_map(|row| {
                let doc = row.doc?;
                let meta = meta_of(&doc)?;
                debug_assert_eq!(meta.id, row.id);
                Some(Document { meta, body: strip_meta(doc) })
            })
            .collect();
        Ok(docs)
    }

    async fn insert(&self, collection: Collection, body: &serde_json::Value) -> Result<DocumentMeta> {
        let url = self.url(&[self.config.databases.get(collection)])?;
        let resp = self
            .send(self.request(reqwest::Method::POST, url).json(body))
            .await?;
        let written: WriteResponse = read_json(resp).await?;
        Ok(DocumentMeta { id: written.id, rev: written.rev })
    }

    async fn put(
        &self,
        collection: Collection,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<DocumentMeta> {
        let url = self.url(&[self.config.databases.get(collection), id])?;
        let resp = self
            .send(self.request(reqwest::Method::PUT, url).json(body))
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            debug!(%collection, id, "Document already exists, reusing it");
            return self.get_meta(collection, id).await;
        }
        let written: WriteResponse = read_json(resp).await?;
        Ok(DocumentMeta { id: written.id, rev: written.rev })
    }

    async fn destroy(&self, collection: Collection, id: &str, rev: &str) -> Result<()> {
        let mut url = self.url(&[self.config.databases.get(collection), id])?;
        url.query_pairs_mut().append_pair("rev", rev);

        let resp = self.send(self.request(reqwest::Method::DELETE, url)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(RelayError::NotFound { collection, id: id.to_string() }),
            StatusCode::CONFLICT => Err(RelayError::Conflict { collection, id: id.to_string() }),
            _ => read_json::<serde_json::Value>(resp).await.map(|_| ()),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(RelayError::Store(format!(
            "store returned status {}: {}",
            status, body
        )));
    }
    resp.json()
        .await
        .map_err(|e| RelayError::Store(format!("failed to parse store response: {}", e)))
}

fn meta_of(doc: &serde_json::Value) -> Option<DocumentMeta> {
    Some(DocumentMeta {
        id: doc.get("_id")?.as_str()?.to_string(),
        rev: doc.get("_rev")?.as_str()?.to_string(),
    })
}

fn strip_meta(mut doc: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("_id");
        obj.remove("_rev");
    }
    doc
}
