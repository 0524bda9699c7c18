//! Remote catalog client: password login, then paged record listing.

use serde::Deserialize;
use serde_json::json;

use catalog_ingest::config::CatalogConfig;
use catalog_ingest::{CatalogEntry, CatalogSnapshot, IngestError, IngestResult};

use crate::http::HttpClient;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    #[serde(default)]
    items: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    iframe_url: String,
}

impl From<Record> for CatalogEntry {
    fn from(r: Record) -> Self {
        CatalogEntry {
            id: r.id,
            title: r.title,
            url: r.iframe_url,
        }
    }
}

pub struct RemoteCatalog {
    http: HttpClient,
    base_url: String,
    page_size: u32,
}

impl RemoteCatalog {
    pub fn new(http: HttpClient, config: &CatalogConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
        }
    }

    /// Exchange credentials for a session token. Any failure is fatal.
    pub async fn login(&self, email: &str, password: &str) -> IngestResult<String> {
        let url = format!("{}/collections/users/auth-with-password", self.base_url);
        let resp = self
            .http
            .post_json(&url, &json!({ "identity": email, "password": password }))
            .await
            .map_err(|e| IngestError::FatalConfig(format!("catalog login failed: {e:#}")))?;
        if !resp.is_success() {
            return Err(IngestError::FatalConfig(format!(
                "catalog login rejected with HTTP {}",
                resp.status
            )));
        }
        let auth: AuthResponse = resp
            .json()
            .map_err(|e| IngestError::FatalConfig(format!("catalog login response: {e:#}")))?;
        tracing::info!("Authenticated with catalog at {}", self.base_url);
        Ok(auth.token)
    }

    /// Every catalog record, fetched page by page until a short page.
    pub async fn fetch_all(&self, token: &str) -> IngestResult<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}/collections/games/records?page={page}&perPage={}",
                self.base_url, self.page_size
            );
            let chunk: RecordPage = self
                .http
                .get_json(&url, Some(token))
                .await
                .map_err(|e| IngestError::Catalog(format!("page {page}: {e:#}")))?;
            let n = chunk.items.len();
            tracing::debug!("Catalog page {page}: {n} records");
            entries.extend(chunk.items.into_iter().map(CatalogEntry::from));
            if n < self.page_size as usize {
                break;
            }
            page += 1;
        }
        tracing::info!("Loaded {} catalog records", entries.len());
        Ok(entries)
    }

    /// Log in and take a snapshot for duplicate resolution.
    pub async fn snapshot(&self, email: &str, password: &str) -> IngestResult<CatalogSnapshot> {
        let token = self.login(email, password).await?;
        let entries = self.fetch_all(&token).await.map_err(|e| match e {
            IngestError::Catalog(msg) => {
                IngestError::FatalConfig(format!("catalog listing failed: {msg}"))
            }
            other => other,
        })?;
        Ok(CatalogSnapshot::new(entries))
    }
}
