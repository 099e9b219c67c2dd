//! Backend Service boundary.
//!
//! Authentication, blob storage, and relational persistence live behind
//! this trait. [`HttpBackend`] talks to a PostgREST-style REST backend;
//! [`MemoryBackend`] keeps everything in process for tests and offline
//! runs. The pipeline and server only see `Arc<dyn BackendService>`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::models::{EmbeddingOrigin, RetrievedChunk};

/// A document row linking an uploaded file to its collection.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub user_id: String,
    pub collection_id: String,
    pub document_name: String,
    pub document_type: String,
    pub file_path: String,
    pub dedup_hash: String,
}

/// A stored chunk row, as persisted and as returned by `list_chunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub user_id: String,
    pub document_name: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_origin: Option<EmbeddingOrigin>,
}

#[async_trait]
pub trait BackendService: Send + Sync {
    /// Resolve a bearer token to a user id. Errors on an invalid or
    /// expired session.
    async fn authenticate(&self, token: &str) -> Result<String>;

    /// Create a collection row, returning its id.
    async fn create_collection(&self, user_id: &str, name: &str) -> Result<String>;

    /// Upload raw file bytes to blob storage under `path`.
    async fn upload_blob(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Insert a document row, returning its id.
    async fn store_document(&self, record: &DocumentRecord) -> Result<String>;

    /// Insert a batch of chunk rows.
    async fn store_chunks(&self, chunks: &[StoredChunk]) -> Result<()>;

    /// List stored chunks for a user, at most `limit` rows.
    async fn list_chunks(&self, user_id: &str, limit: usize) -> Result<Vec<StoredChunk>>;

    /// Server-side similarity search (`match_documents` RPC). Errors when
    /// the RPC is unavailable; callers fall back to a manual scan.
    async fn similarity_search(
        &self,
        user_id: &str,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Persist a generated note, returning its id.
    async fn store_note(&self, user_id: &str, title: &str, content: &str) -> Result<String>;
}

/// REST-backed implementation speaking the PostgREST conventions:
/// `/auth/v1/user`, `/rest/v1/{table}`, `/rest/v1/rpc/{fn}`,
/// `/storage/v1/object/{bucket}/{path}`.
pub struct HttpBackend {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, service_key: String) -> Result<Self> {
        if config.url.trim().is_empty() {
            bail!("backend.url is required in http mode");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key,
            client,
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn insert_row(
        &self,
        table: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.rest_url(table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("backend insert into {} failed", table))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("backend insert into {} returned {}: {}", table, status, text);
        }

        let rows: serde_json::Value = response.json().await?;
        rows.as_array()
            .and_then(|r| r.first())
            .cloned()
            .ok_or_else(|| anyhow!("backend insert into {} returned no rows", table))
    }

    fn row_id(row: &serde_json::Value, table: &str) -> Result<String> {
        row.get("id")
            .and_then(|id| id.as_str().map(String::from).or_else(|| id.as_i64().map(|n| n.to_string())))
            .ok_or_else(|| anyhow!("backend row from {} has no id", table))
    }
}

#[async_trait]
impl BackendService for HttpBackend {
    async fn authenticate(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await
            .context("backend auth request failed")?;

        if !response.status().is_success() {
            bail!("invalid or expired session");
        }

        let user: serde_json::Value = response.json().await?;
        user.get("id")
            .and_then(|id| id.as_str())
            .map(String::from)
            .ok_or_else(|| anyhow!("auth response has no user id"))
    }

    async fn create_collection(&self, user_id: &str, name: &str) -> Result<String> {
        let row = self
            .insert_row(
                "collections",
                &serde_json::json!({ "user_id": user_id, "name": name }),
            )
            .await?;
        Self::row_id(&row, "collections")
    }

    async fn upload_blob(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/storage/v1/object/documents/{}", self.base_url, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Content-Type", content_type.to_string())
            .body(bytes.to_vec())
            .send()
            .await
            .context("blob upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("blob upload returned {}: {}", status, text);
        }
        Ok(())
    }

    async fn store_document(&self, record: &DocumentRecord) -> Result<String> {
        let row = self
            .insert_row("document_collections", &serde_json::to_value(record)?)
            .await?;
        Self::row_id(&row, "document_collections")
    }

    async fn store_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(self.rest_url("document_chunks"))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&chunks)
            .send()
            .await
            .context("chunk insert request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chunk insert returned {}: {}", status, text);
        }
        Ok(())
    }

    async fn list_chunks(&self, user_id: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        let response = self
            .client
            .get(self.rest_url("document_chunks"))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("limit", limit.to_string()),
                (
                    "select",
                    "user_id,document_name,content,embedding,embedding_origin".to_string(),
                ),
            ])
            .send()
            .await
            .context("chunk list request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chunk list returned {}: {}", status, text);
        }

        Ok(response.json().await?)
    }

    async fn similarity_search(
        &self,
        user_id: &str,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let body = serde_json::json!({
            "query_embedding": query,
            "match_threshold": threshold,
            "match_count": limit,
            "user_id": user_id,
        });

        let response = self
            .client
            .post(format!("{}/rest/v1/rpc/match_documents", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&body)
            .send()
            .await
            .context("match_documents rpc request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("match_documents rpc returned {}: {}", status, text);
        }

        let rows: Vec<serde_json::Value> = response.json().await?;
        Ok(rows
            .iter()
            .map(|row| RetrievedChunk {
                content: row
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
                similarity: row
                    .get("similarity")
                    .and_then(|s| s.as_f64())
                    .unwrap_or(0.0) as f32,
                source_document_name: row
                    .get("document_name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("Unknown document")
                    .to_string(),
            })
            .collect())
    }

    async fn store_note(&self, user_id: &str, title: &str, content: &str) -> Result<String> {
        let row = self
            .insert_row(
                "notes",
                &serde_json::json!({
                    "user_id": user_id,
                    "title": title,
                    "content": content,
                }),
            )
            .await?;
        Self::row_id(&row, "notes")
    }
}

#[derive(Default)]
struct MemoryState {
    collections: Vec<(String, String, String)>,
    blobs: HashMap<String, Vec<u8>>,
    documents: Vec<DocumentRecord>,
    chunks: Vec<StoredChunk>,
    notes: Vec<(String, String, String, String)>,
}

/// In-process backend for tests and offline use. Sessions map any
/// non-empty token to a fixed local user. The similarity RPC is
/// deliberately unavailable so retrieval exercises the manual scan.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chunk row directly, bypassing the upload pipeline.
    pub fn insert_chunk(&self, chunk: StoredChunk) {
        if let Ok(mut state) = self.state.lock() {
            state.chunks.push(chunk);
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().map(|s| s.chunks.len()).unwrap_or(0)
    }

    pub fn note_contents(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.notes.iter().map(|(_, _, _, c)| c.clone()).collect())
            .unwrap_or_default()
    }

    pub fn blob_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory backend state poisoned"))
    }
}

#[async_trait]
impl BackendService for MemoryBackend {
    async fn authenticate(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            bail!("invalid or expired session");
        }
        Ok("local-user".to_string())
    }

    async fn create_collection(&self, user_id: &str, name: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock()?
            .collections
            .push((id.clone(), user_id.to_string(), name.to_string()));
        Ok(id)
    }

    async fn upload_blob(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        self.lock()?.blobs.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn store_document(&self, record: &DocumentRecord) -> Result<String> {
        self.lock()?.documents.push(record.clone());
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn store_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        self.lock()?.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn list_chunks(&self, user_id: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        Ok(self
            .lock()?
            .chunks
            .iter()
            .filter(|c| c.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn similarity_search(
        &self,
        _user_id: &str,
        _query: &[f32],
        _threshold: f32,
        _limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        bail!("match_documents rpc is not available")
    }

    async fn store_note(&self, user_id: &str, title: &str, content: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock()?.notes.push((
            id.clone(),
            user_id.to_string(),
            title.to_string(),
            content.to_string(),
        ));
        Ok(id)
    }
}
