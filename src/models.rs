//! Core data models used throughout notegen.
//!
//! These types represent the uploaded files, extracted documents, chunks,
//! embeddings, and chat events that flow through the pipeline.

use serde::{Deserialize, Serialize};

/// A file received in an upload request. Transient — lives only for the
/// duration of one request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Plain text extracted from one uploaded file.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub source_file_name: String,
}

/// A fixed-size window of document text. Offsets are Unicode scalar
/// (char) offsets into the source text; `end - start <= chunk_size` and
/// the final chunk may be shorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
}

/// Where an embedding vector came from. Vectors of different origins have
/// different dimensionalities and must never be compared to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingOrigin {
    /// Produced by the remote embeddings API.
    Remote,
    /// Deterministic hash-based stand-in used when no credential is
    /// configured or the remote call fails.
    Synthetic,
}

/// A fixed-length vector tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub origin: EmbeddingOrigin,
}

impl Embedding {
    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// A chunk returned from retrieval, scored against the query embedding.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub similarity: f32,
    pub source_document_name: String,
}

/// One event on the outward chat stream.
///
/// Serializes untagged so the wire shapes are `{"content": ...}`,
/// `{"error": ...}`, and `{"sources": [...]}`. A stream carries zero or
/// more `Content` events followed by exactly one terminal event: either
/// `Error` (early close) or `Sources` (normal close).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatStreamEvent {
    Content { content: String },
    Error { error: String },
    Sources { sources: Vec<String> },
}

impl ChatStreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn sources(names: Vec<String>) -> Self {
        Self::Sources { sources: names }
    }
}
