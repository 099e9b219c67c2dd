//! Upload orchestration: validate the batch, then per file
//! extract → chunk → embed → persist, collecting failures without
//! aborting the batch, and finish with one generated note over the
//! combined text.

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::{BackendService, DocumentRecord, StoredChunk};
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::extract_text;
use crate::models::{ExtractedDocument, UploadedFile};
use crate::notes::NoteGenerator;
use sha2::{Digest, Sha256};

pub const MAX_FILES_PER_UPLOAD: usize = 10;
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;
/// Cap on the combined text handed to the note generator, in characters.
pub const MAX_COMBINED_CHARS: usize = 50_000;
pub const DOCUMENT_SEPARATOR: &str = "\n\n--- Document Separator ---\n\n";
const COMBINED_TRUNCATION_MARKER: &str = "\n\n[Content truncated due to size limits...]";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),
    /// Every file in the batch failed extraction.
    #[error("no text could be extracted from any uploaded file")]
    NoTextExtracted(Vec<ExtractionFailure>),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractionFailure {
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentStatus {
    pub file_name: String,
    pub chunk_count: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct UploadOutcome {
    pub collection_id: String,
    pub collection_name: String,
    pub documents: Vec<DocumentStatus>,
    pub note_id: Option<String>,
    pub extraction_errors: Vec<ExtractionFailure>,
}

pub struct Pipeline {
    config: Config,
    backend: Arc<dyn BackendService>,
    embedder: Arc<Embedder>,
    notes: Arc<NoteGenerator>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        backend: Arc<dyn BackendService>,
        embedder: Arc<Embedder>,
        notes: Arc<NoteGenerator>,
    ) -> Self {
        Self {
            config,
            backend,
            embedder,
            notes,
        }
    }

    /// Run the full upload flow for one batch of files.
    pub async fn upload(
        &self,
        user_id: &str,
        collection_name: &str,
        files: Vec<UploadedFile>,
    ) -> Result<UploadOutcome, UploadError> {
        validate_batch(&files)?;

        let collection_id = self
            .backend
            .create_collection(user_id, collection_name)
            .await?;

        let mut documents = Vec::new();
        let mut extraction_errors = Vec::new();
        let mut extracted: Vec<ExtractedDocument> = Vec::new();

        for file in &files {
            match self.process_file(user_id, &collection_id, file).await {
                Ok((status, document)) => {
                    extracted.push(document);
                    documents.push(status);
                }
                Err(err) => {
                    tracing::warn!(file = %file.file_name, error = %err, "file skipped");
                    extraction_errors.push(ExtractionFailure {
                        file_name: file.file_name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if documents.is_empty() {
            return Err(UploadError::NoTextExtracted(extraction_errors));
        }

        let combined = combine_texts(&extracted);
        let note_body = self.notes.generate(collection_name, &combined).await;
        let note_id = match self
            .backend
            .store_note(user_id, collection_name, &note_body)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(error = %err, "note could not be persisted");
                None
            }
        };

        Ok(UploadOutcome {
            collection_id,
            collection_name: collection_name.to_string(),
            documents,
            note_id,
            extraction_errors,
        })
    }

    /// Extract, store, chunk, and embed a single file. Any error here is
    /// itemized by the caller rather than failing the batch.
    async fn process_file(
        &self,
        user_id: &str,
        collection_id: &str,
        file: &UploadedFile,
    ) -> Result<(DocumentStatus, ExtractedDocument)> {
        let text = extract_text(&file.bytes, &file.content_type, &file.file_name)?;
        if text.trim().is_empty() {
            anyhow::bail!("{} contains no extractable text", file.file_name);
        }

        let blob_path = format!(
            "{}/{}-{}",
            user_id,
            chrono::Utc::now().timestamp_millis(),
            file.file_name
        );
        self.backend
            .upload_blob(&blob_path, &file.bytes, &file.content_type)
            .await?;

        let dedup_hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        self.backend
            .store_document(&DocumentRecord {
                user_id: user_id.to_string(),
                collection_id: collection_id.to_string(),
                document_name: file.file_name.clone(),
                document_type: file.content_type.clone(),
                file_path: blob_path,
                dedup_hash,
            })
            .await?;

        let chunks = chunk_text(
            &text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        )?;

        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let embedding = self.embedder.embed(&chunk.content).await;
            stored.push(StoredChunk {
                user_id: user_id.to_string(),
                document_name: file.file_name.clone(),
                content: chunk.content.clone(),
                embedding: Some(embedding.values),
                embedding_origin: Some(embedding.origin),
            });
        }
        self.backend.store_chunks(&stored).await?;

        Ok((
            DocumentStatus {
                file_name: file.file_name.clone(),
                chunk_count: stored.len(),
            },
            ExtractedDocument {
                text,
                source_file_name: file.file_name.clone(),
            },
        ))
    }
}

fn validate_batch(files: &[UploadedFile]) -> Result<(), UploadError> {
    if files.is_empty() {
        return Err(UploadError::Validation("no files were uploaded".into()));
    }
    if files.len() > MAX_FILES_PER_UPLOAD {
        return Err(UploadError::Validation(format!(
            "too many files: {} uploaded, maximum is {}",
            files.len(),
            MAX_FILES_PER_UPLOAD
        )));
    }
    for file in files {
        if file.bytes.len() > MAX_FILE_SIZE {
            return Err(UploadError::Validation(format!(
                "file {} exceeds the {} MB size limit",
                file.file_name,
                MAX_FILE_SIZE / (1024 * 1024)
            )));
        }
    }
    Ok(())
}

/// Join extracted texts with the document separator and cap the result
/// before note generation.
fn combine_texts(documents: &[ExtractedDocument]) -> String {
    let combined = documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR);

    if combined.chars().count() <= MAX_COMBINED_CHARS {
        return combined;
    }
    let capped: String = combined.chars().take(MAX_COMBINED_CHARS).collect();
    format!("{capped}{COMBINED_TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: "text/plain".to_string(),
            bytes,
        }
    }

    #[test]
    fn batch_validation_rejects_empty_and_oversized() {
        assert!(matches!(
            validate_batch(&[]),
            Err(UploadError::Validation(_))
        ));

        let many: Vec<_> = (0..MAX_FILES_PER_UPLOAD + 1)
            .map(|i| file(&format!("f{}.txt", i), b"x".to_vec()))
            .collect();
        assert!(matches!(
            validate_batch(&many),
            Err(UploadError::Validation(_))
        ));

        let big = vec![file("big.txt", vec![0u8; MAX_FILE_SIZE + 1])];
        let err = validate_batch(&big).unwrap_err();
        assert!(err.to_string().contains("size limit"));

        let ok = vec![file("ok.txt", b"hello".to_vec())];
        assert!(validate_batch(&ok).is_ok());
    }

    fn doc(name: &str, text: &str) -> ExtractedDocument {
        ExtractedDocument {
            text: text.to_string(),
            source_file_name: name.to_string(),
        }
    }

    #[test]
    fn combined_text_uses_separator_and_cap() {
        let texts = vec![doc("a.txt", "first"), doc("b.txt", "second")];
        assert_eq!(
            combine_texts(&texts),
            format!("first{}second", DOCUMENT_SEPARATOR)
        );

        let long = vec![doc("big.txt", &"y".repeat(MAX_COMBINED_CHARS + 10))];
        let combined = combine_texts(&long);
        assert!(combined.ends_with(COMBINED_TRUNCATION_MARKER));
        assert_eq!(
            combined.chars().count(),
            MAX_COMBINED_CHARS + COMBINED_TRUNCATION_MARKER.chars().count()
        );
    }
}
