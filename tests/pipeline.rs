//! End-to-end upload pipeline tests over the in-memory backend.

use std::io::Write;
use std::sync::Arc;

use notegen::backend::{BackendService, MemoryBackend};
use notegen::config::Config;
use notegen::embedding::Embedder;
use notegen::models::UploadedFile;
use notegen::notes::NoteGenerator;
use notegen::pipeline::{Pipeline, UploadError, DOCUMENT_SEPARATOR, MAX_FILES_PER_UPLOAD};
use notegen::retrieval::{retrieve, source_names};

/// Minimal docx (ZIP) whose word/document.xml carries one paragraph.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn txt_file(name: &str, text: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        content_type: "text/plain".to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

struct Harness {
    backend: Arc<MemoryBackend>,
    pipeline: Pipeline,
    config: Config,
}

fn harness() -> Harness {
    // No credentials: synthetic embeddings and placeholder notes, no
    // network contact anywhere in the pipeline.
    let config = Config::default();
    let backend = Arc::new(MemoryBackend::new());
    let embedder = Arc::new(Embedder::new(&config.embedding, None).unwrap());
    let notes = Arc::new(NoteGenerator::new(&config.chat, None).unwrap());
    let pipeline = Pipeline::new(
        config.clone(),
        Arc::clone(&backend) as Arc<dyn BackendService>,
        embedder,
        notes,
    );
    Harness {
        backend,
        pipeline,
        config,
    }
}

#[tokio::test]
async fn upload_stores_documents_chunks_and_a_note() {
    let h = harness();
    let files = vec![
        txt_file("cells.txt", "Cells are the basic unit of life."),
        UploadedFile {
            file_name: "mitosis.docx".to_string(),
            content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                .to_string(),
            bytes: minimal_docx_with_text("Mitosis is cell division."),
        },
    ];

    let outcome = h
        .pipeline
        .upload("local-user", "Biology 101", files)
        .await
        .unwrap();

    assert_eq!(outcome.collection_name, "Biology 101");
    assert_eq!(outcome.documents.len(), 2);
    assert!(outcome.extraction_errors.is_empty());
    assert!(outcome.documents.iter().all(|d| d.chunk_count >= 1));

    // Chunks landed in the backend with embeddings attached.
    assert_eq!(h.backend.chunk_count(), 2);

    // One blob per file, under the user's prefix.
    let blobs = h.backend.blob_paths();
    assert_eq!(blobs.len(), 2);
    assert!(blobs.iter().all(|p| p.starts_with("local-user/")));

    // Placeholder note (no credential) built from both documents.
    assert!(outcome.note_id.is_some());
    let notes = h.backend.note_contents();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].starts_with("# Study Notes: Biology 101"));
    assert!(notes[0].contains("Cells are the basic unit of life."));
}

#[tokio::test]
async fn one_bad_file_is_itemized_without_failing_the_batch() {
    let h = harness();
    let files = vec![
        txt_file("good1.txt", "first document"),
        UploadedFile {
            file_name: "photo.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        },
        txt_file("good2.txt", "second document"),
    ];

    let outcome = h
        .pipeline
        .upload("local-user", "Mixed", files)
        .await
        .unwrap();

    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.extraction_errors.len(), 1);
    assert_eq!(outcome.extraction_errors[0].file_name, "photo.png");
    assert!(outcome.extraction_errors[0]
        .message
        .contains("Unsupported file type"));
}

#[tokio::test]
async fn batch_with_no_extractable_text_is_a_terminal_error() {
    let h = harness();
    let files = vec![
        UploadedFile {
            file_name: "broken.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"not a pdf at all".to_vec(),
        },
        txt_file("empty.txt", "   "),
    ];

    let err = h
        .pipeline
        .upload("local-user", "Nothing", files)
        .await
        .unwrap_err();

    match err {
        UploadError::NoTextExtracted(failures) => {
            assert_eq!(failures.len(), 2);
        }
        other => panic!("expected NoTextExtracted, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_storage() {
    let h = harness();
    let files: Vec<_> = (0..MAX_FILES_PER_UPLOAD + 1)
        .map(|i| txt_file(&format!("f{i}.txt"), "x"))
        .collect();

    let err = h
        .pipeline
        .upload("local-user", "Too many", files)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert_eq!(h.backend.chunk_count(), 0);
    assert!(h.backend.blob_paths().is_empty());
}

#[tokio::test]
async fn uploaded_chunks_are_retrievable_through_the_manual_scan() {
    let h = harness();
    let files = vec![
        txt_file("alpha.txt", "the quick brown fox"),
        txt_file("beta.txt", "a completely different sentence"),
    ];
    h.pipeline
        .upload("local-user", "Retrieval", files)
        .await
        .unwrap();

    // MemoryBackend has no similarity RPC, so this exercises the manual
    // cosine fallback. Identical text gives an identical synthetic
    // vector, so alpha.txt must rank first with similarity ~1.
    let embedder = Embedder::new(&h.config.embedding, None).unwrap();
    let query = embedder.embed("the quick brown fox").await;

    let backend: Arc<dyn BackendService> = h.backend.clone();
    let results = retrieve(&backend, "local-user", &query, &h.config.retrieval).await;

    assert!(!results.is_empty());
    assert_eq!(results[0].source_document_name, "alpha.txt");
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
    assert_eq!(
        source_names(&results)
            .iter()
            .filter(|n| n.as_str() == "alpha.txt")
            .count(),
        1
    );
}

#[test]
fn document_separator_matches_the_storage_contract() {
    assert_eq!(DOCUMENT_SEPARATOR, "\n\n--- Document Separator ---\n\n");
}
