//! Multi-format text extraction for uploaded documents.
//!
//! Dispatches on the declared MIME type first and the lowercased file
//! extension second. PDFs run through an ordered list of independent
//! parsing strategies; the first one that yields non-whitespace text
//! wins. DOCX is read structurally from the OOXML archive. Legacy
//! PowerPoint and `.doc` formats return a fixed placeholder instead of
//! failing — downstream treats that text as usable input.

use std::io::Read;

use thiserror::Error;

/// MIME types with dedicated extraction paths.
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_PPT: &str = "application/vnd.ms-powerpoint";
pub const MIME_TXT: &str = "text/plain";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Per-file extraction error. Never fatal to a multi-file batch; the
/// pipeline collects these and continues with the remaining files.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}. Supported: PDF, DOCX, PPTX, TXT")]
    UnsupportedType(String),
    #[error("Failed to parse PDF: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("{0} appears to be empty or contains no extractable text")]
    Empty(String),
}

/// One PDF parsing attempt: returns extracted text or a failure message.
type PdfStrategy = fn(&[u8]) -> Result<String, String>;

/// Ordered PDF strategies. Each is independent; extraction advances to
/// the next on failure or whitespace-only output.
const PDF_STRATEGIES: &[(&str, PdfStrategy)] = &[
    ("pdf-extract", pdf_extract_strategy),
    ("lopdf", lopdf_strategy),
];

/// Extract plain text from one uploaded file.
pub fn extract_text(
    bytes: &[u8],
    content_type: &str,
    file_name: &str,
) -> Result<String, ExtractError> {
    let lower_name = file_name.to_lowercase();

    if content_type == MIME_PDF || lower_name.ends_with(".pdf") {
        extract_pdf(bytes)
    } else if content_type == MIME_DOCX || lower_name.ends_with(".docx") {
        extract_docx(bytes, file_name)
    } else if content_type == MIME_PPTX
        || content_type == MIME_PPT
        || lower_name.ends_with(".pptx")
        || lower_name.ends_with(".ppt")
    {
        Ok(powerpoint_placeholder(file_name))
    } else if lower_name.ends_with(".doc") {
        Ok(legacy_doc_placeholder(file_name))
    } else if content_type == MIME_TXT || lower_name.ends_with(".txt") {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    } else {
        let declared = if content_type.is_empty() {
            "unknown"
        } else {
            content_type
        };
        Err(ExtractError::UnsupportedType(declared.to_string()))
    }
}

/// Best-effort content type from a file name, for callers that only have
/// a path (e.g. the `extract` CLI command).
pub fn guess_content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".pdf") {
        MIME_PDF
    } else if lower.ends_with(".docx") {
        MIME_DOCX
    } else if lower.ends_with(".pptx") {
        MIME_PPTX
    } else if lower.ends_with(".ppt") {
        MIME_PPT
    } else if lower.ends_with(".txt") {
        MIME_TXT
    } else {
        ""
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    run_pdf_strategies(bytes, PDF_STRATEGIES)
}

/// Try each strategy in order; first non-whitespace success wins. When
/// every strategy fails, the error carries the last strategy's message.
fn run_pdf_strategies(
    bytes: &[u8],
    strategies: &[(&str, PdfStrategy)],
) -> Result<String, ExtractError> {
    let mut last_error = "no PDF strategy available".to_string();

    for (name, strategy) in strategies {
        match strategy(bytes) {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) => {
                tracing::debug!(strategy = name, "PDF strategy produced only whitespace");
                last_error =
                    "PDF appears to be empty or contains no extractable text".to_string();
            }
            Err(message) => {
                tracing::debug!(strategy = name, error = %message, "PDF strategy failed");
                last_error = message;
            }
        }
    }

    Err(ExtractError::Pdf(last_error))
}

fn pdf_extract_strategy(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

/// Raw per-page text scan via lopdf. Less layout-aware than pdf-extract
/// but tolerates some documents the primary strategy rejects.
fn lopdf_strategy(bytes: &[u8]) -> Result<String, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err("PDF contains no pages".to_string());
    }

    let mut page_texts = Vec::new();
    let mut last_error = None;
    for page in pages {
        match doc.extract_text(&[page]) {
            Ok(text) => page_texts.push(text),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if page_texts.is_empty() {
        return Err(last_error.unwrap_or_else(|| "no text on any page".to_string()));
    }
    Ok(page_texts.join("\n\n"))
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8], file_name: &str) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| ExtractError::Docx(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(ExtractError::Docx(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(ExtractError::Docx(
            "word/document.xml not found".to_string(),
        ));
    }

    let text = collect_docx_text(&doc_xml)?;
    if text.trim().is_empty() {
        return Err(ExtractError::Empty(format!("DOCX file {}", file_name)));
    }
    Ok(text)
}

/// Walk `word/document.xml` collecting `<w:t>` runs, inserting a blank
/// line at each paragraph end so the raw text keeps its structure.
fn collect_docx_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.is_empty() {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ Placeholder formats ============

fn powerpoint_placeholder(file_name: &str) -> String {
    format!(
        "[PowerPoint file: {}]\n\nNote: Full text extraction from PowerPoint files requires \
         additional processing. The file has been uploaded but detailed text extraction is \
         not available for this format.",
        file_name
    )
}

fn legacy_doc_placeholder(file_name: &str) -> String {
    format!(
        "[Word Document: {}]\n\nNote: Old .doc format is not fully supported. Please convert \
         to .docx for better text extraction.",
        file_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_docx(phrase: &str) -> Vec<u8> {
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

    #[test]
    fn unknown_type_is_an_error_naming_the_mime() {
        let err = extract_text(b"foo", "application/octet-stream", "foo.bin").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
        assert!(err.to_string().contains("application/octet-stream"));
    }

    #[test]
    fn missing_type_is_reported_as_unknown() {
        let err = extract_text(b"foo", "", "foo.bin").unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn invalid_pdf_fails_with_last_strategy_error() {
        let err = extract_text(b"not a pdf", MIME_PDF, "bad.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn docx_text_is_extracted_from_word_document_xml() {
        let bytes = minimal_docx("office test phrase");
        let text = extract_text(&bytes, MIME_DOCX, "notes.docx").unwrap();
        assert!(text.contains("office test phrase"));
    }

    #[test]
    fn empty_docx_is_a_failure_not_an_empty_success() {
        let bytes = minimal_docx("");
        let err = extract_text(&bytes, MIME_DOCX, "empty.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Empty(_)));
    }

    #[test]
    fn docx_that_is_not_a_zip_fails() {
        let err = extract_text(b"not a zip", MIME_DOCX, "broken.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn powerpoint_returns_placeholder_naming_the_file() {
        let text = extract_text(b"whatever", MIME_PPTX, "deck.pptx").unwrap();
        assert!(text.contains("deck.pptx"));
        assert!(text.contains("not available for this format"));
    }

    #[test]
    fn legacy_doc_returns_placeholder() {
        let text = extract_text(b"whatever", "", "Old Report.DOC").unwrap();
        assert!(text.contains("Old Report.DOC"));
        assert!(text.contains(".docx"));
    }

    #[test]
    fn txt_is_decoded_verbatim() {
        let text = extract_text("plain text\ncontent".as_bytes(), "", "notes.txt").unwrap();
        assert_eq!(text, "plain text\ncontent");
    }

    #[test]
    fn dispatch_falls_back_to_extension_case_insensitively() {
        let text = extract_text(b"hello", "application/octet-stream", "README.TXT").unwrap();
        assert_eq!(text, "hello");
    }

    fn failing_strategy(_: &[u8]) -> Result<String, String> {
        Err("primary rejected the stream".to_string())
    }

    fn whitespace_strategy(_: &[u8]) -> Result<String, String> {
        Ok("   \n\n  ".to_string())
    }

    fn succeeding_strategy(_: &[u8]) -> Result<String, String> {
        Ok("recovered text".to_string())
    }

    #[test]
    fn pdf_chain_uses_first_strategy_that_yields_text() {
        let strategies: &[(&str, PdfStrategy)] = &[
            ("first", failing_strategy),
            ("second", succeeding_strategy),
        ];
        let text = run_pdf_strategies(b"pdf bytes", strategies).unwrap();
        assert_eq!(text, "recovered text");
    }

    #[test]
    fn pdf_chain_treats_whitespace_output_as_failure() {
        let strategies: &[(&str, PdfStrategy)] = &[
            ("first", whitespace_strategy),
            ("second", succeeding_strategy),
        ];
        let text = run_pdf_strategies(b"pdf bytes", strategies).unwrap();
        assert_eq!(text, "recovered text");
    }

    #[test]
    fn pdf_chain_reports_last_strategy_error_when_all_fail() {
        let strategies: &[(&str, PdfStrategy)] = &[
            ("first", whitespace_strategy),
            ("second", failing_strategy),
        ];
        let err = run_pdf_strategies(b"pdf bytes", strategies).unwrap_err();
        assert!(err.to_string().contains("primary rejected the stream"));
    }
}
