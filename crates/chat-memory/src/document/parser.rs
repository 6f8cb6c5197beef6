use encoding_rs::UTF_8;
use lopdf::Document as PdfDocument;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Url;
use scraper::Html;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

use crate::utils::error::DocumentError;

/// Turns fetched bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        source_url: &str,
    ) -> Result<String, DocumentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Html,
    Text,
}

impl DocumentKind {
    /// Declared content type first, then the URL's extension, then magic bytes.
    pub fn detect(bytes: &[u8], content_type: Option<&str>, source_url: &str) -> Self {
        if let Some(kind) = content_type.and_then(Self::from_mime) {
            return kind;
        }

        let path = Url::parse(source_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| source_url.to_string());
        if let Some(kind) = mime_guess::from_path(&path)
            .first_raw()
            .and_then(Self::from_mime)
        {
            return kind;
        }

        infer::get(bytes)
            .and_then(|t| Self::from_mime(t.mime_type()))
            .unwrap_or(Self::Text)
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            other if other.starts_with("text/") => Some(Self::Text),
            _ => None,
        }
    }
}

/// Default extractor: PDF, DOCX, HTML, and anything else as text.
#[derive(Debug, Default, Clone)]
pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_pdf(bytes: &[u8]) -> Result<String, DocumentError> {
        let doc = PdfDocument::load_mem(bytes)
            .map_err(|e| DocumentError::Extraction(format!("Failed to load PDF: {}", e)))?;

        let mut content = String::new();
        for page_num in doc.get_pages().keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => warn!("Failed to extract text from page {}: {}", page_num, e),
            }
        }
        Ok(content)
    }

    fn parse_docx(bytes: &[u8]) -> Result<String, DocumentError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| DocumentError::Extraction(format!("Not a DOCX package: {}", e)))?;
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| DocumentError::Extraction(format!("Missing word/document.xml: {}", e)))?;

        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| DocumentError::Extraction(e.to_string()))?;

        Self::docx_body_text(&xml)
    }

    /// Text of every `w:t` run, one line per `w:p` paragraph.
    fn docx_body_text(xml: &str) -> Result<String, DocumentError> {
        let mut reader = Reader::from_str(xml);
        let mut text = String::new();
        let mut in_run_text = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_run_text = true,
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"w:t" => in_run_text = false,
                    b"w:p" => text.push('\n'),
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.name().as_ref() {
                    b"w:tab" => text.push('\t'),
                    b"w:br" | b"w:cr" => text.push('\n'),
                    _ => {}
                },
                Ok(Event::Text(t)) if in_run_text => {
                    let raw = String::from_utf8_lossy(&t);
                    let unescaped = quick_xml::escape::unescape(&raw)
                        .map_err(|e| DocumentError::Extraction(e.to_string()))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::GeneralRef(r)) if in_run_text => {
                    let entity = format!("&{};", String::from_utf8_lossy(&r));
                    let resolved = quick_xml::escape::unescape(&entity)
                        .map_err(|e| DocumentError::Extraction(e.to_string()))?;
                    text.push_str(&resolved);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(DocumentError::Extraction(format!(
                        "Malformed document.xml at {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        Ok(text)
    }

    /// Visible text, skipping script/style/noscript/head subtrees.
    fn parse_html(bytes: &[u8]) -> String {
        let html = Self::decode_text(bytes);
        let document = Html::parse_document(&html);

        let mut text = String::new();
        for node in document.root_element().descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "head"))
            });
            if !hidden {
                text.push_str(fragment);
            }
        }

        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// UTF-8 when valid, otherwise a lossy decode that honours a BOM.
    fn decode_text(bytes: &[u8]) -> String {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return text.to_string();
        }
        let (text, encoding, had_errors) = UTF_8.decode(bytes);
        if had_errors {
            debug!("Lossy decode as {}", encoding.name());
        }
        text.into_owned()
    }
}

impl TextExtractor for DocumentParser {
    fn extract_text(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        source_url: &str,
    ) -> Result<String, DocumentError> {
        let kind = DocumentKind::detect(bytes, content_type, source_url);
        debug!("Extracting {:?} from {} ({} bytes)", kind, source_url, bytes.len());

        let text = match kind {
            DocumentKind::Pdf => Self::parse_pdf(bytes)?,
            DocumentKind::Docx => Self::parse_docx(bytes)?,
            DocumentKind::Html => Self::parse_html(bytes),
            DocumentKind::Text => Self::decode_text(bytes),
        };

        debug!("Extracted {} characters from {}", text.chars().count(), source_url);
        Ok(text)
    }
}
