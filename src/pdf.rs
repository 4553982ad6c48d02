//! Per-page PDF text extraction, feeding C8's page-aware ingest path.
//!
//! Grounded in the teacher's `processing::lopdf_parser::LoPdfParser`,
//! trimmed to page text only: form-field and annotation extraction have no
//! counterpart in the ingest pipeline this crate implements.

use anyhow::{anyhow, Context, Result};
use lopdf::{Document, Object};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PdfPage {
    pub page_number: usize,
    pub text: String,
}

pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn extract(path: &Path) -> Result<Vec<PdfPage>> {
        let doc = Document::load(path).with_context(|| format!("lopdf: failed to load {}", path.display()))?;
        Self::extract_pages(&doc)
    }

    pub fn extract_bytes(bytes: &[u8]) -> Result<Vec<PdfPage>> {
        let doc = Document::load_mem(bytes).context("lopdf: failed to load PDF from memory")?;
        Self::extract_pages(&doc)
    }

    fn extract_pages(doc: &Document) -> Result<Vec<PdfPage>> {
        let page_ids: Vec<(u32, u16)> = doc.get_pages().values().cloned().collect();
        let mut pages = Vec::with_capacity(page_ids.len());
        for (i, &page_id) in page_ids.iter().enumerate() {
            let text = Self::extract_page_text(doc, page_id).unwrap_or_default();
            pages.push(PdfPage { page_number: i + 1, text });
        }
        Ok(pages)
    }

    fn extract_page_text(doc: &Document, page_id: (u32, u16)) -> Result<String> {
        let page = doc.get_object(page_id)?;
        let page_dict = page.as_dict().map_err(|_| anyhow!("page is not a dict"))?;
        if let Ok(contents) = page_dict.get(b"Contents") {
            Self::extract_content_text(doc, contents)
        } else {
            Ok(String::new())
        }
    }

    fn extract_content_text(doc: &Document, contents: &Object) -> Result<String> {
        match contents {
            Object::Reference(ref_id) => {
                let obj = doc.get_object(*ref_id)?;
                Self::extract_content_text(doc, &obj)
            }
            Object::Array(arr) => {
                let mut text = String::new();
                for item in arr {
                    if let Ok(t) = Self::extract_content_text(doc, item) {
                        text.push_str(&t);
                    }
                }
                Ok(text)
            }
            Object::Stream(stream) => {
                if let Ok(data) = stream.decode_content() {
                    if let Ok(bytes) = data.encode() {
                        let content = String::from_utf8_lossy(&bytes);
                        Ok(parse_content_stream(&content))
                    } else {
                        Ok(String::new())
                    }
                } else {
                    Ok(String::new())
                }
            }
            _ => Ok(String::new()),
        }
    }
}

/// Parses `Tj`/`TJ`/`ET` content-stream operators into plain text.
fn parse_content_stream(content: &str) -> String {
    let mut result = String::new();
    let mut current = String::new();

    for line in content.lines() {
        let line = line.trim();
        if line.ends_with("Tj") {
            if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                if end > start {
                    current.push_str(&unescape_pdf_string(&line[start + 1..end]));
                    current.push(' ');
                }
            }
        } else if line.ends_with("TJ") {
            if let (Some(start), Some(end)) = (line.find('['), line.rfind(']')) {
                if end > start {
                    let arr = &line[start + 1..end];
                    for part in arr.split(')').filter(|s| !s.is_empty()) {
                        if let Some(ts) = part.rfind('(') {
                            current.push_str(&unescape_pdf_string(&part[ts + 1..]));
                        }
                    }
                    current.push(' ');
                }
            }
        } else if line == "ET" {
            if !current.is_empty() {
                result.push_str(current.trim());
                result.push('\n');
                current.clear();
            }
        }
    }
    if !current.is_empty() {
        result.push_str(current.trim());
    }
    result
}

fn unescape_pdf_string(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
        .replace("\\(", "(")
        .replace("\\)", ")")
        .replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_stream_extracts_tj_text() {
        let stream = "BT\n(Hello world) Tj\nET";
        assert_eq!(parse_content_stream(stream), "Hello world");
    }

    #[test]
    fn parse_content_stream_extracts_tj_array_text() {
        let stream = "BT\n[(Hel) (lo)] TJ\nET";
        assert_eq!(parse_content_stream(stream), "Hel lo");
    }

    #[test]
    fn unescape_handles_common_pdf_escapes() {
        assert_eq!(unescape_pdf_string("a\\nb\\)c"), "a\nb)c");
    }

    #[test]
    fn parse_content_stream_with_no_text_operators_is_empty() {
        assert_eq!(parse_content_stream("q 0 0 0 rg Q"), "");
    }
}
