//! Per-record content extraction: main text via trafilatura, `<h1>` via an
//! HTML selector, language gating via whatlang.
//!
//! Extraction failures are a per-record condition: they are logged and the
//! record is skipped, never failing the surrounding WARC job.

use once_cell::sync::Lazy;
use pyo3::prelude::*;
use scraper::{Html, Selector};
use tracing::debug;
use whatlang::Lang;

use crate::records::PageRecord;

static H1_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1").expect("static selector"));

/// Runs the trafilatura extractor over an HTML document. Returns `None` when
/// the extractor found no main content.
pub fn extract_text(html: &str) -> anyhow::Result<Option<String>> {
    Python::with_gil(|py| {
        let trafilatura = py.import("trafilatura")?;
        let extracted = trafilatura.call_method1("extract", (html,))?;
        let text: Option<String> = extracted.extract()?;
        Ok(text)
    })
}

/// Text of the first `<h1>` in the document, or the empty string.
pub fn first_h1(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .select(&H1_SELECTOR)
        .next()
        .map(|h1| h1.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

pub fn is_french(text: &str) -> bool {
    matches!(whatlang::detect(text), Some(info) if info.lang() == Lang::Fra)
}

/// A WARC response body is the raw HTTP response; the HTML starts after the
/// header block, whose blank line may or may not carry carriage returns.
pub fn html_payload(raw_body: &str) -> Option<&str> {
    if let Some(header_end) = raw_body.find("\r\n\r\n") {
        return Some(&raw_body[header_end + 4..]);
    }
    raw_body
        .find("\n\n")
        .map(|header_end| &raw_body[header_end + 2..])
}

/// Turns one WARC response record into a page record, applying the French
/// filter. Returns `None` for non-HTML bodies, empty extractions, non-French
/// pages, and extractor failures.
pub fn process_record(url: &str, raw_body: &str) -> Option<PageRecord> {
    let html = html_payload(raw_body)?;

    let text = match extract_text(html) {
        Ok(Some(text)) if !text.is_empty() => text,
        Ok(_) => return None,
        Err(e) => {
            debug!(err.msg = %e, url, "Skipping record: extraction failed");
            return None;
        }
    };

    if !is_french(&text) {
        return None;
    }

    Some(PageRecord {
        url: url.to_string(),
        h1: first_h1(html),
        text,
    })
}
