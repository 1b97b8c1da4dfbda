use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfTextError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),
}

/// Extract page text in document order.
///
/// Pages that fail text extraction (broken fonts, odd encodings) are skipped
/// rather than failing the whole document; the caller applies the
/// minimum-content rule to whatever comes back.
pub fn extract_text(bytes: &[u8]) -> Result<String, PdfTextError> {
    let doc = lopdf::Document::load_mem(bytes)?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    Ok(text)
}
