pub mod pdf;
pub mod spreadsheet;

use serde::{Deserialize, Serialize};

/// Minimum extractable characters before a document counts as text-bearing.
/// Anything below this is treated as scanned or empty.
pub const MIN_TEXT_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Spreadsheet,
    Image,
    Word,
    Unknown,
}

/// Determine how a file should be processed, by MIME type first and filename
/// extension as fallback.
pub fn classify(filename: &str, mime_type: &str) -> DocumentKind {
    let mime = mime_type.to_ascii_lowercase();
    let name = filename.to_ascii_lowercase();

    if mime == "application/pdf" || name.ends_with(".pdf") {
        return DocumentKind::Pdf;
    }

    if mime == "application/vnd.ms-excel"
        || mime == "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        || mime == "application/vnd.oasis.opendocument.spreadsheet"
        || name.ends_with(".xls")
        || name.ends_with(".xlsx")
        || name.ends_with(".ods")
    {
        return DocumentKind::Spreadsheet;
    }

    if mime == "application/msword"
        || mime == "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        || name.ends_with(".doc")
        || name.ends_with(".docx")
    {
        return DocumentKind::Word;
    }

    if mime.starts_with("image/")
        || name.ends_with(".jpg")
        || name.ends_with(".jpeg")
        || name.ends_with(".png")
        || name.ends_with(".gif")
    {
        return DocumentKind::Image;
    }

    DocumentKind::Unknown
}
