use crate::mailbox::parser::MAX_MIME_DEPTH;
use crate::mailbox::types::{AttachmentRef, MessagePart};

/// Document MIME types accepted for processing. Images and everything else
/// are excluded to keep spam out of the review queue.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
];

/// Extension fallback when the MIME type is missing or generic.
const ALLOWED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx", ".odt", ".ods"];

/// Collect document attachments from a message part tree.
///
/// A part is kept only when it has both a filename and a provider attachment
/// id, and its MIME type or file extension is on the document allowlist.
/// Traversal is depth-first pre-order, so the output is deterministic for a
/// fixed input tree.
pub fn collect_attachments(part: &MessagePart) -> Vec<AttachmentRef> {
    let mut attachments = Vec::new();
    walk(part, &mut attachments, 0);
    attachments
}

fn walk(part: &MessagePart, attachments: &mut Vec<AttachmentRef>, depth: usize) {
    if depth > MAX_MIME_DEPTH {
        return;
    }

    if let Some(reference) = attachment_ref(part) {
        attachments.push(reference);
    }

    for child in &part.parts {
        walk(child, attachments, depth + 1);
    }
}

fn attachment_ref(part: &MessagePart) -> Option<AttachmentRef> {
    let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
    let body = part.body.as_ref()?;
    let attachment_id = body.attachment_id.as_deref()?;

    let mime_type = part.mime_type.clone().unwrap_or_default();
    if !is_document(filename, &mime_type) {
        return None;
    }

    Some(AttachmentRef {
        filename: filename.to_string(),
        mime_type,
        attachment_id: attachment_id.to_string(),
        size: body.size,
    })
}

fn is_document(filename: &str, mime_type: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    if ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return true;
    }

    let lower = filename.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
