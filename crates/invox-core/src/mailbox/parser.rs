use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};

use crate::mailbox::types::{Message, MessagePart};

/// Body text kept per message; enough for extraction, bounded for storage.
pub const MAX_BODY_CHARS: usize = 5000;

/// Maximum depth for MIME tree traversal to prevent stack overflow from
/// hostile messages.
pub const MAX_MIME_DEPTH: usize = 50;

pub fn header_value(payload: Option<&MessagePart>, name: &str) -> Option<String> {
    payload.and_then(|p| {
        p.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
    })
}

pub fn subject(message: &Message) -> String {
    header_value(message.payload.as_ref(), "Subject").unwrap_or_else(|| "(No subject)".to_string())
}

pub fn sender(message: &Message) -> String {
    header_value(message.payload.as_ref(), "From").unwrap_or_default()
}

/// Message date from the `Date` header, falling back to Gmail's internal
/// millisecond timestamp.
pub fn message_date(message: &Message) -> Option<DateTime<Utc>> {
    if let Some(raw) = header_value(message.payload.as_ref(), "Date") {
        if let Ok(parsed) = DateTime::parse_from_rfc2822(raw.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

/// Extract readable body text from a message part tree.
///
/// The first `text/plain` part wins. When no plain part exists anywhere, the
/// first `text/html` part is stripped to text. The result is truncated to
/// `MAX_BODY_CHARS` characters.
pub fn extract_body_text(part: &MessagePart) -> String {
    let mut plain = None;
    let mut html = None;
    walk_text_parts(part, &mut plain, &mut html, 0);

    let text = match (plain, html) {
        (Some(plain), _) => plain,
        (None, Some(html)) => strip_html(&html),
        (None, None) => String::new(),
    };

    truncate_chars(&text, MAX_BODY_CHARS)
}

fn walk_text_parts(
    part: &MessagePart,
    plain: &mut Option<String>,
    html: &mut Option<String>,
    depth: usize,
) {
    if depth > MAX_MIME_DEPTH {
        return;
    }

    if let Some(mime) = part.mime_type.as_deref() {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            if mime.eq_ignore_ascii_case("text/plain") && plain.is_none() {
                *plain = decode_body(data);
            } else if mime.eq_ignore_ascii_case("text/html") && html.is_none() {
                *html = decode_body(data);
            }
        }
    }

    for child in &part.parts {
        walk_text_parts(child, plain, html, depth + 1);
    }
}

/// Gmail body payloads are base64url; some gateways hand back standard
/// base64, so both are tried.
pub fn decode_body(data: &str) -> Option<String> {
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(data) {
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }

    if let Ok(bytes) = STANDARD.decode(data) {
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }

    None
}

pub fn strip_html(html: &str) -> String {
    let mut bytes = std::io::Cursor::new(html.as_bytes());
    let text = html2text::from_read(&mut bytes, 80);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::types::{Header, MessagePartBody};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn make_part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            part_id: None,
            mime_type: Some(mime.to_string()),
            filename: None,
            headers: vec![],
            body: Some(MessagePartBody {
                size: text.len() as i64,
                data: Some(URL_SAFE_NO_PAD.encode(text.as_bytes())),
                attachment_id: None,
            }),
            parts: vec![],
        }
    }

    fn make_message(part: MessagePart, headers: Vec<Header>) -> Message {
        Message {
            id: "msg".into(),
            thread_id: Some("t1".into()),
            label_ids: vec![],
            snippet: None,
            internal_date: None,
            payload: Some(MessagePart { headers, ..part }),
            size_estimate: None,
        }
    }

    #[test]
    fn prefers_plain_text_part() {
        let plain = make_part("text/plain", "Plain body");
        let html = make_part("text/html", "<p>HTML body</p>");
        let payload = MessagePart {
            mime_type: Some("multipart/alternative".into()),
            parts: vec![html, plain],
            ..Default::default()
        };

        let text = extract_body_text(&payload);
        assert_eq!(text, "Plain body");
    }

    #[test]
    fn falls_back_to_stripped_html() {
        let html = make_part("text/html", "<p>Invoice   attached.</p><br><b>Total: 10</b>");
        let payload = MessagePart {
            mime_type: Some("multipart/alternative".into()),
            parts: vec![html],
            ..Default::default()
        };

        let text = extract_body_text(&payload);
        assert!(text.contains("Invoice attached."));
        assert!(text.contains("Total: 10"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn finds_nested_plain_part() {
        let plain = make_part("text/plain", "Nested plain");
        let alternative = MessagePart {
            mime_type: Some("multipart/alternative".into()),
            parts: vec![plain],
            ..Default::default()
        };
        let mixed = MessagePart {
            mime_type: Some("multipart/mixed".into()),
            parts: vec![alternative],
            ..Default::default()
        };

        assert_eq!(extract_body_text(&mixed), "Nested plain");
    }

    #[test]
    fn empty_tree_yields_empty_string() {
        let payload = MessagePart {
            mime_type: Some("multipart/mixed".into()),
            ..Default::default()
        };
        assert_eq!(extract_body_text(&payload), "");
    }

    #[test]
    fn body_is_truncated_to_limit() {
        let long = "x".repeat(MAX_BODY_CHARS + 500);
        let payload = make_part("text/plain", &long);
        let text = extract_body_text(&payload);
        assert_eq!(text.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn depth_limit_prevents_stack_overflow() {
        fn make_deeply_nested(depth: usize) -> MessagePart {
            if depth == 0 {
                make_part("text/plain", "deep content")
            } else {
                MessagePart {
                    mime_type: Some("multipart/mixed".into()),
                    parts: vec![make_deeply_nested(depth - 1)],
                    ..Default::default()
                }
            }
        }

        let deep = make_deeply_nested(60);
        assert_eq!(extract_body_text(&deep), "");
    }

    #[test]
    fn reads_subject_and_sender_headers() {
        let headers = vec![
            Header {
                name: "From".into(),
                value: "ACME Ltd <billing@acme.example>".into(),
            },
            Header {
                name: "Subject".into(),
                value: "Invoice 42".into(),
            },
        ];
        let message = make_message(make_part("text/plain", "body"), headers);

        assert_eq!(subject(&message), "Invoice 42");
        assert_eq!(sender(&message), "ACME Ltd <billing@acme.example>");
    }

    #[test]
    fn missing_subject_uses_placeholder() {
        let message = make_message(make_part("text/plain", "body"), vec![]);
        assert_eq!(subject(&message), "(No subject)");
        assert_eq!(sender(&message), "");
    }

    #[test]
    fn parses_rfc2822_date_header() {
        let headers = vec![Header {
            name: "Date".into(),
            value: "Tue, 2 Apr 2024 10:30:00 +0200".into(),
        }];
        let message = make_message(make_part("text/plain", "body"), headers);

        let date = message_date(&message).expect("date parses");
        assert_eq!(date.to_rfc3339(), "2024-04-02T08:30:00+00:00");
    }

    #[test]
    fn falls_back_to_internal_date() {
        let mut message = make_message(make_part("text/plain", "body"), vec![]);
        message.internal_date = Some("1712046600000".into());

        let date = message_date(&message).expect("internal date parses");
        assert_eq!(date.timestamp_millis(), 1712046600000);
    }

    #[test]
    fn decodes_standard_base64_fallback() {
        let data = base64::engine::general_purpose::STANDARD.encode("hello+std/base64");
        assert_eq!(decode_body(&data).as_deref(), Some("hello+std/base64"));
    }
}
