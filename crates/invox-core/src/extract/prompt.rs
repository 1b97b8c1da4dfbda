use crate::mailbox::parser::truncate_chars;

/// Document text sent to the model is capped at this many characters.
pub const MAX_DOCUMENT_CHARS: usize = 6000;
/// Email bodies are shorter; cap them tighter.
pub const MAX_EMAIL_TEXT_CHARS: usize = 4000;

const SCHEMA_BLOCK: &str = r#"{
  "sender": "Company or person name who issued the invoice",
  "amount": 123.45,
  "currency": "EUR",
  "date": "2024-12-20",
  "description": "Brief description of what the invoice is for",
  "invoiceNumber": "Invoice number if visible",
  "isInvoice": true
}"#;

const FIELD_RULES: &str = r#"Important:
- "sender" is the company/person who SENT the invoice (vendor/supplier), NOT the recipient
- "amount" must be a number (not string), representing the total amount to pay
- "date" must be in YYYY-MM-DD format
- "currency" should be 3-letter code (EUR, USD, etc.)
- "isInvoice" should be true if this looks like an invoice/receipt, false otherwise
- If you can't determine a value, use null"#;

pub fn document_prompt(text: &str) -> String {
    format!(
        "Analyze this invoice/receipt document text and extract the following information.\n\
         Return ONLY a valid JSON object with these fields (use null if not found):\n\n\
         {SCHEMA_BLOCK}\n\n{FIELD_RULES}\n\nDocument text:\n{}",
        truncate_chars(text, MAX_DOCUMENT_CHARS)
    )
}

pub fn spreadsheet_prompt(text: &str) -> String {
    format!(
        "Analyze this invoice/receipt document data (from a spreadsheet) and extract the following information.\n\
         Return ONLY a valid JSON object with these fields (use null if not found):\n\n\
         {SCHEMA_BLOCK}\n\n{FIELD_RULES}\n\nDocument data:\n{}",
        truncate_chars(text, MAX_DOCUMENT_CHARS)
    )
}

pub fn image_prompt() -> String {
    format!(
        "Analyze this invoice/receipt document and extract the following information.\n\
         Return ONLY a valid JSON object with these fields (use null if not found):\n\n\
         {SCHEMA_BLOCK}\n\n{FIELD_RULES}\n\nAnalyze the document now:"
    )
}

pub fn email_text_prompt(text: &str, subject: &str, from: &str) -> String {
    format!(
        "Analyze this email text and extract payment/invoice information.\n\
         Return ONLY a valid JSON object with these fields (use null if not found):\n\n\
         {SCHEMA_BLOCK}\n\n{FIELD_RULES}\n\
         - \"sender\" is the company/person requesting payment (from email header: {from})\n\n\
         Email subject: {subject}\n\
         Email from: {from}\n\
         Email text:\n{}",
        truncate_chars(text, MAX_EMAIL_TEXT_CHARS)
    )
}
