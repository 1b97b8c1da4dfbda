use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields the extraction model is asked to fill. Unknown values stay `None`.
/// Deserialization is lenient so reviewer-edited payloads with missing keys
/// still conform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceData {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default = "default_is_invoice")]
    pub is_invoice: bool,
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_is_invoice() -> bool {
    true
}

/// Outcome of one extraction attempt. Either fully populated data or a
/// captured error, never a mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionResult {
    #[serde(rename_all = "camelCase")]
    Success {
        data: InvoiceData,
        source_filename: String,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        error: String,
        source_filename: String,
    },
}

impl ExtractionResult {
    pub fn failure(error: impl Into<String>, source_filename: impl Into<String>) -> Self {
        ExtractionResult::Failure {
            error: error.into(),
            source_filename: source_filename.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResult::Success { .. })
    }

    pub fn data(&self) -> Option<&InvoiceData> {
        match self {
            ExtractionResult::Success { data, .. } => Some(data),
            ExtractionResult::Failure { .. } => None,
        }
    }

    pub fn source_filename(&self) -> &str {
        match self {
            ExtractionResult::Success {
                source_filename, ..
            }
            | ExtractionResult::Failure {
                source_filename, ..
            } => source_filename,
        }
    }
}

/// Turn a raw model reply into an `ExtractionResult`. Malformed output is
/// captured as a failure; this never panics or errors.
pub fn parse_model_response(content: &str, source_filename: &str) -> ExtractionResult {
    let Some(json_str) = extract_json(content) else {
        return ExtractionResult::failure("could not parse JSON response", source_filename);
    };

    let Ok(value) = serde_json::from_str::<Value>(json_str) else {
        return ExtractionResult::failure("could not parse JSON response", source_filename);
    };

    if !value.is_object() {
        return ExtractionResult::failure("could not parse JSON response", source_filename);
    }

    ExtractionResult::Success {
        data: coerce_fields(&value),
        source_filename: source_filename.to_string(),
    }
}

fn coerce_fields(value: &Value) -> InvoiceData {
    InvoiceData {
        sender: string_field(value, "sender"),
        amount: amount_field(value),
        currency: string_field(value, "currency").unwrap_or_else(|| "EUR".to_string()),
        date: string_field(value, "date"),
        description: string_field(value, "description"),
        invoice_number: string_field(value, "invoiceNumber"),
        // Invoices are assumed genuine unless the model says otherwise.
        is_invoice: !matches!(value.get("isInvoice"), Some(Value::Bool(false))),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `amount` must come out numeric: numbers pass through, numeric strings are
/// parsed, everything else becomes null.
fn amount_field(value: &Value) -> Option<f64> {
    match value.get("amount") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Locate the JSON object in a model reply that may carry extra prose or
/// code fences around it.
fn extract_json(response: &str) -> Option<&str> {
    if let Some(slice) = json_in_code_fence(response) {
        return Some(slice);
    }

    let start_idx = response.find('{')?;
    balanced_brace_slice(response, start_idx).map(|(start, end)| &response[start..end])
}

fn json_in_code_fence(response: &str) -> Option<&str> {
    let fence_start = response.find("```")?;
    let content_start = fence_start + 3;
    let rest = &response[content_start..];
    let fence_end_rel = rest.find("```")?;
    let mut content = &response[content_start..content_start + fence_end_rel];
    if let Some(stripped) = content.strip_prefix("json") {
        content = stripped.trim_start();
    }
    Some(content)
}

fn balanced_brace_slice(text: &str, start_idx: usize) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices().skip_while(|(i, _)| *i < start_idx) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some((start_idx, idx + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    None
}
