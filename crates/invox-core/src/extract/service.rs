use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::document::{self, DocumentKind, MIN_TEXT_CHARS};
use crate::extract::prompt;
use crate::extract::result::{ExtractionResult, parse_model_response};
use crate::extract::types::{ChatMessage, ChatRole, CompletionRequest, ImageData};
use crate::extract::{LlmClient, LlmError};

/// Turns document bytes or email text into a structured extraction result.
///
/// All failures are captured in the returned `ExtractionResult`; this service
/// never propagates an error past the item being processed.
pub struct ExtractionService {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: u32,
}

impl ExtractionService {
    pub fn new(llm: Arc<dyn LlmClient>, model_config: &ModelConfig) -> Self {
        Self {
            llm,
            temperature: model_config.temperature,
            max_tokens: model_config.max_output_tokens,
        }
    }

    pub async fn extract_document(
        &self,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> ExtractionResult {
        let kind = document::classify(filename, mime_type);
        debug!(%filename, %mime_type, ?kind, "extracting document");

        match kind {
            DocumentKind::Pdf => self.extract_pdf(bytes, filename).await,
            DocumentKind::Spreadsheet => self.extract_spreadsheet(bytes, filename).await,
            DocumentKind::Image => self.extract_image(bytes, mime_type, filename).await,
            DocumentKind::Word => {
                ExtractionResult::failure("Word documents not supported yet", filename)
            }
            DocumentKind::Unknown => ExtractionResult::failure(
                format!("unsupported file format: {mime_type}"),
                filename,
            ),
        }
    }

    pub async fn extract_from_email_text(
        &self,
        text: &str,
        subject: &str,
        from: &str,
    ) -> ExtractionResult {
        let prompt = prompt::email_text_prompt(text, subject, from);
        self.complete_and_parse(prompt, None, "email_text").await
    }

    async fn extract_pdf(&self, bytes: &[u8], filename: &str) -> ExtractionResult {
        let text = match document::pdf::extract_text(bytes) {
            Ok(text) => text,
            Err(err) => return ExtractionResult::failure(err.to_string(), filename),
        };

        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return ExtractionResult::failure(
                "PDF is scanned/image-based, no text could be extracted",
                filename,
            );
        }

        self.complete_and_parse(prompt::document_prompt(&text), None, filename)
            .await
    }

    async fn extract_spreadsheet(&self, bytes: &[u8], filename: &str) -> ExtractionResult {
        let text = match document::spreadsheet::extract_text(bytes) {
            Ok(text) => text,
            Err(err) => return ExtractionResult::failure(err.to_string(), filename),
        };

        // Header lines alone don't count as content.
        let body: String = text
            .lines()
            .filter(|line| !line.starts_with("Sheet: "))
            .collect();
        if body.trim().chars().count() < MIN_TEXT_CHARS {
            return ExtractionResult::failure(
                "spreadsheet is empty or could not be read",
                filename,
            );
        }

        self.complete_and_parse(prompt::spreadsheet_prompt(&text), None, filename)
            .await
    }

    async fn extract_image(
        &self,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> ExtractionResult {
        let image = ImageData {
            content_type: mime_type.to_string(),
            data_base64: STANDARD.encode(bytes),
        };
        self.complete_and_parse(prompt::image_prompt(), Some(image), filename)
            .await
    }

    async fn complete_and_parse(
        &self,
        prompt: String,
        image: Option<ImageData>,
        filename: &str,
    ) -> ExtractionResult {
        match self.complete(prompt, image).await {
            Ok(content) => parse_model_response(&content, filename),
            Err(err) => {
                warn!(%filename, error = %err, "extraction model call failed");
                ExtractionResult::failure(err.to_string(), filename)
            }
        }
    }

    async fn complete(
        &self,
        prompt: String,
        image: Option<ImageData>,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: false,
            image,
        };

        let response = self.llm.complete(request).await?;
        Ok(response.content)
    }
}
