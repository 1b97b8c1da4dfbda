pub mod error;
pub mod mock;
pub mod prompt;
pub mod result;
pub mod service;
pub mod types;

pub use error::{LlmError, RateLimitInfo};
pub use mock::MockLlmClient;
pub use result::{ExtractionResult, InvoiceData, parse_model_response};
pub use service::ExtractionService;
pub use types::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ImageData};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genai::{
    Client as GenaiClient, Error as GenaiError,
    chat::{
        ChatMessage as GenaiChatMessage, ChatOptions, ChatRequest, ChatResponse,
        ChatResponseFormat, ContentPart, MessageContent,
    },
    webc,
};
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderValue, RETRY_AFTER},
};
use tracing::debug;

use crate::config::ModelConfig;

/// Minimal async interface for the extraction model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[async_trait]
pub trait ChatExecutor: Send + Sync {
    async fn exec_chat(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatResponse, GenaiError>;
}

#[async_trait]
impl ChatExecutor for GenaiClient {
    async fn exec_chat(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatResponse, GenaiError> {
        GenaiClient::exec_chat(self, model, request, options).await
    }
}

/// Default LLM client backed by the genai crate.
pub struct GenaiLlmClient {
    chat: Arc<dyn ChatExecutor>,
    model: String,
}

impl GenaiLlmClient {
    pub fn new(model_config: &ModelConfig) -> Self {
        let chat: Arc<dyn ChatExecutor> = Arc::new(GenaiClient::default());
        Self::with_executor(model_config, chat)
    }

    pub fn with_executor(model_config: &ModelConfig, chat: Arc<dyn ChatExecutor>) -> Self {
        Self {
            chat,
            model: namespaced_model(model_config),
        }
    }

    fn build_chat_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len());
        for (idx, message) in request.messages.iter().enumerate() {
            let is_final_user =
                idx + 1 == request.messages.len() && matches!(message.role, ChatRole::User);
            if is_final_user {
                if let Some(image) = &request.image {
                    messages.push(GenaiChatMessage::user(vec![
                        ContentPart::from_binary_base64(
                            image.content_type.clone(),
                            image.data_base64.clone(),
                            None,
                        ),
                        ContentPart::from_text(message.content.clone()),
                    ]));
                    continue;
                }
            }
            messages.push(to_genai_message(message));
        }
        ChatRequest::from_messages(messages)
    }

    fn build_chat_options(&self, request: &CompletionRequest) -> ChatOptions {
        let mut options = ChatOptions::default()
            .with_temperature(request.temperature as f64)
            .with_max_tokens(request.max_tokens);

        if request.json_mode {
            options = options.with_response_format(ChatResponseFormat::JsonMode);
        }

        options
    }
}

#[async_trait]
impl LlmClient for GenaiLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let chat_request = self.build_chat_request(&request);
        let options = self.build_chat_options(&request);

        let start = Instant::now();
        let result = self
            .chat
            .exec_chat(&self.model, chat_request, Some(&options))
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let content = response.first_text().unwrap_or("").to_string();
                let provider_model = response.provider_model_iden.to_string();
                let (input_tokens, output_tokens) = usage_tokens(&response.usage);

                debug!(
                    model = %provider_model,
                    input_tokens,
                    output_tokens,
                    latency_ms,
                    "extraction model call completed"
                );

                Ok(CompletionResponse {
                    content,
                    model: provider_model,
                    input_tokens,
                    output_tokens,
                    latency_ms,
                })
            }
            Err(err) => Err(map_genai_error(err)),
        }
    }
}

fn to_genai_message(message: &ChatMessage) -> GenaiChatMessage {
    let content = MessageContent::from_text(message.content.clone());
    match message.role {
        ChatRole::System => GenaiChatMessage::system(content),
        ChatRole::User => GenaiChatMessage::user(content),
        ChatRole::Assistant => GenaiChatMessage::assistant(content),
    }
}

fn namespaced_model(cfg: &ModelConfig) -> String {
    if cfg.provider.is_empty() {
        cfg.model.clone()
    } else {
        format!("{}::{}", cfg.provider.to_lowercase(), cfg.model)
    }
}

fn usage_tokens(usage: &genai::chat::Usage) -> (u32, u32) {
    let input = usage.prompt_tokens.unwrap_or_default().max(0) as u32;
    let output = usage.completion_tokens.unwrap_or_default().max(0) as u32;
    (input, output)
}

fn map_genai_error(err: GenaiError) -> LlmError {
    match err {
        GenaiError::RequiresApiKey { .. }
        | GenaiError::NoAuthResolver { .. }
        | GenaiError::NoAuthData { .. } => LlmError::AuthenticationFailed,
        GenaiError::ChatReqHasNoMessages { .. }
        | GenaiError::LastChatMessageIsNotUser { .. }
        | GenaiError::MessageRoleNotSupported { .. }
        | GenaiError::MessageContentTypeNotSupported { .. }
        | GenaiError::JsonModeWithoutInstruction
        | GenaiError::VerbosityParsing { .. }
        | GenaiError::ReasoningParsingError { .. }
        | GenaiError::ServiceTierParsing { .. }
        | GenaiError::ModelMapperFailed { .. }
        | GenaiError::AdapterNotSupported { .. }
        | GenaiError::Resolver { .. } => LlmError::InvalidRequest(err.to_string()),
        GenaiError::InvalidJsonResponseElement { .. } | GenaiError::StreamParse { .. } => {
            LlmError::ParseError(err.to_string())
        }
        GenaiError::NoChatResponse { .. } => LlmError::ServerError(err.to_string()),
        GenaiError::WebAdapterCall { webc_error, .. }
        | GenaiError::WebModelCall { webc_error, .. } => map_webc_error(webc_error),
        GenaiError::ChatResponse { .. } | GenaiError::WebStream { .. } => {
            LlmError::ProviderError(err.to_string())
        }
        GenaiError::Internal(msg) => LlmError::ProviderError(msg),
        GenaiError::EventSourceClone(e) => LlmError::ProviderError(e.to_string()),
        GenaiError::JsonValueExt(e) => LlmError::ParseError(e.to_string()),
        GenaiError::ReqwestEventSource(err) => LlmError::ProviderError(err.to_string()),
        GenaiError::SerdeJson(err) => LlmError::ParseError(err.to_string()),
    }
}

fn map_webc_error(err: webc::Error) -> LlmError {
    match &err {
        webc::Error::ResponseFailedStatus {
            status, headers, ..
        } => {
            let retry_after_ms = retry_after_ms_from_headers(headers);
            match *status {
                StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
                    LlmError::RateLimited(RateLimitInfo::new(retry_after_ms))
                }
                StatusCode::UNAUTHORIZED => LlmError::AuthenticationFailed,
                status if status.is_client_error() => LlmError::InvalidRequest(status.to_string()),
                status if status.is_server_error() => LlmError::ServerError(status.to_string()),
                status => LlmError::ProviderError(status.to_string()),
            }
        }
        webc::Error::Reqwest(req_err) => {
            if req_err.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::ProviderError(req_err.to_string())
            }
        }
        webc::Error::ResponseFailedNotJson { .. } => LlmError::ParseError(err.to_string()),
        webc::Error::JsonValueExt(parse_err) => LlmError::ParseError(parse_err.to_string()),
        webc::Error::EventSourceClone(clone_err) => LlmError::ProviderError(clone_err.to_string()),
    }
}

fn retry_after_ms_from_headers(headers: &HeaderMap) -> Option<u64> {
    if let Some(value) = headers.get(RETRY_AFTER) {
        if let Some(ms) = parse_retry_after(value) {
            return Some(ms);
        }
    }

    headers.get("x-ratelimit-reset").and_then(parse_epoch_reset)
}

fn parse_retry_after(value: &HeaderValue) -> Option<u64> {
    let raw = value.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs.saturating_mul(1000));
    }

    // HTTP-date format
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        let now = Utc::now();
        let delta_ms = (dt.with_timezone(&Utc) - now).num_milliseconds();
        if delta_ms > 0 {
            return Some(delta_ms as u64);
        }
    }

    None
}

fn parse_epoch_reset(value: &HeaderValue) -> Option<u64> {
    let raw = value.to_str().ok()?.trim();
    let reset_epoch = raw.parse::<i64>().ok()?;
    let now_epoch = Utc::now().timestamp();
    let delta_ms = (reset_epoch - now_epoch).saturating_mul(1000);
    (delta_ms > 0).then_some(delta_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai::chat::Usage;
    use genai::{ModelIden, adapter::AdapterKind};
    use std::sync::Mutex;

    fn test_model_config() -> ModelConfig {
        ModelConfig {
            provider: "OpenAI".into(),
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_output_tokens: 1000,
        }
    }

    #[test]
    fn namespaced_model_handles_provider_casing() {
        let model = namespaced_model(&test_model_config());
        assert_eq!(model, "openai::gpt-4o");
    }

    #[test]
    fn namespaced_model_without_provider_returns_model() {
        let mut cfg = test_model_config();
        cfg.provider.clear();
        assert_eq!(namespaced_model(&cfg), "gpt-4o");
    }

    #[test]
    fn usage_tokens_defaults_and_clamps() {
        let mut usage = Usage::default();
        assert_eq!(usage_tokens(&usage), (0, 0));

        usage.prompt_tokens = Some(-5);
        usage.completion_tokens = Some(7);
        assert_eq!(usage_tokens(&usage), (0, 7));
    }

    #[test]
    fn build_chat_request_converts_messages() {
        let client = GenaiLlmClient::new(&test_model_config());

        let request = CompletionRequest {
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: "system".into(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: "hi there".into(),
                },
            ],
            temperature: 0.1,
            max_tokens: 32,
            json_mode: false,
            image: None,
        };

        let built = client.build_chat_request(&request);
        assert_eq!(built.messages.len(), 2);
        assert!(matches!(
            built.messages[0].role,
            genai::chat::ChatRole::System
        ));
        assert_eq!(built.messages[0].content.first_text(), Some("system"));
        assert!(matches!(built.messages[1].role, genai::chat::ChatRole::User));
        assert_eq!(built.messages[1].content.first_text(), Some("hi there"));
    }

    #[test]
    fn build_chat_request_attaches_image_to_final_user_message() {
        let client = GenaiLlmClient::new(&test_model_config());

        let request = CompletionRequest {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "analyze this".into(),
            }],
            temperature: 0.1,
            max_tokens: 32,
            json_mode: false,
            image: Some(ImageData {
                content_type: "image/png".into(),
                data_base64: "aGVsbG8=".into(),
            }),
        };

        let built = client.build_chat_request(&request);
        assert_eq!(built.messages.len(), 1);
        let parts = built.messages[0].content.parts();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_image());
    }

    #[test]
    fn build_chat_options_sets_temperature_tokens_and_json_mode() {
        let client = GenaiLlmClient::new(&test_model_config());

        let request = CompletionRequest {
            messages: vec![],
            temperature: 0.42,
            max_tokens: 128,
            json_mode: true,
            image: None,
        };

        let options = client.build_chat_options(&request);
        assert_eq!(options.max_tokens, Some(128));
        assert!(
            (options.temperature.unwrap() - 0.42).abs() < 1e-6,
            "temperature should be propagated"
        );
        assert!(matches!(
            options.response_format,
            Some(ChatResponseFormat::JsonMode)
        ));
    }

    #[test]
    fn map_genai_error_maps_categories() {
        let model_iden = ModelIden::from((AdapterKind::OpenAI, "gpt-4o"));

        let rate_limit = GenaiError::WebModelCall {
            model_iden: model_iden.clone(),
            webc_error: webc::Error::ResponseFailedStatus {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: String::new(),
                headers: Box::new(HeaderMap::new()),
            },
        };
        assert!(matches!(
            map_genai_error(rate_limit),
            LlmError::RateLimited(_)
        ));

        let invalid = GenaiError::ChatReqHasNoMessages {
            model_iden: model_iden.clone(),
        };
        assert!(matches!(
            map_genai_error(invalid),
            LlmError::InvalidRequest(_)
        ));

        let parse = GenaiError::InvalidJsonResponseElement { info: "bad" };
        assert!(matches!(map_genai_error(parse), LlmError::ParseError(_)));

        let auth = GenaiError::RequiresApiKey {
            model_iden: model_iden.clone(),
        };
        assert!(matches!(
            map_genai_error(auth),
            LlmError::AuthenticationFailed
        ));

        let provider = GenaiError::ChatResponse {
            model_iden,
            body: serde_json::json!({"error": "oops"}),
        };
        assert!(matches!(
            map_genai_error(provider),
            LlmError::ProviderError(_)
        ));
    }

    #[test]
    fn map_webc_error_classifies_status_codes() {
        let rate = webc::Error::ResponseFailedStatus {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
            headers: Box::new(HeaderMap::new()),
        };
        assert!(matches!(map_webc_error(rate), LlmError::RateLimited(_)));

        let client = webc::Error::ResponseFailedStatus {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
            headers: Box::new(HeaderMap::new()),
        };
        assert!(matches!(map_webc_error(client), LlmError::InvalidRequest(_)));

        let server = webc::Error::ResponseFailedStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
            headers: Box::new(HeaderMap::new()),
        };
        assert!(matches!(map_webc_error(server), LlmError::ServerError(_)));

        let parse = webc::Error::ResponseFailedNotJson {
            content_type: "text/plain".into(),
        };
        assert!(matches!(map_webc_error(parse), LlmError::ParseError(_)));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after_ms_from_headers(&headers), Some(2000));
    }

    #[derive(Default)]
    struct StubChatExecutor {
        responses: Mutex<Vec<Result<ChatResponse, GenaiError>>>,
        calls: Mutex<Vec<(String, ChatRequest, Option<ChatOptions>)>>,
    }

    impl StubChatExecutor {
        fn new(response: Result<ChatResponse, GenaiError>) -> Self {
            Self {
                responses: Mutex::new(vec![response]),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatExecutor for StubChatExecutor {
        async fn exec_chat(
            &self,
            model: &str,
            request: ChatRequest,
            options: Option<&ChatOptions>,
        ) -> Result<ChatResponse, GenaiError> {
            self.calls.lock().expect("calls").push((
                model.to_string(),
                request.clone(),
                options.cloned(),
            ));

            self.responses
                .lock()
                .expect("responses")
                .pop()
                .unwrap_or_else(|| Err(GenaiError::Internal("stub missing response".into())))
        }
    }

    #[tokio::test]
    async fn complete_returns_content_and_usage() {
        let response = ChatResponse {
            content: MessageContent::from_text("{\"sender\": \"X\"}"),
            reasoning_content: None,
            model_iden: ModelIden::new(AdapterKind::OpenAI, "gpt-4o"),
            provider_model_iden: ModelIden::new(AdapterKind::OpenAI, "gpt-4o"),
            usage: Usage {
                prompt_tokens: Some(5),
                completion_tokens: Some(7),
                total_tokens: None,
                ..Default::default()
            },
            captured_raw_body: None,
        };
        let expected_model = response.provider_model_iden.to_string();

        let stub = Arc::new(StubChatExecutor::new(Ok(response)));
        let client = GenaiLlmClient::with_executor(&test_model_config(), stub.clone());

        let request = CompletionRequest {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "hello".into(),
            }],
            temperature: 0.5,
            max_tokens: 64,
            json_mode: true,
            image: None,
        };

        let completion = client.complete(request.clone()).await.expect("completion");
        assert_eq!(completion.content, "{\"sender\": \"X\"}");
        assert_eq!(completion.input_tokens, 5);
        assert_eq!(completion.output_tokens, 7);
        assert_eq!(completion.model, expected_model);

        let recorded = stub.calls.lock().expect("calls");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "openai::gpt-4o");
        let options = recorded[0].2.as_ref().expect("options recorded");
        assert_eq!(options.max_tokens, Some(request.max_tokens));
        assert!(matches!(
            options.response_format,
            Some(ChatResponseFormat::JsonMode)
        ));
    }

    #[tokio::test]
    async fn complete_maps_rate_limit_with_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        let rate_limit_error = GenaiError::WebModelCall {
            model_iden: ModelIden::new(AdapterKind::OpenAI, "gpt-4o"),
            webc_error: webc::Error::ResponseFailedStatus {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: String::new(),
                headers: Box::new(headers),
            },
        };

        let stub = Arc::new(StubChatExecutor::new(Err(rate_limit_error)));
        let client = GenaiLlmClient::with_executor(&test_model_config(), stub);

        let request = CompletionRequest {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "hi".into(),
            }],
            temperature: 0.0,
            max_tokens: 16,
            json_mode: false,
            image: None,
        };

        match client.complete(request).await {
            Err(LlmError::RateLimited(RateLimitInfo { retry_after_ms })) => {
                assert_eq!(retry_after_ms, Some(2000))
            }
            other => panic!("expected rate limited error, got {other:?}"),
        }
    }
}
