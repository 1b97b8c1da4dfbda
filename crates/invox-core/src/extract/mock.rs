use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// Test double that replays canned completions and records every request.
#[derive(Debug, Default, Clone)]
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<Result<CompletionResponse, LlmError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_response(&self, response: Result<CompletionResponse, LlmError>) {
        let mut guard = self.responses.lock().expect("lock responses");
        guard.push_back(response);
    }

    /// Shorthand for queueing a plain-text reply.
    pub fn enqueue_content(&self, content: impl Into<String>) {
        self.enqueue_response(Ok(CompletionResponse {
            content: content.into(),
            model: "mock".into(),
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
        }));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("lock requests").len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().expect("lock requests").last().cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().expect("lock requests").push(request);
        let mut guard = self.responses.lock().expect("lock responses");
        guard.pop_front().unwrap_or_else(|| {
            Err(LlmError::ProviderError(
                "mock response not provided".to_string(),
            ))
        })
    }
}
