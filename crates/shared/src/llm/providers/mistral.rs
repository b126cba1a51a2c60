use serde_json::{Value, json};

use super::openai::{chat_completions_body, parse_chat_completion};
use super::{CompletionRequest, ProviderAdapter, ProviderCompletion, ProviderHttpRequest};
use crate::llm::options::ProviderKind;

/// Mistral speaks the OpenAI chat completions dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MistralAdapter;

impl ProviderAdapter for MistralAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ProviderHttpRequest {
        let mut body = chat_completions_body(request);
        body["safe_prompt"] = json!(false);

        ProviderHttpRequest {
            url: format!("{base_url}/chat/completions"),
            headers: vec![("authorization", format!("Bearer {api_key}"))],
            body,
        }
    }

    fn parse_response(&self, payload: &Value) -> Result<ProviderCompletion, &'static str> {
        parse_chat_completion(payload)
    }
}
