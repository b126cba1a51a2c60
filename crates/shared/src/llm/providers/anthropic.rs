use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    CompletionRequest, ProviderAdapter, ProviderCompletion, ProviderHttpRequest, usage_from,
};
use crate::llm::options::ProviderKind;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ProviderHttpRequest {
        let options = request.options;
        let mut body = json!({
            "model": options.model,
            "system": request.system_prompt,
            "messages": [
                { "role": "user", "content": request.user_prompt }
            ],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "top_p": options.top_p,
        });
        if let Some(user_id) = options.user_id.as_deref() {
            body["metadata"] = json!({ "user_id": user_id });
        }

        ProviderHttpRequest {
            url: format!("{base_url}/messages"),
            headers: vec![
                ("x-api-key", api_key.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, payload: &Value) -> Result<ProviderCompletion, &'static str> {
        let parsed =
            MessagesResponse::deserialize(payload).map_err(|_| "response_shape_unrecognized")?;
        let text = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if parsed.content.is_empty() {
            return Err("missing_content");
        }

        Ok(ProviderCompletion {
            text,
            model: parsed.model,
            usage: parsed
                .usage
                .map(|usage| usage_from(usage.input_tokens, usage.output_tokens, None)),
            provider_request_id: parsed.id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
