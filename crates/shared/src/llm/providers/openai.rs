use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    CompletionRequest, ProviderAdapter, ProviderCompletion, ProviderHttpRequest, usage_from,
};
use crate::llm::options::ProviderKind;
use crate::llm::templates::OutputFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ProviderHttpRequest {
        let mut body = chat_completions_body(request);
        let options = request.options;
        body["frequency_penalty"] = json!(options.frequency_penalty);
        body["presence_penalty"] = json!(options.presence_penalty);
        if let Some(user_id) = options.user_id.as_deref() {
            body["user"] = json!(user_id);
        }

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

/// Request body shared by OpenAI-compatible chat completion APIs.
pub(super) fn chat_completions_body(request: &CompletionRequest<'_>) -> Value {
    let options = request.options;
    let mut body = json!({
        "model": options.model,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_prompt }
        ],
        "temperature": options.temperature,
        "max_tokens": options.max_tokens,
        "top_p": options.top_p,
    });
    if request.output_format == OutputFormat::Json {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

pub(super) fn parse_chat_completion(payload: &Value) -> Result<ProviderCompletion, &'static str> {
    let parsed = ChatCompletionResponse::deserialize(payload)
        .map_err(|_| "response_shape_unrecognized")?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .ok_or("missing_choice")?
        .message
        .content
        .ok_or("missing_content")?;

    let text = match content {
        Value::String(text) => text,
        // Some compatible servers return content parts instead of a flat string.
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        value @ Value::Object(_) => value.to_string(),
        _ => return Err("unsupported_content_shape"),
    };

    Ok(ProviderCompletion {
        text,
        model: parsed.model,
        usage: parsed.usage.map(|usage| {
            usage_from(
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
            )
        }),
        provider_request_id: parsed.id,
    })
}
