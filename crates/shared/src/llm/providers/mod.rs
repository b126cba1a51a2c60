//! Per-provider wire formats. Adapters only translate; the gateway owns the HTTP call.

mod anthropic;
mod gemini;
mod mistral;
mod openai;

use serde_json::Value;

use super::gateway::TokenUsage;
use super::options::{ProviderKind, ResolvedOptions};
use super::templates::OutputFormat;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use mistral::MistralAdapter;
pub use openai::OpenAiAdapter;

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHttpRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCompletion {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub provider_request_id: Option<String>,
}

pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub output_format: OutputFormat,
    pub options: &'a ResolvedOptions,
}

pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ProviderHttpRequest;

    /// Extracts the completion text. The error is a short reason code.
    fn parse_response(&self, payload: &Value) -> Result<ProviderCompletion, &'static str>;
}

static OPENAI: OpenAiAdapter = OpenAiAdapter;
static ANTHROPIC: AnthropicAdapter = AnthropicAdapter;
static GEMINI: GeminiAdapter = GeminiAdapter;
static MISTRAL: MistralAdapter = MistralAdapter;

pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProviderAdapter {
    match kind {
        ProviderKind::OpenAi => &OPENAI,
        ProviderKind::Anthropic => &ANTHROPIC,
        ProviderKind::Gemini => &GEMINI,
        ProviderKind::Mistral => &MISTRAL,
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

fn usage_from(prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> TokenUsage {
    let prompt_tokens = clamp_u64_to_u32(prompt.unwrap_or(0));
    let completion_tokens = clamp_u64_to_u32(completion.unwrap_or(0));
    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: total
            .map(clamp_u64_to_u32)
            .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens)),
    }
}
