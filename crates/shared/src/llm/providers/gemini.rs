use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    CompletionRequest, ProviderAdapter, ProviderCompletion, ProviderHttpRequest, usage_from,
};
use crate::llm::options::ProviderKind;
use crate::llm::templates::OutputFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn build_request(
        &self,
        base_url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> ProviderHttpRequest {
        let options = request.options;
        let mut generation_config = json!({
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens,
            "topP": options.top_p,
        });
        if request.output_format == OutputFormat::Json {
            generation_config["responseMimeType"] = json!("application/json");
        }

        ProviderHttpRequest {
            url: format!("{base_url}/models/{}:generateContent", options.model),
            headers: vec![("x-goog-api-key", api_key.to_string())],
            body: json!({
                "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
                "contents": [
                    { "role": "user", "parts": [{ "text": request.user_prompt }] }
                ],
                "generationConfig": generation_config,
            }),
        }
    }

    fn parse_response(&self, payload: &Value) -> Result<ProviderCompletion, &'static str> {
        let parsed = GenerateContentResponse::deserialize(payload)
            .map_err(|_| "response_shape_unrecognized")?;
        let candidate = parsed.candidates.into_iter().next().ok_or("missing_candidate")?;
        let content = candidate.content.ok_or("missing_content")?;
        let text = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderCompletion {
            text,
            model: parsed.model_version,
            usage: parsed.usage_metadata.map(|usage| {
                usage_from(
                    usage.prompt_token_count,
                    usage.candidates_token_count,
                    usage.total_token_count,
                )
            }),
            provider_request_id: parsed.response_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
    response_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::GeminiAdapter;
    use crate::llm::options::{ProviderKind, ProviderRequestOptions, SamplingDefaults};
    use crate::llm::providers::{CompletionRequest, ProviderAdapter};
    use crate::llm::templates::OutputFormat;

    #[test]
    fn model_is_part_of_the_url() {
        let options = ProviderRequestOptions::default().with_model("gemini-1.5-pro").resolve(
            ProviderKind::Gemini,
            "gemini-1.5-flash",
            &SamplingDefaults::default(),
        );
        let request = GeminiAdapter.build_request(
            "https://generativelanguage.googleapis.com/v1beta",
            "key",
            &CompletionRequest {
                system_prompt: "system",
                user_prompt: "user",
                output_format: OutputFormat::Json,
                options: &options,
            },
        );

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
        assert_eq!(
            request.body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn parse_reads_candidate_parts() {
        let completion = GeminiAdapter
            .parse_response(&json!({
                "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }],
                "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6 },
                "modelVersion": "gemini-1.5-flash-002"
            }))
            .expect("payload should parse");

        assert_eq!(completion.text, "{\"a\":1}");
        assert_eq!(completion.model.as_deref(), Some("gemini-1.5-flash-002"));
        assert_eq!(completion.usage.map(|usage| usage.prompt_tokens), Some(4));
    }

    #[test]
    fn parse_rejects_missing_candidates() {
        assert_eq!(
            GeminiAdapter.parse_response(&json!({ "candidates": [] })),
            Err("missing_candidate")
        );
    }
}
