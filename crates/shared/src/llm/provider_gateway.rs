use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use super::gateway::{GatewayError, GatewayFuture, GatewayResponse, TemplateGateway};
use super::options::{ProviderKind, ProviderRequestOptions};
use super::providers::{
    CompletionRequest, ProviderAdapter, ProviderCompletion, ProviderHttpRequest, adapter_for,
};
use super::templates::{PromptTemplate, TemplateParams, render};
use super::validation::{decode_response_text, response_value, validate, validate_structural};
use crate::config::{GatewayConfig, ProviderSettings};
use crate::telemetry::{LlmInteraction, LogCategory, LogContext, TelemetrySink};

const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "request-id"];

#[derive(Debug, Error)]
#[error("failed to build provider http client: {0}")]
pub struct GatewayInitError(String);

/// Single-attempt gateway over the configured providers.
///
/// Failures surface to the caller as typed errors; retry and fallback policy
/// belong to whoever calls `process_template`.
pub struct ProviderGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    slots: HashMap<ProviderKind, ProviderSlot>,
    telemetry: Arc<TelemetrySink>,
}

struct ProviderSlot {
    adapter: &'static dyn ProviderAdapter,
    settings: ProviderSettings,
}

impl ProviderSlot {
    fn api_key(&self) -> Option<&str> {
        self.settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }
}

impl ProviderGateway {
    pub fn new(
        config: GatewayConfig,
        telemetry: Arc<TelemetrySink>,
    ) -> Result<Self, GatewayInitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| GatewayInitError(err.to_string()))?;

        let slots = config
            .providers
            .iter()
            .map(|(kind, settings)| {
                (
                    *kind,
                    ProviderSlot {
                        adapter: adapter_for(*kind),
                        settings: settings.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            client,
            config,
            slots,
            telemetry,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Pinned provider if the caller named one, otherwise the first configured
    /// provider in priority order.
    fn resolve_provider(
        &self,
        options: &ProviderRequestOptions,
    ) -> Result<(ProviderKind, &ProviderSlot, &str), GatewayError> {
        let with_key = |kind: ProviderKind| {
            let slot = self.slots.get(&kind)?;
            let api_key = slot.api_key()?;
            Some((kind, slot, api_key))
        };

        match options.provider {
            Some(kind) => with_key(kind).ok_or(GatewayError::CredentialMissing(kind)),
            None => ProviderKind::PRIORITY
                .into_iter()
                .find_map(with_key)
                .ok_or(GatewayError::CredentialMissing(ProviderKind::PRIORITY[0])),
        }
    }

    async fn send(
        &self,
        provider: ProviderKind,
        adapter: &dyn ProviderAdapter,
        request: ProviderHttpRequest,
    ) -> Result<ProviderCompletion, GatewayError> {
        let call_failed = |status: Option<u16>, reason: String| GatewayError::ProviderCallFailed {
            provider,
            status,
            reason,
        };

        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                call_failed(None, "timeout".to_string())
            } else {
                call_failed(None, "request_unavailable".to_string())
            }
        })?;

        let status = response.status();
        let header_request_id = header_request_id(response.headers());
        let body = response.text().await.map_err(|_| {
            call_failed(
                Some(status.as_u16()),
                "response_body_read_failed".to_string(),
            )
        })?;

        if !status.is_success() {
            let provider_code = parse_provider_error_code(&body);
            return Err(call_failed(
                Some(status.as_u16()),
                format!("status={} code={provider_code}", status.as_u16()),
            ));
        }

        let payload = serde_json::from_str::<Value>(&body).map_err(|_| {
            call_failed(
                Some(status.as_u16()),
                "response_json_parse_failed".to_string(),
            )
        })?;
        let mut completion = adapter
            .parse_response(&payload)
            .map_err(|reason| call_failed(Some(status.as_u16()), reason.to_string()))?;
        completion.provider_request_id = header_request_id.or(completion.provider_request_id);

        Ok(completion)
    }

    fn check_response(
        &self,
        template: &PromptTemplate,
        text: &str,
        parsed: Option<&Value>,
    ) -> Vec<String> {
        let value = response_value(template.output_format, text, parsed);
        if !validate(value.as_ref(), &template.output_schema) {
            let issue = if template.output_format.is_structured() {
                format!("response is not valid {}", template.output_format.as_str())
            } else {
                "response is empty".to_string()
            };
            return vec![issue];
        }

        if self.config.structural_validation
            && template.output_format.is_structured()
            && let Some(value) = value.as_ref()
            && let Err(issues) = validate_structural(value, &template.output_schema)
        {
            return issues;
        }

        Vec::new()
    }
}

impl TemplateGateway for ProviderGateway {
    fn process_template<'a>(
        &'a self,
        template: &'a PromptTemplate,
        params: &'a TemplateParams,
        options: &'a ProviderRequestOptions,
    ) -> GatewayFuture<'a> {
        Box::pin(async move {
            let (provider, slot, api_key) = self.resolve_provider(options)?;
            let resolved =
                options.resolve(provider, &slot.settings.default_model, &self.config.defaults);
            let system_prompt = template.system_prompt_with_directive();
            let user_prompt = render(template, params);

            let timer = self
                .telemetry
                .start_timer(
                    LogCategory::Llm,
                    format!("{} via {}", template.id, provider.as_str()),
                    LogContext::default()
                        .with_tags(options.tags.iter().cloned())
                        .with_user_id(resolved.user_id.clone()),
                )
                .await;

            let request = slot.adapter.build_request(
                &slot.settings.base_url,
                api_key,
                &CompletionRequest {
                    system_prompt: &system_prompt,
                    user_prompt: &user_prompt,
                    output_format: template.output_format,
                    options: &resolved,
                },
            );
            let outcome = self.send(provider, slot.adapter, request).await;
            let latency = timer.elapsed();

            let completion = match outcome {
                Ok(completion) => completion,
                Err(err) => {
                    let message = err.to_string();
                    self.telemetry
                        .log_llm_interaction(LlmInteraction {
                            template_type: template.template_type.as_str(),
                            template_version: template.version,
                            provider: provider.as_str(),
                            model: &resolved.model,
                            system_prompt: &system_prompt,
                            user_prompt: &user_prompt,
                            response: None,
                            latency,
                            valid: false,
                            error: Some(&message),
                            prompt_tokens: None,
                            completion_tokens: None,
                            user_id: resolved.user_id.as_deref(),
                            tags: &resolved.tags,
                        })
                        .await;
                    timer
                        .finish_with(json!({ "outcome": "failed", "error": message }))
                        .await;
                    return Err(err);
                }
            };

            let parsed = decode_response_text(&completion.text);
            let issues = self.check_response(template, &completion.text, parsed.as_ref());
            let valid = issues.is_empty();
            let model = completion.model.clone().unwrap_or_else(|| resolved.model.clone());
            let error = (!valid).then(|| issues.join("; "));

            self.telemetry
                .log_llm_interaction(LlmInteraction {
                    template_type: template.template_type.as_str(),
                    template_version: template.version,
                    provider: provider.as_str(),
                    model: &model,
                    system_prompt: &system_prompt,
                    user_prompt: &user_prompt,
                    response: Some(&completion.text),
                    latency,
                    valid,
                    error: error.as_deref(),
                    prompt_tokens: completion.usage.map(|usage| usage.prompt_tokens),
                    completion_tokens: completion.usage.map(|usage| usage.completion_tokens),
                    user_id: resolved.user_id.as_deref(),
                    tags: &resolved.tags,
                })
                .await;

            if !valid {
                timer
                    .finish_with(json!({ "outcome": "invalid_response", "issues": issues }))
                    .await;
                return Err(GatewayError::InvalidResponse {
                    provider,
                    template_id: template.id,
                    raw_text: completion.text,
                    issues,
                });
            }

            timer
                .finish_with(json!({ "outcome": "succeeded", "model": model }))
                .await;

            Ok(GatewayResponse {
                provider,
                model,
                text: completion.text,
                parsed,
                usage: completion.usage,
                provider_request_id: completion.provider_request_id,
                latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            })
        })
    }

    fn credential_available(&self, options: &ProviderRequestOptions) -> bool {
        self.resolve_provider(options).is_ok()
    }
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    })
}

/// Error code from the provider's error envelope. OpenAI and Mistral use
/// `error.code`, Anthropic `error.type`, Gemini `error.status`.
fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
        #[serde(rename = "type")]
        kind: Option<Value>,
        status: Option<Value>,
    }

    let Some(details) = serde_json::from_str::<ProviderErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
    else {
        return "unknown".to_string();
    };

    [details.status, details.code, details.kind]
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            Value::String(code) if !code.is_empty() => Some(code),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_provider_error_code;

    #[test]
    fn provider_error_code_reads_each_envelope_shape() {
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":"rate_limit_exceeded"}}"#),
            "rate_limit_exceeded"
        );
        assert_eq!(
            parse_provider_error_code(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#
            ),
            "overloaded_error"
        );
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":400,"status":"INVALID_ARGUMENT"}}"#),
            "INVALID_ARGUMENT"
        );
        assert_eq!(parse_provider_error_code("<html>"), "unknown");
    }
}
