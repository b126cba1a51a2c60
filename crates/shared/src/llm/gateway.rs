use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::contracts::TemplateType;
use super::options::{ProviderKind, ProviderRequestOptions};
use super::templates::{PromptTemplate, TemplateError, TemplateParams, TemplateRegistry};

pub type GatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub provider: ProviderKind,
    pub model: String,
    pub text: String,
    /// Present when the text decoded as JSON, whatever the declared format.
    pub parsed: Option<Value>,
    pub usage: Option<TokenUsage>,
    pub provider_request_id: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no credential configured for provider {}", .0.as_str())]
    CredentialMissing(ProviderKind),
    #[error("{} request failed: {reason}", .provider.as_str())]
    ProviderCallFailed {
        provider: ProviderKind,
        status: Option<u16>,
        reason: String,
    },
    #[error("{} response for {template_id} failed validation", .provider.as_str())]
    InvalidResponse {
        provider: ProviderKind,
        template_id: &'static str,
        raw_text: String,
        issues: Vec<String>,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl GatewayError {
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::CredentialMissing(provider)
            | Self::ProviderCallFailed { provider, .. }
            | Self::InvalidResponse { provider, .. } => Some(*provider),
            Self::Template(_) => None,
        }
    }
}

/// Renders a template, calls one provider and validates the reply.
pub trait TemplateGateway: Send + Sync {
    fn process_template<'a>(
        &'a self,
        template: &'a PromptTemplate,
        params: &'a TemplateParams,
        options: &'a ProviderRequestOptions,
    ) -> GatewayFuture<'a>;

    /// Whether `process_template` would find a credential for these options.
    fn credential_available(&self, options: &ProviderRequestOptions) -> bool;

    fn process_registered<'a>(
        &'a self,
        registry: &'a TemplateRegistry,
        template_type: TemplateType,
        params: &'a TemplateParams,
        options: &'a ProviderRequestOptions,
    ) -> GatewayFuture<'a> {
        match registry.get(template_type) {
            Ok(template) => self.process_template(template, params, options),
            Err(err) => Box::pin(async move { Err(GatewayError::from(err)) }),
        }
    }
}
