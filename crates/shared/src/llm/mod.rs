pub mod cache;
pub mod contracts;
pub mod gateway;
pub mod interactive;
pub mod options;
pub mod provider_gateway;
pub mod providers;
pub mod templates;
pub mod validation;

pub use cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, ResponseCache, request_signature};
pub use contracts::{
    ActivityBatchContract, ActivityItem, TEMPLATE_VERSION_V1, TemplateType, TrendingContract,
    TrendingItem, output_schema, parse_activity_items, parse_trending_items,
};
pub use gateway::{GatewayError, GatewayFuture, GatewayResponse, TemplateGateway, TokenUsage};
pub use interactive::{InteractiveGenerator, QuickRecommendationRequest, QuickRecommendations};
pub use options::{ProviderKind, ProviderRequestOptions, ResolvedOptions, SamplingDefaults};
pub use provider_gateway::{GatewayInitError, ProviderGateway};
pub use templates::{
    OutputFormat, PromptTemplate, TemplateError, TemplateParams, TemplateRegistry, format_directive,
    render, render_strict,
};
pub use validation::{decode_response_text, validate, validate_structural};
