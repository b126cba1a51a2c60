use std::sync::Arc;

use serde_json::{Value, json};

use super::cache::{DEFAULT_CACHE_TTL, ResponseCache, request_signature};
use super::contracts::{TemplateType, parse_activity_items};
use super::gateway::TemplateGateway;
use super::options::{ProviderKind, ProviderRequestOptions};
use super::templates::{TemplateParams, TemplateRegistry};
use crate::clock::SystemClock;
use crate::fallback;
use crate::models::{CombinationKey, PlaceRecord, RecordOrigin};
use crate::telemetry::{LogCategory, LogContext, TelemetrySink};

const DEFAULT_RECOMMENDATION_COUNT: usize = 5;
const MAX_RECOMMENDATION_COUNT: usize = 20;

#[derive(Debug, Clone)]
pub struct QuickRecommendationRequest {
    pub location: String,
    pub interest: String,
    pub count: usize,
    pub preferences: Option<String>,
    pub options: ProviderRequestOptions,
}

impl QuickRecommendationRequest {
    pub fn new(location: impl Into<String>, interest: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            interest: interest.into(),
            count: DEFAULT_RECOMMENDATION_COUNT,
            preferences: None,
            options: ProviderRequestOptions::default(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_preferences(mut self, preferences: impl Into<String>) -> Self {
        self.preferences = Some(preferences.into());
        self
    }

    pub fn with_options(mut self, options: ProviderRequestOptions) -> Self {
        self.options = options;
        self
    }

    fn bounded_count(&self) -> usize {
        self.count.clamp(1, MAX_RECOMMENDATION_COUNT)
    }

    fn template_params(&self, key: &CombinationKey) -> TemplateParams {
        let mut params = TemplateParams::new();
        params.insert("location".to_string(), json!(key.location));
        params.insert("interest".to_string(), json!(key.interest));
        params.insert("count".to_string(), json!(self.bounded_count()));
        params.insert(
            "preferences".to_string(),
            self.preferences
                .as_deref()
                .map(str::trim)
                .filter(|preferences| !preferences.is_empty())
                .map_or(Value::Null, |preferences| json!(preferences)),
        );
        params
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuickRecommendations {
    pub key: CombinationKey,
    pub records: Vec<PlaceRecord>,
    pub origin: RecordOrigin,
    pub provider: Option<ProviderKind>,
    pub cached: bool,
}

/// One-off recommendations for a single combination.
///
/// Never fails: gateway errors and unusable responses degrade to fallback
/// records. Only live results are cached.
pub struct InteractiveGenerator {
    gateway: Arc<dyn TemplateGateway>,
    registry: Arc<TemplateRegistry>,
    telemetry: Arc<TelemetrySink>,
    cache: ResponseCache<QuickRecommendations>,
}

impl InteractiveGenerator {
    pub fn new(
        gateway: Arc<dyn TemplateGateway>,
        registry: Arc<TemplateRegistry>,
        telemetry: Arc<TelemetrySink>,
    ) -> Self {
        Self::with_cache(
            gateway,
            registry,
            telemetry,
            ResponseCache::new(DEFAULT_CACHE_TTL, Arc::new(SystemClock)),
        )
    }

    pub fn with_cache(
        gateway: Arc<dyn TemplateGateway>,
        registry: Arc<TemplateRegistry>,
        telemetry: Arc<TelemetrySink>,
        cache: ResponseCache<QuickRecommendations>,
    ) -> Self {
        Self {
            gateway,
            registry,
            telemetry,
            cache,
        }
    }

    pub async fn recommend(&self, request: &QuickRecommendationRequest) -> QuickRecommendations {
        let key = CombinationKey::new(request.location.trim(), request.interest.trim());
        let params = request.template_params(&key);
        let signature =
            request_signature(TemplateType::QuickRecommendations, &params, &request.options);
        let context = LogContext::default()
            .with_tag("interactive")
            .with_user_id(request.options.user_id.clone())
            .with_data(json!({ "combination": key.to_string() }));

        if let Some(mut cached) = self.cache.get(&signature) {
            self.telemetry
                .debug(LogCategory::Cache, "interactive cache hit", context)
                .await;
            cached.cached = true;
            return cached;
        }
        self.telemetry
            .debug(LogCategory::Cache, "interactive cache miss", context.clone())
            .await;

        let count = request.bounded_count();
        let generated_at = self.telemetry.now();
        let outcome = self
            .gateway
            .process_registered(
                &self.registry,
                TemplateType::QuickRecommendations,
                &params,
                &request.options,
            )
            .await;

        let failure = match outcome {
            Ok(response) => {
                let items = response
                    .parsed
                    .as_ref()
                    .map(parse_activity_items)
                    .unwrap_or_default();
                if items.is_empty() {
                    format!("{} returned no usable activities", response.provider.as_str())
                } else {
                    let result = QuickRecommendations {
                        records: items
                            .into_iter()
                            .take(count)
                            .map(|item| item.into_record(&key, RecordOrigin::ModelOutput, generated_at))
                            .collect(),
                        key,
                        origin: RecordOrigin::ModelOutput,
                        provider: Some(response.provider),
                        cached: false,
                    };
                    self.cache.insert(signature, result.clone());
                    return result;
                }
            }
            Err(err) => err.to_string(),
        };

        self.telemetry
            .warn(
                LogCategory::Llm,
                "interactive recommendations fell back to generated content",
                context.with_data(json!({
                    "combination": key.to_string(),
                    "error": failure,
                })),
            )
            .await;

        QuickRecommendations {
            records: fallback::activity_records(&key, count, generated_at),
            key,
            origin: RecordOrigin::DeterministicFallback,
            provider: None,
            cached: false,
        }
    }
}
