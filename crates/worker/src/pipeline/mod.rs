use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Value, json};
use shared::config::{PipelineConfig, RuntimeEnvironment};
use shared::fallback;
use shared::llm::{
    GatewayError, GatewayResponse, ProviderKind, ProviderRequestOptions, TemplateGateway,
    TemplateParams, TemplateRegistry, TemplateType, parse_activity_items,
};
use shared::models::{CombinationKey, PlaceRecord, RecordOrigin, UpsertPolicy};
use shared::repos::{RecordSink, StoreError};
use shared::telemetry::{LogCategory, LogContext, TelemetrySink};
use thiserror::Error;
use tracing::{debug, info};

mod stats;
mod trending;

pub(crate) use stats::{CombinationOutcome, PipelineRunStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Research,
    Structuring,
    Storing,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Structuring => "structuring",
            Self::Storing => "storing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombinationState {
    Pending,
    Researching,
    Structuring,
    Storing,
    Stored,
    Failed { stage: Stage },
    Skipped,
}

impl CombinationState {
    fn outcome(self) -> Option<CombinationOutcome> {
        match self {
            Self::Stored => Some(CombinationOutcome::Successful),
            Self::Failed { .. } => Some(CombinationOutcome::Failed),
            Self::Skipped => Some(CombinationOutcome::Skipped),
            Self::Pending | Self::Researching | Self::Structuring | Self::Storing => None,
        }
    }
}

#[derive(Debug, Error)]
enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Final state of one combination after a run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CombinationReport {
    pub(crate) key: CombinationKey,
    pub(crate) state: CombinationState,
    pub(crate) origin: Option<RecordOrigin>,
    pub(crate) records_written: usize,
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct PipelineReport {
    pub(crate) stats: PipelineRunStats,
    pub(crate) combinations: Vec<CombinationReport>,
}

#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub(crate) environment: RuntimeEnvironment,
    pub(crate) upsert_policy: UpsertPolicy,
    pub(crate) provider: Option<ProviderKind>,
    pub(crate) records_per_combination: usize,
    pub(crate) trending_limit: usize,
    pub(crate) production_fallback: bool,
}

impl PipelineSettings {
    pub(crate) fn from_config(config: &PipelineConfig) -> Self {
        Self {
            environment: config.environment,
            upsert_policy: config.upsert_policy,
            provider: config.provider,
            records_per_combination: config.records_per_combination,
            trending_limit: config.trending_limit,
            production_fallback: config.production_fallback,
        }
    }

    fn fallback_allowed(&self) -> bool {
        !self.environment.is_production() || self.production_fallback
    }
}

/// Result of asking the gateway for one stage.
enum StageCall {
    Live(GatewayResponse),
    Fallback,
    Failed(GatewayError),
}

/// Runs the research → structuring → persist flow over a location × interest
/// grid, one combination at a time.
pub(crate) struct PipelineDriver<'a> {
    gateway: &'a dyn TemplateGateway,
    registry: &'a TemplateRegistry,
    sink: &'a dyn RecordSink,
    telemetry: &'a TelemetrySink,
    settings: PipelineSettings,
}

impl<'a> PipelineDriver<'a> {
    pub(crate) fn new(
        gateway: &'a dyn TemplateGateway,
        registry: &'a TemplateRegistry,
        sink: &'a dyn RecordSink,
        telemetry: &'a TelemetrySink,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gateway,
            registry,
            sink,
            telemetry,
            settings,
        }
    }

    pub(crate) async fn run(&self, locations: &[String], interests: &[String]) -> PipelineReport {
        let mut stats = PipelineRunStats::new(self.telemetry.now());
        let mut combinations = Vec::with_capacity(locations.len() * interests.len());
        let mut candidates: BTreeMap<String, Vec<PlaceRecord>> = BTreeMap::new();

        self.telemetry
            .info(
                LogCategory::Pipeline,
                "pipeline run started",
                LogContext::default().with_tag("pipeline").with_data(json!({
                    "locations": locations,
                    "interests": interests,
                    "upsert_policy": self.settings.upsert_policy.as_str(),
                    "environment": self.settings.environment.as_str(),
                })),
            )
            .await;

        for location in locations {
            for interest in interests {
                let key = CombinationKey::new(location.trim(), interest.trim());
                let (report, records) = self.process_combination(key, &mut stats).await;
                if let Some(outcome) = report.state.outcome() {
                    stats.record(&report.key, outcome);
                }
                if !records.is_empty() {
                    candidates
                        .entry(report.key.location.clone())
                        .or_default()
                        .extend(records);
                }
                combinations.push(report);
            }
        }

        for (location, records) in &candidates {
            self.refresh_trending(location, records, &mut stats).await;
        }

        stats.finish(self.telemetry.now());
        self.log_summary(&stats).await;

        PipelineReport {
            stats,
            combinations,
        }
    }

    async fn process_combination(
        &self,
        key: CombinationKey,
        stats: &mut PipelineRunStats,
    ) -> (CombinationReport, Vec<PlaceRecord>) {
        let mut state = CombinationState::Pending;
        let context = LogContext::default()
            .with_tags(["pipeline", "combination"])
            .with_data(json!({ "combination": key.to_string() }));
        let timer = self
            .telemetry
            .start_timer(
                LogCategory::Pipeline,
                format!("combination {key}"),
                context.clone(),
            )
            .await;

        let result = self.run_stages(&key, &mut state, stats).await;
        match result {
            Ok(records) => {
                let origin = records.first().map(|record| record.origin);
                let records_written = if matches!(state, CombinationState::Stored) {
                    records.len()
                } else {
                    0
                };
                stats.records_written += records_written;
                timer
                    .finish_with(json!({
                        "combination": key.to_string(),
                        "state": format!("{state:?}"),
                        "outcome": if records_written > 0 { "stored" } else { "skipped" },
                        "records": records_written,
                        "origin": origin.map(RecordOrigin::as_str),
                    }))
                    .await;

                (
                    CombinationReport {
                        key,
                        state,
                        origin,
                        records_written,
                        error: None,
                    },
                    records,
                )
            }
            Err(err) => {
                let stage = match state {
                    CombinationState::Structuring => Stage::Structuring,
                    CombinationState::Storing => Stage::Storing,
                    _ => Stage::Research,
                };
                self.transition(&key, &mut state, CombinationState::Failed { stage });
                let message = err.to_string();
                self.telemetry
                    .error(
                        LogCategory::Pipeline,
                        format!("combination {key} failed during {stage}"),
                        context.with_data(failure_payload(&key, stage, &err)),
                    )
                    .await;
                timer
                    .finish_with(json!({
                        "combination": key.to_string(),
                        "state": format!("{state:?}"),
                        "outcome": "failed",
                        "stage": stage.as_str(),
                    }))
                    .await;

                (
                    CombinationReport {
                        key,
                        state,
                        origin: None,
                        records_written: 0,
                        error: Some(message),
                    },
                    Vec::new(),
                )
            }
        }
    }

    async fn run_stages(
        &self,
        key: &CombinationKey,
        state: &mut CombinationState,
        stats: &mut PipelineRunStats,
    ) -> Result<Vec<PlaceRecord>, StageError> {
        self.transition(key, state, CombinationState::Researching);
        let research = match self
            .call_stage(TemplateType::LocationResearch, &research_params(key), key)
            .await
        {
            StageCall::Live(response) => response.text,
            StageCall::Fallback => {
                stats.research_fallbacks += 1;
                fallback::research_text(key)
            }
            StageCall::Failed(err) => return Err(err.into()),
        };

        self.transition(key, state, CombinationState::Structuring);
        let count = self.settings.records_per_combination;
        let generated_at = self.telemetry.now();
        let params = structuring_params(key, count, &research);
        let records = match self
            .call_stage(TemplateType::ActivityStructuring, &params, key)
            .await
        {
            StageCall::Live(response) => response
                .parsed
                .as_ref()
                .map(parse_activity_items)
                .unwrap_or_default()
                .into_iter()
                .take(count)
                .map(|item| item.into_record(key, RecordOrigin::ModelOutput, generated_at))
                .collect::<Vec<_>>(),
            StageCall::Fallback => {
                stats.structuring_fallbacks += 1;
                fallback::activity_records(key, count, generated_at)
            }
            StageCall::Failed(err) => return Err(err.into()),
        };

        if records.is_empty() {
            self.transition(key, state, CombinationState::Skipped);
            self.telemetry
                .warn(
                    LogCategory::Pipeline,
                    format!("combination {key} produced no records"),
                    LogContext::default()
                        .with_tag("pipeline")
                        .with_data(json!({ "combination": key.to_string() })),
                )
                .await;
            return Ok(Vec::new());
        }

        self.transition(key, state, CombinationState::Storing);
        let written = self
            .sink
            .upsert_batch(key, &records, self.settings.upsert_policy)
            .await?;
        self.telemetry
            .debug(
                LogCategory::Persistence,
                format!("stored {written} records for {key}"),
                LogContext::default().with_tag("pipeline").with_data(json!({
                    "combination": key.to_string(),
                    "written": written,
                    "policy": self.settings.upsert_policy.as_str(),
                })),
            )
            .await;
        self.transition(key, state, CombinationState::Stored);

        Ok(records)
    }

    /// Calls the gateway for one stage and applies the fallback rules.
    ///
    /// Outside production, a missing credential or a failed call yields
    /// generated content. In production the error is returned unless
    /// production fallback is enabled.
    async fn call_stage(
        &self,
        template_type: TemplateType,
        params: &TemplateParams,
        subject: &dyn fmt::Display,
    ) -> StageCall {
        let options = self.request_options(template_type);

        if !self.gateway.credential_available(&options) {
            if self.settings.fallback_allowed() {
                self.telemetry
                    .warn(
                        LogCategory::Llm,
                        format!(
                            "no provider credential for {}; using generated content for {subject}",
                            template_type.as_str()
                        ),
                        LogContext::default().with_tags(["pipeline", "fallback"]),
                    )
                    .await;
                return StageCall::Fallback;
            }

            let provider = options.provider.unwrap_or(ProviderKind::PRIORITY[0]);
            return StageCall::Failed(GatewayError::CredentialMissing(provider));
        }

        match self
            .gateway
            .process_registered(self.registry, template_type, params, &options)
            .await
        {
            Ok(response) => StageCall::Live(response),
            Err(err) if self.settings.fallback_allowed() => {
                self.telemetry
                    .warn(
                        LogCategory::Llm,
                        format!(
                            "{} call failed; using generated content for {subject}",
                            template_type.as_str()
                        ),
                        LogContext::default()
                            .with_tags(["pipeline", "fallback"])
                            .with_data(json!({ "error": err.to_string() })),
                    )
                    .await;
                StageCall::Fallback
            }
            Err(err) => StageCall::Failed(err),
        }
    }

    fn request_options(&self, template_type: TemplateType) -> ProviderRequestOptions {
        let options = ProviderRequestOptions::default()
            .with_tag("pipeline")
            .with_tag(template_type.as_str());
        match self.settings.provider {
            Some(provider) => options.with_provider(provider),
            None => options,
        }
    }

    fn transition(
        &self,
        key: &CombinationKey,
        state: &mut CombinationState,
        next: CombinationState,
    ) {
        debug!(combination = %key, from = ?state, to = ?next, "combination state changed");
        *state = next;
    }

    async fn log_summary(&self, stats: &PipelineRunStats) {
        info!(
            attempted = stats.attempted,
            successful = stats.successful,
            failed = stats.failed,
            skipped = stats.skipped,
            records_written = stats.records_written,
            trending_written = stats.trending_written,
            duration_ms = stats.duration_ms(),
            success_rate = stats.success_rate(),
            "pipeline run metrics"
        );

        let data = serde_json::to_value(stats).unwrap_or(Value::Null);
        self.telemetry
            .info(
                LogCategory::Pipeline,
                "pipeline run summary",
                LogContext::default()
                    .with_tag("pipeline")
                    .with_data(json!({
                        "stats": data,
                        "success_rate": stats.success_rate(),
                    }))
                    .with_duration(std::time::Duration::from_millis(
                        u64::try_from(stats.duration_ms()).unwrap_or(0),
                    )),
            )
            .await;
    }
}

fn research_params(key: &CombinationKey) -> TemplateParams {
    let mut params = TemplateParams::new();
    params.insert("location".to_string(), json!(key.location));
    params.insert("interest".to_string(), json!(key.interest));
    params.insert("additional_context".to_string(), Value::Null);
    params
}

fn structuring_params(key: &CombinationKey, count: usize, research: &str) -> TemplateParams {
    let mut params = TemplateParams::new();
    params.insert("location".to_string(), json!(key.location));
    params.insert("interest".to_string(), json!(key.interest));
    params.insert("count".to_string(), json!(count));
    params.insert("research".to_string(), json!(research));
    params
}

fn failure_payload(key: &CombinationKey, stage: Stage, err: &StageError) -> Value {
    let mut payload = json!({
        "combination": key.to_string(),
        "location": key.location,
        "interest": key.interest,
        "stage": stage.as_str(),
        "error": err.to_string(),
    });

    if let StageError::Gateway(gateway_error) = err {
        payload["provider"] = json!(gateway_error.provider().map(ProviderKind::as_str));
        match gateway_error {
            GatewayError::InvalidResponse {
                template_id,
                raw_text,
                issues,
                ..
            } => {
                payload["template_id"] = json!(template_id);
                payload["raw_text"] = json!(raw_text);
                payload["issues"] = json!(issues);
            }
            GatewayError::ProviderCallFailed { status, reason, .. } => {
                payload["status"] = json!(status);
                payload["reason"] = json!(reason);
            }
            GatewayError::CredentialMissing(_) | GatewayError::Template(_) => {}
        }
    }

    payload
}
