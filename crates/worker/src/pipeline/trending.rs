use serde_json::{Value, json};
use shared::fallback;
use shared::llm::{TemplateParams, TemplateType, parse_trending_items};
use shared::models::{PlaceRecord, RecordOrigin, TrendingPlace};
use shared::telemetry::{LogCategory, LogContext};

use super::{PipelineDriver, PipelineRunStats, StageCall};

impl PipelineDriver<'_> {
    /// Ranks this run's records for `location` and replaces its trending list.
    pub(super) async fn refresh_trending(
        &self,
        location: &str,
        candidates: &[PlaceRecord],
        stats: &mut PipelineRunStats,
    ) {
        let limit = self.settings.trending_limit;
        let generated_at = self.telemetry.now();
        let params = trending_params(location, candidates, limit);

        let places = match self
            .call_stage(TemplateType::TrendingAnalysis, &params, &location)
            .await
        {
            StageCall::Live(response) => {
                let places: Vec<TrendingPlace> = response
                    .parsed
                    .as_ref()
                    .map(parse_trending_items)
                    .unwrap_or_default()
                    .into_iter()
                    .take(limit)
                    .zip(1_i32..)
                    .map(|(item, rank)| {
                        item.into_place(location, rank, RecordOrigin::ModelOutput, generated_at)
                    })
                    .collect();
                if places.is_empty() && self.settings.fallback_allowed() {
                    stats.trending_fallbacks += 1;
                    fallback::trending_places(location, candidates, limit, generated_at)
                } else {
                    places
                }
            }
            StageCall::Fallback => {
                stats.trending_fallbacks += 1;
                fallback::trending_places(location, candidates, limit, generated_at)
            }
            StageCall::Failed(err) => {
                stats.trending_failures += 1;
                self.telemetry
                    .error(
                        LogCategory::Pipeline,
                        format!("trending analysis for {location} failed"),
                        LogContext::default().with_tag("trending").with_data(json!({
                            "location": location,
                            "error": err.to_string(),
                            "provider": err.provider().map(|provider| provider.as_str()),
                        })),
                    )
                    .await;
                return;
            }
        };

        if places.is_empty() {
            self.telemetry
                .warn(
                    LogCategory::Pipeline,
                    format!("trending analysis for {location} returned no places"),
                    LogContext::default().with_tag("trending"),
                )
                .await;
            return;
        }

        match self.sink.replace_trending(location, &places).await {
            Ok(written) => {
                stats.trending_written += written;
                self.telemetry
                    .info(
                        LogCategory::Persistence,
                        format!("stored {written} trending places for {location}"),
                        LogContext::default().with_tag("trending"),
                    )
                    .await;
            }
            Err(err) => {
                stats.trending_failures += 1;
                self.telemetry
                    .error(
                        LogCategory::Persistence,
                        format!("storing trending places for {location} failed"),
                        LogContext::default()
                            .with_tag("trending")
                            .with_data(json!({ "location": location, "error": err.to_string() })),
                    )
                    .await;
            }
        }
    }
}

fn trending_params(location: &str, candidates: &[PlaceRecord], limit: usize) -> TemplateParams {
    let candidates: Vec<Value> = candidates
        .iter()
        .map(|record| {
            json!({
                "name": record.name,
                "interest": record.interest,
                "category": record.category,
                "popularity_score": record.popularity_score,
            })
        })
        .collect();

    let mut params = TemplateParams::new();
    params.insert("location".to_string(), json!(location));
    params.insert("candidates".to_string(), Value::Array(candidates));
    params.insert("limit".to_string(), json!(limit));
    params
}
