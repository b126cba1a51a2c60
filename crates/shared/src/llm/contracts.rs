use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::models::{CombinationKey, PlaceRecord, RecordOrigin, TrendingPlace};

pub const TEMPLATE_VERSION_V1: &str = "2026-03-01";

const MIN_PRICE_LEVEL: i16 = 1;
const MAX_PRICE_LEVEL: i16 = 4;
const MAX_POPULARITY_SCORE: f64 = 100.0;
const BATCH_ARRAY_KEYS: &[&str] = &["activities", "items", "places", "results"];
const TRENDING_ARRAY_KEYS: &[&str] = &["trending", "items", "places"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    LocationResearch,
    ActivityStructuring,
    TrendingAnalysis,
    QuickRecommendations,
}

impl TemplateType {
    pub const ALL: [Self; 4] = [
        Self::LocationResearch,
        Self::ActivityStructuring,
        Self::TrendingAnalysis,
        Self::QuickRecommendations,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocationResearch => "location_research",
            Self::ActivityStructuring => "activity_structuring",
            Self::TrendingAnalysis => "trending_analysis",
            Self::QuickRecommendations => "quick_recommendations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActivityItem {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_price_level")]
    pub price_level: i16,
    #[serde(default)]
    pub popularity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActivityBatchContract {
    pub activities: Vec<ActivityItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendingItem {
    pub name: String,
    pub reason: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrendingContract {
    pub trending: Vec<TrendingItem>,
}

impl ActivityItem {
    pub fn into_record(
        self,
        key: &CombinationKey,
        origin: RecordOrigin,
        generated_at: DateTime<Utc>,
    ) -> PlaceRecord {
        PlaceRecord {
            location: key.location.clone(),
            interest: key.interest.clone(),
            name: self.name,
            description: self.description,
            category: self.category,
            tags: self.tags,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            price_level: self.price_level,
            popularity_score: self.popularity_score,
            origin,
            generated_at,
        }
    }
}

impl TrendingItem {
    pub fn into_place(
        self,
        location: &str,
        rank: i32,
        origin: RecordOrigin,
        generated_at: DateTime<Utc>,
    ) -> TrendingPlace {
        TrendingPlace {
            location: location.to_string(),
            rank,
            name: self.name,
            reason: self.reason,
            score: self.score,
            origin,
            generated_at,
        }
    }
}

fn default_price_level() -> i16 {
    2
}

pub fn output_schema(template_type: TemplateType) -> Value {
    let schema = match template_type {
        TemplateType::LocationResearch => return json!({ "type": "string", "minLength": 1 }),
        TemplateType::ActivityStructuring | TemplateType::QuickRecommendations => {
            serde_json::to_value(schema_for!(ActivityBatchContract))
        }
        TemplateType::TrendingAnalysis => serde_json::to_value(schema_for!(TrendingContract)),
    };

    schema.unwrap_or_else(|_| json!({ "type": "object" }))
}

/// Pulls activity items out of a decoded provider response.
///
/// Providers wrap the array differently (bare array, `activities`, `items`),
/// so any of those shapes is accepted. Items that fail to deserialize are
/// dropped, names are trimmed and de-duplicated case-insensitively, and numeric
/// attributes are clamped into range.
pub fn parse_activity_items(payload: &Value) -> Vec<ActivityItem> {
    let mut seen = HashSet::new();
    extract_array(payload, BATCH_ARRAY_KEYS)
        .iter()
        .filter_map(|item| match serde_json::from_value::<ActivityItem>(item.clone()) {
            Ok(item) => Some(item),
            Err(err) => {
                debug!("dropping malformed activity item: {err}");
                None
            }
        })
        .filter_map(normalize_activity)
        .filter(|item| seen.insert(item.name.to_lowercase()))
        .collect()
}

pub fn parse_trending_items(payload: &Value) -> Vec<TrendingItem> {
    let mut seen = HashSet::new();
    extract_array(payload, TRENDING_ARRAY_KEYS)
        .iter()
        .filter_map(|item| serde_json::from_value::<TrendingItem>(item.clone()).ok())
        .filter_map(|mut item| {
            item.name = item.name.trim().to_string();
            if item.name.is_empty() {
                return None;
            }
            item.score = clamp_score(item.score);
            Some(item)
        })
        .filter(|item| seen.insert(item.name.to_lowercase()))
        .collect()
}

fn extract_array<'a>(payload: &'a Value, keys: &[&str]) -> &'a [Value] {
    match payload {
        Value::Array(items) => items,
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    }
}

fn normalize_activity(mut item: ActivityItem) -> Option<ActivityItem> {
    item.name = item.name.trim().to_string();
    if item.name.is_empty() {
        return None;
    }
    item.description = item.description.trim().to_string();
    item.category = item.category.trim().to_string();
    item.tags = item
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    item.address = item
        .address
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty());
    item.latitude = item.latitude.filter(|lat| lat.is_finite() && lat.abs() <= 90.0);
    item.longitude = item.longitude.filter(|lng| lng.is_finite() && lng.abs() <= 180.0);
    item.price_level = item.price_level.clamp(MIN_PRICE_LEVEL, MAX_PRICE_LEVEL);
    item.popularity_score = clamp_score(item.popularity_score);
    Some(item)
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, MAX_POPULARITY_SCORE)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{TemplateType, output_schema, parse_activity_items, parse_trending_items};

    #[test]
    fn parses_wrapped_and_bare_arrays() {
        let wrapped = json!({
            "activities": [
                { "name": "Verve Coffee", "description": "Roastery", "category": "cafe" }
            ]
        });
        let bare = json!([
            { "name": "Verve Coffee", "description": "Roastery", "category": "cafe" }
        ]);

        assert_eq!(parse_activity_items(&wrapped).len(), 1);
        assert_eq!(parse_activity_items(&bare).len(), 1);
        assert!(parse_activity_items(&json!("prose")).is_empty());
    }

    #[test]
    fn drops_malformed_and_duplicate_items_and_clamps_attributes() {
        let payload = json!({
            "items": [
                { "name": "  Blue Bottle ", "description": "Pour over", "category": "cafe",
                  "price_level": 9, "popularity_score": 180.5, "latitude": 123.0 },
                { "name": "blue bottle", "description": "dupe", "category": "cafe" },
                { "description": "missing name", "category": "cafe" },
                { "name": "   ", "description": "blank", "category": "cafe" }
            ]
        });

        let items = parse_activity_items(&payload);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.name, "Blue Bottle");
        assert_eq!(item.price_level, 4);
        assert!((item.popularity_score - 100.0).abs() < f64::EPSILON);
        assert_eq!(item.latitude, None);
    }

    #[test]
    fn trending_items_accept_wrapped_shape() {
        let payload = json!({
            "trending": [
                { "name": "Grand Central Market", "reason": "Food hall buzz", "score": 91.0 },
                { "name": "", "reason": "blank" }
            ]
        });
        let items = parse_trending_items(&payload);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Grand Central Market");
    }

    #[test]
    fn every_template_type_has_an_output_schema() {
        for template_type in TemplateType::ALL {
            assert!(output_schema(template_type).is_object());
        }
    }
}
