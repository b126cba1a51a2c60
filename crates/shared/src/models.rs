use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombinationKey {
    pub location: String,
    pub interest: String,
}

impl CombinationKey {
    pub fn new(location: impl Into<String>, interest: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            interest: interest.into(),
        }
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.location, self.interest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    ModelOutput,
    DeterministicFallback,
}

impl RecordOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelOutput => "model_output",
            Self::DeterministicFallback => "deterministic_fallback",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "model_output" => Some(Self::ModelOutput),
            "deterministic_fallback" => Some(Self::DeterministicFallback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub location: String,
    pub interest: String,
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
    pub price_level: i16,
    pub popularity_score: f64,
    pub origin: RecordOrigin,
    pub generated_at: DateTime<Utc>,
}

impl PlaceRecord {
    pub fn key(&self) -> CombinationKey {
        CombinationKey::new(self.location.clone(), self.interest.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingPlace {
    pub location: String,
    pub rank: i32,
    pub name: String,
    pub reason: String,
    pub score: f64,
    pub origin: RecordOrigin,
    pub generated_at: DateTime<Utc>,
}

/// How a combination's batch is written when a previous batch already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertPolicy {
    /// Insert or update each record by `(location, interest, name)`. Names a
    /// later run no longer produces stay in place.
    #[default]
    Merge,
    /// Drop the combination's previous batch and write the new one atomically.
    ReplaceBatch,
}

impl UpsertPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::ReplaceBatch => "replace_batch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merge" | "upsert" => Some(Self::Merge),
            "replace" | "replace_batch" => Some(Self::ReplaceBatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBatch {
    pub location: String,
    pub interest: String,
    pub records: Vec<PlaceRecord>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTrending {
    pub location: String,
    pub places: Vec<TrendingPlace>,
    pub last_updated: DateTime<Utc>,
}
