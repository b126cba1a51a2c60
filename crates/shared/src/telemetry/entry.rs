use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeEnvironment;

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [Self; 4] = [Self::Debug, Self::Info, Self::Warn, Self::Error];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// How long the keyed store keeps an entry of this level.
    pub const fn retention(self) -> Duration {
        let days = match self {
            Self::Debug => 3,
            Self::Info => 7,
            Self::Warn => 30,
            Self::Error => 90,
        };
        Duration::from_secs(days * SECONDS_PER_DAY)
    }

    pub const fn default_minimum(environment: RuntimeEnvironment) -> Self {
        if environment.is_production() {
            Self::Info
        } else {
            Self::Debug
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Llm,
    Api,
    Pipeline,
    Persistence,
    Cache,
    System,
}

impl LogCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Api => "api",
            Self::Pipeline => "pipeline",
            Self::Persistence => "persistence",
            Self::Cache => "cache",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Optional fields attached to a single `log` call.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub data: Option<Value>,
    pub tags: Vec<String>,
    pub user_id: Option<String>,
    pub duration: Option<Duration>,
}

impl LogContext {
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::LogLevel;
    use crate::config::RuntimeEnvironment;

    #[test]
    fn retention_grows_with_severity() {
        let days = LogLevel::ALL
            .iter()
            .map(|level| level.retention().as_secs() / 86_400)
            .collect::<Vec<_>>();
        assert_eq!(days, vec![3, 7, 30, 90]);
    }

    #[test]
    fn minimum_level_is_info_only_in_production() {
        assert_eq!(
            LogLevel::default_minimum(RuntimeEnvironment::Production),
            LogLevel::Info
        );
        assert_eq!(
            LogLevel::default_minimum(RuntimeEnvironment::Staging),
            LogLevel::Debug
        );
        assert!(LogLevel::Debug < LogLevel::Info && LogLevel::Warn < LogLevel::Error);
    }
}
