use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_bool_env, parse_f32_env, parse_list_env, parse_u32_env,
    parse_u64_env, parse_usize_env, require_http_url,
};
use crate::llm::{ProviderKind, SamplingDefaults};
use crate::models::UpsertPolicy;
use crate::telemetry::LogLevel;

const DEFAULT_LOCATIONS: &[&str] = &[
    "Los Angeles",
    "New York",
    "San Francisco",
    "Chicago",
    "Miami",
    "Seattle",
];
const DEFAULT_INTERESTS: &[&str] = &[
    "Coffee",
    "Food",
    "Art",
    "Hiking",
    "Nightlife",
    "Museums",
    "Shopping",
];
const DEFAULT_OUTPUT_DIR: &str = "data/generated";
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RECORDS_PER_COMBINATION: usize = 5;
const DEFAULT_TRENDING_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid number in env var {0}")]
    ParseFloat(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::InvalidConfiguration(format!(
            "failed to load .env file: {err}"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    Development,
    Test,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn from_env() -> Result<Self, ConfigError> {
        match optional_trimmed_env("APP_ENV") {
            Some(raw) => Self::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "APP_ENV must be one of development, test, staging, production (got '{raw}')"
                ))
            }),
            None => Ok(Self::Development),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Some(Self::Development),
            "test" => Some(Self::Test),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
}

impl ProviderSettings {
    pub fn for_kind(kind: ProviderKind, api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: kind.default_base_url().to_string(),
            default_model: kind.default_model().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub providers: HashMap<ProviderKind, ProviderSettings>,
    pub timeout_ms: u64,
    pub defaults: SamplingDefaults,
    pub structural_validation: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: ProviderKind::PRIORITY
                .into_iter()
                .map(|kind| (kind, ProviderSettings::for_kind(kind, None)))
                .collect(),
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            defaults: SamplingDefaults::default(),
            structural_validation: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut providers = HashMap::new();
        for kind in ProviderKind::PRIORITY {
            let prefix = kind.env_prefix();
            let base_url = match optional_trimmed_env(&format!("{prefix}_BASE_URL")) {
                Some(raw) => require_http_url(&format!("{prefix}_BASE_URL"), raw)?,
                None => kind.default_base_url().to_string(),
            };
            providers.insert(
                kind,
                ProviderSettings {
                    api_key: optional_trimmed_env(kind.credential_env_var()),
                    base_url,
                    default_model: optional_trimmed_env(&format!("{prefix}_MODEL"))
                        .unwrap_or_else(|| kind.default_model().to_string()),
                },
            );
        }

        let fallback_defaults = SamplingDefaults::default();
        let defaults = SamplingDefaults {
            temperature: parse_f32_env("LLM_DEFAULT_TEMPERATURE", fallback_defaults.temperature)?,
            max_tokens: parse_u32_env("LLM_DEFAULT_MAX_TOKENS", fallback_defaults.max_tokens)?,
            top_p: parse_f32_env("LLM_DEFAULT_TOP_P", fallback_defaults.top_p)?,
            frequency_penalty: parse_f32_env(
                "LLM_DEFAULT_FREQUENCY_PENALTY",
                fallback_defaults.frequency_penalty,
            )?,
            presence_penalty: parse_f32_env(
                "LLM_DEFAULT_PRESENCE_PENALTY",
                fallback_defaults.presence_penalty,
            )?,
        };

        let timeout_ms = parse_u64_env("LLM_PROVIDER_TIMEOUT_MS", DEFAULT_PROVIDER_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "LLM_PROVIDER_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            providers,
            timeout_ms,
            defaults,
            structural_validation: parse_bool_env("LLM_STRUCTURAL_VALIDATION", false)?,
        })
    }

    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::PRIORITY
            .into_iter()
            .filter(|kind| {
                self.providers
                    .get(kind)
                    .is_some_and(|settings| settings.api_key.is_some())
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub environment: RuntimeEnvironment,
    pub min_level: LogLevel,
    pub redis_url: Option<String>,
    pub archive_dir: Option<PathBuf>,
}

impl TelemetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = RuntimeEnvironment::from_env()?;
        let min_level = match optional_trimmed_env("LOG_MIN_LEVEL") {
            Some(raw) => LogLevel::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "LOG_MIN_LEVEL must be one of debug, info, warn, error (got '{raw}')"
                ))
            })?,
            None => LogLevel::default_minimum(environment),
        };

        Ok(Self {
            environment,
            min_level,
            redis_url: optional_trimmed_env("REDIS_URL"),
            archive_dir: optional_trimmed_env("LOG_ARCHIVE_DIR").map(PathBuf::from),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: RuntimeEnvironment,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub migrations_dir: PathBuf,
    pub output_dir: PathBuf,
    pub locations: Vec<String>,
    pub interests: Vec<String>,
    pub schedule_seconds: Option<u64>,
    pub upsert_policy: UpsertPolicy,
    pub provider: Option<ProviderKind>,
    pub records_per_combination: usize,
    pub trending_limit: usize,
    pub production_fallback: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let upsert_policy = match optional_trimmed_env("PIPELINE_UPSERT_POLICY") {
            Some(raw) => UpsertPolicy::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "PIPELINE_UPSERT_POLICY must be merge or replace_batch (got '{raw}')"
                ))
            })?,
            None => UpsertPolicy::default(),
        };

        let provider = match optional_trimmed_env("PIPELINE_PROVIDER") {
            Some(raw) => Some(ProviderKind::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "PIPELINE_PROVIDER must be one of openai, anthropic, gemini, mistral (got '{raw}')"
                ))
            })?),
            None => None,
        };

        let schedule_seconds = match optional_trimmed_env("PIPELINE_SCHEDULE_SECONDS") {
            Some(_) => {
                let seconds = parse_u64_env("PIPELINE_SCHEDULE_SECONDS", 0)?;
                if seconds == 0 {
                    return Err(ConfigError::InvalidConfiguration(
                        "PIPELINE_SCHEDULE_SECONDS must be greater than 0".to_string(),
                    ));
                }
                Some(seconds)
            }
            None => None,
        };

        let records_per_combination = parse_usize_env(
            "PIPELINE_RECORDS_PER_COMBINATION",
            DEFAULT_RECORDS_PER_COMBINATION,
        )?;
        if records_per_combination == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "PIPELINE_RECORDS_PER_COMBINATION must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            environment: RuntimeEnvironment::from_env()?,
            database_url: optional_trimmed_env("DATABASE_URL"),
            database_max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 5)?,
            migrations_dir: optional_trimmed_env("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../db/migrations")
                }),
            output_dir: optional_trimmed_env("PIPELINE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            locations: parse_list_env("PIPELINE_LOCATIONS", DEFAULT_LOCATIONS),
            interests: parse_list_env("PIPELINE_INTERESTS", DEFAULT_INTERESTS),
            schedule_seconds,
            upsert_policy,
            provider,
            records_per_combination,
            trending_limit: parse_usize_env("PIPELINE_TRENDING_LIMIT", DEFAULT_TRENDING_LIMIT)?,
            production_fallback: parse_bool_env("PIPELINE_PRODUCTION_FALLBACK", false)?,
        })
    }
}
