use std::env;

use crate::config::ConfigError;

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_f32_env(key: &str, default: f32) -> Result<f32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => {
            let value = raw
                .parse::<f32>()
                .map_err(|_| ConfigError::ParseFloat(key.to_string()))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(ConfigError::ParseFloat(key.to_string()))
            }
        }
        None => Ok(default),
    }
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool(key.to_string())),
        },
        None => Ok(default),
    }
}

pub(crate) fn parse_list_env(key: &str, default: &[&str]) -> Vec<String> {
    match optional_trimmed_env(key) {
        Some(raw) => {
            let parsed = parse_csv_list(&raw);
            if parsed.is_empty() {
                default.iter().map(|item| (*item).to_string()).collect()
            } else {
                parsed
            }
        }
        None => default.iter().map(|item| (*item).to_string()).collect(),
    }
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn require_http_url(key: &str, value: String) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(&value).map_err(|_| {
        ConfigError::InvalidConfiguration(format!("{key} must be an absolute URL"))
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigError::InvalidConfiguration(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_csv_list(raw: &str) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        if !seen.iter().any(|existing| existing == item) {
            seen.push(item.to_string());
        }
    }
    seen
}
