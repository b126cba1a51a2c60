use serde::{Deserialize, Serialize};

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2_000;
const DEFAULT_TOP_P: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
}

impl ProviderKind {
    /// Resolution order when the caller does not pin a provider.
    pub const PRIORITY: [Self; 4] = [Self::OpenAi, Self::Anthropic, Self::Gemini, Self::Mistral];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "mistral" => Some(Self::Mistral),
            _ => None,
        }
    }

    pub const fn credential_env_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
        }
    }

    pub(crate) const fn env_prefix(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI",
            Self::Anthropic => "ANTHROPIC",
            Self::Gemini => "GEMINI",
            Self::Mistral => "MISTRAL",
        }
    }

    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Mistral => "https://api.mistral.ai/v1",
        }
    }

    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::Gemini => "gemini-1.5-flash",
            Self::Mistral => "mistral-small-latest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequestOptions {
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ProviderRequestOptions {
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl AsRef<str>) -> Self {
        let trimmed = user_id.as_ref().trim();
        if !trimmed.is_empty() {
            self.user_id = Some(trimmed.to_string());
        }
        self
    }

    /// Caller-supplied values win; everything else comes from `defaults`.
    pub fn resolve(
        &self,
        provider: ProviderKind,
        default_model: &str,
        defaults: &SamplingDefaults,
    ) -> ResolvedOptions {
        let model = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(default_model)
            .to_string();

        ResolvedOptions {
            provider,
            model,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(defaults.presence_penalty),
            tags: self.tags.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub tags: Vec<String>,
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{ProviderKind, ProviderRequestOptions, SamplingDefaults};

    #[test]
    fn resolve_fills_unset_values_from_defaults() {
        let resolved = ProviderRequestOptions::default().resolve(
            ProviderKind::OpenAi,
            "gpt-4o-mini",
            &SamplingDefaults::default(),
        );

        assert_eq!(resolved.model, "gpt-4o-mini");
        assert!((resolved.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(resolved.max_tokens, 2_000);
        assert!((resolved.top_p - 1.0).abs() < f32::EPSILON);
        assert!(resolved.frequency_penalty.abs() < f32::EPSILON);
        assert!(resolved.presence_penalty.abs() < f32::EPSILON);
    }

    #[test]
    fn resolve_prefers_caller_values_and_ignores_blank_model() {
        let options = ProviderRequestOptions::default()
            .with_model("   ")
            .with_temperature(0.2)
            .with_max_tokens(512)
            .with_user_id("  traveler-1 ")
            .with_tag("pipeline");

        let resolved =
            options.resolve(ProviderKind::Mistral, "mistral-small-latest", &SamplingDefaults::default());

        assert_eq!(resolved.model, "mistral-small-latest");
        assert!((resolved.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(resolved.max_tokens, 512);
        assert_eq!(resolved.user_id.as_deref(), Some("traveler-1"));
        assert_eq!(resolved.tags, vec!["pipeline".to_string()]);
    }

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!(ProviderKind::parse("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("google"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("open_ai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("cohere"), None);
    }
}
