use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::contracts::{TEMPLATE_VERSION_V1, TemplateType, output_schema};

pub type TemplateParams = Map<String, Value>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Markdown,
    Csv,
    Xml,
    Yaml,
}

impl OutputFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Yaml => "yaml",
        }
    }

    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateExample {
    pub input: &'static str,
    pub output: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub template_type: TemplateType,
    pub version: &'static str,
    pub system_prompt: &'static str,
    pub user_prompt: &'static str,
    pub output_format: OutputFormat,
    pub output_schema: Value,
    pub tags: Vec<&'static str>,
    pub examples: Vec<TemplateExample>,
}

impl PromptTemplate {
    /// System instructions with the output-format directive appended.
    pub fn system_prompt_with_directive(&self) -> String {
        format!(
            "{}\n\n{}",
            self.system_prompt,
            format_directive(self.output_format)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no prompt template registered for {0:?}")]
    NotFound(TemplateType),
    #[error("template {template_id} is missing parameters: {missing:?}")]
    MissingParameters {
        template_id: &'static str,
        missing: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateType, PromptTemplate>,
}

impl TemplateRegistry {
    pub fn builtin() -> Self {
        Self::from_templates(vec![
            location_research_template(),
            activity_structuring_template(),
            trending_analysis_template(),
            quick_recommendations_template(),
        ])
    }

    pub fn from_templates(templates: Vec<PromptTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|template| (template.template_type, template))
                .collect(),
        }
    }

    pub fn get(&self, template_type: TemplateType) -> Result<&PromptTemplate, TemplateError> {
        self.templates
            .get(&template_type)
            .ok_or(TemplateError::NotFound(template_type))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Substitutes every `{{name}}` in the user prompt.
///
/// Missing parameters render as empty strings. Providers tolerate the blanks and
/// the pipeline prefers a degraded prompt over a hard failure; use
/// [`render_strict`] when a missing value should be an error.
pub fn render(template: &PromptTemplate, params: &TemplateParams) -> String {
    PLACEHOLDER
        .replace_all(template.user_prompt, |captures: &Captures<'_>| {
            params
                .get(&captures[1])
                .map(param_to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

pub fn render_strict(
    template: &PromptTemplate,
    params: &TemplateParams,
) -> Result<String, TemplateError> {
    let mut missing = placeholders(template)
        .into_iter()
        .filter(|name| !params.contains_key(name))
        .collect::<Vec<_>>();
    missing.dedup();

    if !missing.is_empty() {
        return Err(TemplateError::MissingParameters {
            template_id: template.id,
            missing,
        });
    }

    Ok(render(template, params))
}

pub fn placeholders(template: &PromptTemplate) -> Vec<String> {
    let mut names = Vec::new();
    for captures in PLACEHOLDER.captures_iter(template.user_prompt) {
        let name = captures[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub const fn format_directive(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => {
            "Respond with valid JSON only. Do not wrap the JSON in markdown fences or add commentary."
        }
        OutputFormat::Markdown => "Respond in GitHub-flavored Markdown.",
        OutputFormat::Csv => "Respond with CSV only, including a header row.",
        OutputFormat::Xml => "Respond with well-formed XML only.",
        OutputFormat::Yaml => "Respond with YAML only.",
    }
}

fn param_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn location_research_template() -> PromptTemplate {
    PromptTemplate {
        id: "location_research.v1",
        template_type: TemplateType::LocationResearch,
        version: TEMPLATE_VERSION_V1,
        system_prompt: "You are a meticulous local travel researcher. Write factual, current notes about places travelers can actually visit. Never invent venues.",
        user_prompt: "Research the best {{interest}} experiences in {{location}}. Cover standout venues, the neighborhoods they are in, typical price ranges, and what makes each place popular with locals and visitors. {{additional_context}}",
        output_format: OutputFormat::Markdown,
        output_schema: output_schema(TemplateType::LocationResearch),
        tags: vec!["research", "pipeline"],
        examples: vec![TemplateExample {
            input: "interest=Coffee location=Portland",
            output: "## Coffee in Portland\n\n- **Heart Coffee Roasters** (East Burnside): light roasts, $4-6 drinks, a local favorite for pour over.",
        }],
    }
}

fn activity_structuring_template() -> PromptTemplate {
    PromptTemplate {
        id: "activity_structuring.v1",
        template_type: TemplateType::ActivityStructuring,
        version: TEMPLATE_VERSION_V1,
        system_prompt: "You convert travel research into structured place records for a discovery app. Only include places named in the research.",
        user_prompt: "Using the research below, produce exactly {{count}} {{interest}} places in {{location}}.\n\nResearch:\n{{research}}\n\nReturn an object with an \"activities\" array. Each item has name, description, category, tags, address, latitude, longitude, price_level (1-4) and popularity_score (0-100).",
        output_format: OutputFormat::Json,
        output_schema: output_schema(TemplateType::ActivityStructuring),
        tags: vec!["structuring", "pipeline"],
        examples: vec![TemplateExample {
            input: "count=1 interest=Coffee location=Portland",
            output: r#"{"activities":[{"name":"Heart Coffee Roasters","description":"Light-roast specialist on East Burnside.","category":"cafe","tags":["pour over","roastery"],"address":"2211 E Burnside St, Portland, OR","latitude":45.5229,"longitude":-122.6424,"price_level":2,"popularity_score":88}]}"#,
        }],
    }
}

fn trending_analysis_template() -> PromptTemplate {
    PromptTemplate {
        id: "trending_analysis.v1",
        template_type: TemplateType::TrendingAnalysis,
        version: TEMPLATE_VERSION_V1,
        system_prompt: "You identify what is trending for travelers in a city right now, based only on the supplied candidates.",
        user_prompt: "Candidate places in {{location}}:\n{{candidates}}\n\nPick the {{limit}} most compelling places right now and explain why. Return an object with a \"trending\" array of items with name, reason and score (0-100).",
        output_format: OutputFormat::Json,
        output_schema: output_schema(TemplateType::TrendingAnalysis),
        tags: vec!["trending", "pipeline"],
        examples: Vec::new(),
    }
}

fn quick_recommendations_template() -> PromptTemplate {
    PromptTemplate {
        id: "quick_recommendations.v1",
        template_type: TemplateType::QuickRecommendations,
        version: TEMPLATE_VERSION_V1,
        system_prompt: "You are a concise travel concierge recommending real places.",
        user_prompt: "Recommend {{count}} {{interest}} places in {{location}}. {{preferences}}\n\nReturn an object with an \"activities\" array. Each item has name, description, category, tags, address, latitude, longitude, price_level (1-4) and popularity_score (0-100).",
        output_format: OutputFormat::Json,
        output_schema: output_schema(TemplateType::QuickRecommendations),
        tags: vec!["interactive"],
        examples: Vec::new(),
    }
}
