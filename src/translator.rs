//! Natural-language question → SQL translation.
//!
//! The [`Translator`] is stateless: every call restates the full table
//! schema, the semantic rules, and the name-mapping rules in the prompt,
//! then appends the user's question plus a deterministic region expansion
//! (see [`regions`](crate::regions)). The model must answer with a JSON
//! object holding exactly two non-empty string fields, `query` and
//! `highlight_condition`. Anything else is a [`GenerationError::Parse`].
//!
//! # Providers
//!
//! | Config Value | Model |
//! |--------------|-------|
//! | `"disabled"` | [`DisabledModel`] (every call fails) |
//! | `"openai"` | [`OpenAiChatModel`] (`POST {api_base}/chat/completions`) |
//!
//! There is no retry against the model. A malformed answer usually comes
//! from the question itself, and asking again would not fix it.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::GenerationError;
use crate::migrate::{REPORTS_TABLE, REPORT_COLUMNS};
use crate::models::TranslatedQuery;
use crate::regions::{expansion_hint, NAME_ALIASES};

/// Columns every generated query must select so result rows can be rendered.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "report_id",
    "date_report_created",
    "headline_title",
    "headline_summary",
    "source_homepage",
    "source_name",
    "country_lat",
    "country_long",
    "primary_country",
    "primary_country_shortname",
    "report_url_alias",
];

/// Values the feed uses for `disaster_type`.
pub const DISASTER_TYPES: &[&str] = &[
    "Mud Slide",
    "Insect Infestation",
    "Tsunami",
    "Cold Wave",
    "Fire",
    "Complex Emergency",
    "Extratropical Cyclone",
    "Drought",
    "Epidemic",
    "Earthquake",
    "Flash Flood",
    "Technological Disaster",
    "Snow Avalanche",
    "Severe Local Storm",
    "Wild Fire",
    "Tropical Cyclone",
    "Flood",
];

/// A prompt-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send one prompt and return the raw text of the reply.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

// ============ Disabled ============

/// Used when `model.provider = "disabled"`; every call fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenAI ============

/// Chat-completions client. Reads `OPENAI_API_KEY` at construction.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Model(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Model(format!(
                "OpenAI API error {}: {}",
                status, text
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Model(e.to_string()))?;
        parse_chat_content(&json)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn parse_chat_content(json: &Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Model("response has no message content".to_string()))
}

/// Instantiate the configured model.
pub fn create_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ Prompt ============

/// Build the full prompt for one question.
pub fn build_prompt(user_text: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an assistant that turns user questions into SQL queries on a SQLite database of disaster reports.\n",
    );
    prompt.push_str("Return a JSON object containing:\n");
    prompt.push_str(&format!(
        "1. `query`: a single read-only SQL SELECT statement that fetches relevant data from the `{}` table.\n",
        REPORTS_TABLE
    ));
    prompt.push_str(
        "2. `highlight_condition`: a condition the frontend can use to highlight specific rows (e.g. \"disaster_status = 'ongoing'\").\n",
    );
    prompt.push_str("All entries in the table have exactly one country as their primary_country.\n");
    prompt.push_str(
        "Note: a \"disaster\" is a report where `disaster_name` OR `disaster_type` is NOT NULL.\n",
    );
    prompt.push_str(
        "Do not check for disasters unless the question explicitly uses the word \"disaster\".\n",
    );
    prompt.push_str(
        "If the user asks for a count of events or disasters, the query must still keep the `country_long` and `country_lat` fields for the country or region asked about.\n",
    );
    prompt.push_str(
        "Match a country name on either `primary_country` or `primary_country_shortname`, e.g. (primary_country = 'Mexico' OR primary_country_shortname = 'Mexico').\n",
    );
    prompt.push_str(&format!(
        "You must always select the {} fields, as they are needed to render reports.\n",
        REQUIRED_COLUMNS
            .iter()
            .map(|c| format!("`{}`", c))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    prompt.push_str(&format!(
        "If the input does not seem to be asking a question, return a query that returns no rows, e.g. SELECT report_id FROM {} WHERE 1 = 0.\n",
        REPORTS_TABLE
    ));
    prompt.push_str(
        "For questions about geographic distance, filter on ranges of `country_lat` and `country_long`; spatial functions are not available.\n",
    );
    prompt.push_str(
        "`date_report_created` is UTC text like 2024-05-01T09:30:00Z; compare it against strftime('%Y-%m-%dT%H:%M:%SZ', 'now', '-7 days') style values.\n",
    );
    for alias in NAME_ALIASES {
        prompt.push_str(&format!(
            "If the user asks about \"{}\", search for \"{}\" instead.\n",
            alias.alias, alias.canonical
        ));
    }
    prompt.push_str(
        "These are all the possible `disaster_type` values. If none of them match the question, search for related keywords in `headline_title` or `headline_summary` instead:\n",
    );
    prompt.push_str(&DISASTER_TYPES.join(", "));
    prompt.push_str(".\n");
    prompt.push_str(
        "There are no fields other than the ones below. Do not create new fields.\n",
    );
    prompt.push_str(&schema_block());
    prompt.push('\n');
    prompt.push_str(
        "Respond with only a JSON object of the form {\"query\": \"...\", \"highlight_condition\": \"...\"} and nothing else.\n\n",
    );
    prompt.push_str("User question: ");
    prompt.push_str(user_text);
    prompt.push_str(&expansion_hint(user_text));

    prompt
}

/// `Table:` / `Columns:` listing of the reports schema.
pub fn schema_block() -> String {
    let mut block = format!("Table: `{}`\nColumns:\n", REPORTS_TABLE);
    for (name, ty) in REPORT_COLUMNS {
        block.push_str(&format!("- {}: {}\n", name, ty));
    }
    block
}

// ============ Response parsing ============

/// Parse the model's reply into a [`TranslatedQuery`].
///
/// Accepts an optional Markdown code fence around the JSON. The object
/// must have exactly the keys `query` and `highlight_condition`, both
/// non-empty strings. `%%` in the query is collapsed to `%`.
pub fn parse_response(raw: &str) -> Result<TranslatedQuery, GenerationError> {
    let body = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GenerationError::Parse(format!("not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| GenerationError::Parse("expected a JSON object".to_string()))?;

    if let Some(extra) = object
        .keys()
        .find(|k| k.as_str() != "query" && k.as_str() != "highlight_condition")
    {
        return Err(GenerationError::Parse(format!("unexpected field `{}`", extra)));
    }

    let field = |name: &str| -> Result<String, GenerationError> {
        match object.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::String(_)) => Err(GenerationError::Parse(format!("`{}` is empty", name))),
            Some(_) => Err(GenerationError::Parse(format!("`{}` is not a string", name))),
            None => Err(GenerationError::Parse(format!("missing `{}`", name))),
        }
    };

    Ok(TranslatedQuery {
        query: field("query")?.replace("%%", "%"),
        highlight_condition: field("highlight_condition")?,
    })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop an info string such as `json` on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============ Translator ============

pub struct Translator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl Translator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn translate(&self, user_text: &str) -> Result<TranslatedQuery, GenerationError> {
        let prompt = build_prompt(user_text);

        let raw = tokio::time::timeout(self.timeout, self.model.complete(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))??;

        let translated = parse_response(&raw)?;
        tracing::debug!(model = self.model.model_name(), query = %translated.query, "translated question");
        Ok(translated)
    }
}
