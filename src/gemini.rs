// Gemini API integration for chart analysis
// Implements the Analyst boundary over the generateContent REST endpoint

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::analyst::{
    Analyst, ChartAnalysis, ChartRequest, RetrospectiveRequest, WeeklyAnalysis, WeeklyRequest,
};
use crate::error::{InsightError, Result};
use crate::models::{Direction, TRACKING_WEEKS};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create client with explicit API key
    pub fn with_api_key(api_key: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(InsightError::Config("Gemini API key cannot be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
        })
    }

    /// Set the model to use
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Point at a different endpoint (proxies, local stubs)
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        log::debug!("Gemini request to model {}", self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(InsightError::Collaborator(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let body: GenerateResponse = response.json()?;
        response_text(body)
    }
}

fn response_text(body: GenerateResponse) -> Result<String> {
    let text = body
        .candidates
        .into_iter()
        .next()
        .map(|candidate| {
            candidate
                .content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(InsightError::Collaborator("Gemini returned an empty reply".to_string()));
    }
    Ok(text)
}

fn text_part(text: String) -> Part {
    Part {
        text: Some(text),
        inline_data: None,
    }
}

fn json_output(schema: Value) -> Value {
    json!({
        "responseMimeType": "application/json",
        "responseSchema": schema,
    })
}

/// Split `data:<mime>;base64,<payload>` into mime type and payload
pub fn split_data_url(url: &str) -> Result<(&str, &str)> {
    let invalid = || InsightError::Validation("chart image must be a base64 data URL".to_string());

    let rest = url.trim().strip_prefix("data:").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let mime = header.strip_suffix(";base64").ok_or_else(invalid)?;
    if mime.is_empty() || payload.is_empty() {
        return Err(invalid());
    }
    Ok((mime, payload))
}

/// First number in a free-text reply. Thousands separators are skipped.
pub fn extract_first_number(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;

    let mut number = String::new();
    let mut seen_dot = false;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        let next_is_digit = chars.get(i + 1).map_or(false, |n| n.is_ascii_digit());
        if c.is_ascii_digit() {
            number.push(c);
        } else if c == '.' && !seen_dot && next_is_digit {
            seen_dot = true;
            number.push(c);
        } else if c == ',' && !seen_dot && next_is_digit {
            // 1,234.56
        } else {
            break;
        }
        i += 1;
    }
    number.parse().ok()
}

/// Models sometimes wrap JSON in a markdown fence even when asked not to
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_json_reply(text: &str) -> Result<Value> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| {
        InsightError::Collaborator(format!("Gemini reply is not valid JSON: {}", e))
    })
}

/// Read a number field under either camelCase or snake_case
fn number_field(value: &Value, camel: &str, snake: &str) -> Option<f64> {
    value[camel].as_f64().or_else(|| value[snake].as_f64())
}

fn string_field(value: &Value, camel: &str, snake: &str) -> Option<String> {
    value[camel]
        .as_str()
        .or_else(|| value[snake].as_str())
        .map(str::to_string)
}

pub(crate) fn parse_chart_analysis(text: &str) -> Result<ChartAnalysis> {
    let parsed = parse_json_reply(text)?;

    let prediction = parsed["prediction"]
        .as_str()
        .and_then(Direction::parse)
        .ok_or_else(|| {
            InsightError::Collaborator(format!(
                "Gemini gave no usable direction: {}",
                parsed["prediction"]
            ))
        })?;
    let reasoning = parsed["reasoning"]
        .as_str()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| InsightError::Collaborator("Gemini gave no reasoning".to_string()))?
        .to_string();

    Ok(ChartAnalysis {
        prediction,
        reasoning,
        confidence: parsed["confidence"].as_f64().unwrap_or(0.0),
        initial_price: number_field(&parsed, "initialPrice", "initial_price"),
        alignment_score: number_field(&parsed, "alignmentScore", "alignment_score"),
        alignment_reason: string_field(&parsed, "alignmentReason", "alignment_reason"),
    })
}

pub(crate) fn parse_weekly_analysis(text: &str) -> Result<WeeklyAnalysis> {
    let parsed = parse_json_reply(text)?;

    let analysis = parsed["analysis"]
        .as_str()
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| InsightError::Collaborator("Gemini gave no weekly analysis".to_string()))?
        .to_string();

    Ok(WeeklyAnalysis {
        analysis,
        alignment_score: number_field(&parsed, "alignmentScore", "alignment_score"),
        alignment_reason: string_field(&parsed, "alignmentReason", "alignment_reason"),
    })
}

fn chart_prompt(request: &ChartRequest<'_>) -> String {
    let mut prompt = format!(
        "Analyze this stock chart for {}:\n\
        1. State the current price if it is visible on the chart.\n\
        2. Predict whether the stock will go UP or DOWN over the next {} weeks.\n\
        3. Give detailed technical reasoning.\n",
        request.ticker, TRACKING_WEEKS
    );

    if let Some(direction) = request.user_direction {
        prompt.push_str(&format!(
            "4. Compare with the user's prediction ({}) and reasoning ({}). Give an \
            alignment score from 0 to 100 for how much you agree with the user's logic, \
            and a short reason for that score.\n",
            direction.as_str(),
            request.user_reasoning.unwrap_or("none given")
        ));
    }

    prompt.push_str("Return the result as JSON.");
    prompt
}

fn chart_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "prediction": { "type": "STRING", "enum": ["up", "down"] },
            "reasoning": { "type": "STRING" },
            "confidence": { "type": "NUMBER" },
            "initialPrice": { "type": "NUMBER" },
            "alignmentScore": { "type": "NUMBER", "description": "Agreement with the user, 0-100" },
            "alignmentReason": { "type": "STRING" }
        },
        "required": ["prediction", "reasoning", "confidence"]
    })
}

fn weekly_prompt(request: &WeeklyRequest<'_>) -> String {
    let target = request
        .target_price
        .map(|t| format!("{:.2}", t))
        .unwrap_or_else(|| "not set".to_string());

    format!(
        "Stock: {}\n\
        Initial price: {:.2}\n\
        User target price: {}\n\
        Current price (week {}): {:.2}\n\
        User prediction: {} ({})\n\
        Gemini prediction: {} ({})\n\n\
        Analyze the price movement:\n\
        1. Who is more accurate so far?\n\
        2. Is the price approaching the user's target?\n\
        3. Give an alignment score from 0 to 100 for how much this week's analysis \
        agrees with the user's original logic.\n\
        4. Briefly describe the current situation.\n\n\
        Return JSON with fields: analysis (string), alignmentScore (number), alignmentReason (string)",
        request.ticker,
        request.initial_price,
        target,
        request.week,
        request.current_price,
        request.user_direction.as_str(),
        request.user_reasoning,
        request.ai_direction.as_str(),
        request.ai_reasoning,
    )
}

fn weekly_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "analysis": { "type": "STRING" },
            "alignmentScore": { "type": "NUMBER" },
            "alignmentReason": { "type": "STRING" }
        },
        "required": ["analysis", "alignmentScore", "alignmentReason"]
    })
}

fn retrospective_prompt(request: &RetrospectiveRequest<'_>) -> Result<String> {
    let history = serde_json::to_string(request.weekly_history)?;
    Ok(format!(
        "Retrospective for {} after {} weeks.\n\
        User's original reasoning: {}\n\
        Weekly data: {}\n\n\
        1. Evaluate the user's original reasoning. Which parts were right or wrong?\n\
        2. Suggest improvements to the user's technical analysis.\n\
        3. What additional information should the user have considered?\n\
        4. Give a final score for the prediction logic.",
        request.ticker, TRACKING_WEEKS, request.user_reasoning, history
    ))
}

impl Analyst for GeminiClient {
    fn analyze_chart(&self, request: &ChartRequest<'_>) -> Result<ChartAnalysis> {
        let (mime_type, data) = split_data_url(request.image)?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    text_part(chart_prompt(request)),
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: data.to_string(),
                        }),
                    },
                ],
            }],
            generation_config: Some(json_output(chart_schema())),
            tools: None,
        };

        let text = self.generate(&body)?;
        parse_chart_analysis(&text)
    }

    fn latest_price(&self, ticker: &str) -> Result<f64> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![text_part(format!(
                    "What is the current stock price of {}? Return only the number.",
                    ticker
                ))],
            }],
            generation_config: None,
            tools: Some(vec![json!({ "google_search": {} })]),
        };

        let text = self.generate(&body)?;
        match extract_first_number(&text) {
            Some(price) if price > 0.0 => Ok(price),
            _ => Err(InsightError::Collaborator(format!(
                "no price for {} in reply: {}",
                ticker,
                text.chars().take(200).collect::<String>()
            ))),
        }
    }

    fn weekly_analysis(&self, request: &WeeklyRequest<'_>) -> Result<WeeklyAnalysis> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![text_part(weekly_prompt(request))],
            }],
            generation_config: Some(json_output(weekly_schema())),
            tools: None,
        };

        let text = self.generate(&body)?;
        parse_weekly_analysis(&text)
    }

    fn final_retrospective(&self, request: &RetrospectiveRequest<'_>) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![text_part(retrospective_prompt(request)?)],
            }],
            generation_config: None,
            tools: None,
        };

        Ok(self.generate(&body)?.trim().to_string())
    }
}
