use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{MatchaError, Result};
use crate::models::Analysis;
use crate::settings::{ProviderKind, Settings, DEFAULT_OPENAI_MODEL};

// --- Provider trait ---

/// A remote service that scores a CV against a job description.
pub trait AnalysisProvider {
    fn analyze(&self, cv_text: &str, job_text: &str, job_url: &str) -> Result<Analysis>;
    fn test_connection(&self) -> Result<()>;
    /// Rewrite the CV with the tailored bullets worked into it, as markdown.
    fn tailor_cv(&self, cv_text: &str, bullets: &[String], target: &TargetRole) -> Result<String>;
    fn model_name(&self) -> &str;
}

/// The job a tailored CV is aimed at. Both parts are optional.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRole {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub company: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role_title: String,
}

pub fn create_provider(settings: &Settings) -> Result<Box<dyn AnalysisProvider>> {
    settings.validate()?;
    match settings.provider {
        ProviderKind::Azure => Ok(Box::new(AzureOpenAIProvider::new(settings))),
        ProviderKind::OpenAI => Ok(Box::new(OpenAIProvider::new(settings))),
        ProviderKind::Backend => Ok(Box::new(BackendProvider::new(settings))),
    }
}

// --- Prompts ---

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a professional career advisor and resume expert. \
Analyze job descriptions against a candidate's CV and give honest, actionable feedback.

RULES:
1. Never invent experiences, employers, projects, technologies or metrics that are not in the CV.
2. Only rephrase or highlight what the CV already contains.
3. When the job needs something the CV lacks, use placeholders such as [ADD METRIC] or [ADD DETAIL].
4. Be candid about gaps and risks.
5. Always answer with valid JSON matching the requested schema.";

const TAILOR_SYSTEM_PROMPT: &str = "You are an expert CV writer. Update a CV by working tailored \
bullet points into the existing content.

RULES:
1. Keep the original format, structure, section headings and contact details.
2. Replace or enhance similar existing bullet points rather than appending new sections.
3. Keep the original tone.
4. Never add facts that are not in the original CV or the tailored bullets.
5. Answer with the complete CV in clean markdown and nothing else.";

fn analysis_prompt(cv_text: &str, job_text: &str) -> String {
    format!(
        "Analyze the following job description against this candidate's CV.\n\n\
        ===== CANDIDATE'S CV =====\n{cv_text}\n\n\
        ===== JOB DESCRIPTION =====\n{job_text}\n\n\
        ===== RESPONSE FORMAT =====\n\
        Respond with ONLY this JSON object, no markdown code fences:\n\
        {{\n\
          \"match_score\": <number 0-100>,\n\
          \"match_label\": \"<high|medium|low>\",\n\
          \"explanation\": {{\n\
            \"strength\": \"<one sentence on the strongest match>\",\n\
            \"risk\": \"<one sentence on the biggest gap>\",\n\
            \"suggestion\": \"<one sentence with the most important action>\"\n\
          }},\n\
          \"gap_analysis\": [\"<missing requirement or what to emphasize>\"],\n\
          \"tailored_bullets\": [\"<CV bullet rephrased for this job>\"]\n\
        }}\n\n\
        Guidelines:\n\
        - match_label: high (70-100), medium (40-69), low (0-39)\n\
        - gap_analysis: 3-5 items covering missing requirements and existing experience to emphasize\n\
        - tailored_bullets: 3-8 items rephrasing existing CV experience. Do not invent new experience."
    )
}

fn tailor_prompt(cv_text: &str, bullets: &[String], target: &TargetRole) -> String {
    let numbered: Vec<String> = bullets
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}. {}", i + 1, b))
        .collect();

    let mut position = String::new();
    if !target.company.is_empty() {
        position.push_str(&format!("Company: {}\n", target.company));
    }
    if !target.role_title.is_empty() {
        position.push_str(&format!("Role: {}\n", target.role_title));
    }

    format!(
        "Update this CV by working in the tailored bullet points below, replacing similar existing points.\n\n\
        ===== ORIGINAL CV =====\n{cv_text}\n\n\
        ===== TAILORED BULLET POINTS =====\n{}\n\n\
        ===== TARGET POSITION =====\n{position}\n\
        Return ONLY the complete updated CV.",
        numbered.join("\n")
    )
}

// --- Response validation ---

const REQUIRED_FIELDS: [&str; 5] = [
    "match_score",
    "match_label",
    "explanation",
    "gap_analysis",
    "tailored_bullets",
];

/// Parse and validate a model's JSON answer into an `Analysis`.
///
/// Absent or empty required fields are reported together by name. A score of
/// 0 is a real score, not a missing one.
pub fn parse_analysis(content: &str) -> Result<Analysis> {
    let body = strip_code_fence(content);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| MatchaError::remote(format!("response is not valid JSON: {}", e)))?;
    analysis_from_value(value)
}

pub fn analysis_from_value(mut value: Value) -> Result<Analysis> {
    let Some(object) = value.as_object_mut() else {
        return Err(MatchaError::remote("response is not a JSON object"));
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| is_missing(object.get(**field)))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        warn!(?missing, received = ?object.keys().collect::<Vec<_>>(), "analysis response incomplete");
        return Err(MatchaError::missing_fields(missing));
    }

    if let Some(score) = object.get("match_score").and_then(Value::as_f64) {
        if !(0.0..=100.0).contains(&score) {
            return Err(MatchaError::remote(format!("match_score {} is outside 0-100", score)));
        }
        object.insert("match_score".into(), json!(score.round() as u8));
    }
    if let Some(label) = object.get("match_label").and_then(Value::as_str) {
        let label = label.trim().to_lowercase();
        object.insert("match_label".into(), Value::String(label));
    }

    serde_json::from_value(value)
        .map_err(|e| MatchaError::remote(format!("unexpected response structure: {}", e)))
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// --- Chat completions wire format (Azure OpenAI and OpenAI) ---

const ANALYSIS_MAX_TOKENS: u32 = 2000;
const TAILOR_MAX_TOKENS: u32 = 3000;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    fn new(model: Option<String>, system: &str, user: String, max_tokens: u32) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: Some(TEMPERATURE),
            max_tokens,
            response_format: None,
        }
    }

    fn json_output(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            format_type: "json_object",
        });
        self
    }

    fn ping(model: Option<String>) -> Self {
        Self {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: "Hello".to_string(),
            }],
            temperature: None,
            max_tokens: 10,
            response_format: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// How a request authenticates.
#[derive(Debug, Clone, PartialEq)]
enum Auth {
    ApiKey(String),
    Bearer(String),
}

fn post_chat(
    client: &reqwest::blocking::Client,
    service: &str,
    url: &str,
    auth: &Auth,
    request: &ChatRequest,
) -> Result<String> {
    let builder = client.post(url).header("Content-Type", "application/json");
    let builder = match auth {
        Auth::ApiKey(key) => builder.header("api-key", key),
        Auth::Bearer(token) => builder.header("Authorization", format!("Bearer {}", token)),
    };

    let response = builder
        .json(request)
        .send()
        .map_err(|e| MatchaError::remote(format!("failed to send request to {}: {}", service, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().unwrap_or_default();
        return Err(MatchaError::remote(format!(
            "{} request failed with status {}: {}",
            service, status, error_text
        )));
    }

    let api_response: ChatResponse = response
        .json()
        .map_err(|e| MatchaError::remote(format!("failed to parse {} response: {}", service, e)))?;

    api_response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| MatchaError::remote(format!("no content in {} response", service)))
}

// --- Azure OpenAI provider ---

#[derive(Debug)]
pub struct AzureOpenAIProvider {
    endpoint: String,
    deployment: String,
    api_version: String,
    auth: Auth,
    client: reqwest::blocking::Client,
}

impl AzureOpenAIProvider {
    pub fn new(settings: &Settings) -> Self {
        // A bearer token wins over an API key when both are configured.
        let auth = if settings.access_token.is_empty() {
            Auth::ApiKey(settings.api_key.clone())
        } else {
            Auth::Bearer(settings.access_token.clone())
        };
        Self {
            endpoint: settings.azure_endpoint.trim_end_matches('/').to_string(),
            deployment: settings.deployment.clone(),
            api_version: settings.api_version.clone(),
            auth,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }

    fn complete(&self, request: &ChatRequest) -> Result<String> {
        post_chat(&self.client, "Azure OpenAI", &self.chat_url(), &self.auth, request)
    }
}

impl AnalysisProvider for AzureOpenAIProvider {
    fn analyze(&self, cv_text: &str, job_text: &str, job_url: &str) -> Result<Analysis> {
        info!(deployment = %self.deployment, job_url, "requesting analysis from Azure OpenAI");
        let request = ChatRequest::new(
            None,
            ANALYSIS_SYSTEM_PROMPT,
            analysis_prompt(cv_text, job_text),
            ANALYSIS_MAX_TOKENS,
        )
        .json_output();
        let content = self.complete(&request)?;
        debug!(chars = content.len(), "Azure OpenAI answered");
        parse_analysis(&content)
    }

    fn test_connection(&self) -> Result<()> {
        self.complete(&ChatRequest::ping(None)).map(|_| ())
    }

    fn tailor_cv(&self, cv_text: &str, bullets: &[String], target: &TargetRole) -> Result<String> {
        let request = ChatRequest::new(
            None,
            TAILOR_SYSTEM_PROMPT,
            tailor_prompt(cv_text, bullets, target),
            TAILOR_MAX_TOKENS,
        );
        Ok(self.complete(&request)?.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug)]
pub struct OpenAIProvider {
    auth: Auth,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(settings: &Settings) -> Self {
        let model_id = if settings.model.is_empty() {
            DEFAULT_OPENAI_MODEL.to_string()
        } else {
            settings.model.clone()
        };
        Self {
            auth: Auth::Bearer(settings.api_key.clone()),
            model_id,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn complete(&self, request: &ChatRequest) -> Result<String> {
        post_chat(&self.client, "OpenAI", OPENAI_API_URL, &self.auth, request)
    }
}

impl AnalysisProvider for OpenAIProvider {
    fn analyze(&self, cv_text: &str, job_text: &str, job_url: &str) -> Result<Analysis> {
        info!(model = %self.model_id, job_url, "requesting analysis from OpenAI");
        let request = ChatRequest::new(
            Some(self.model_id.clone()),
            ANALYSIS_SYSTEM_PROMPT,
            analysis_prompt(cv_text, job_text),
            ANALYSIS_MAX_TOKENS,
        )
        .json_output();
        parse_analysis(&self.complete(&request)?)
    }

    fn test_connection(&self) -> Result<()> {
        self.complete(&ChatRequest::ping(Some(self.model_id.clone())))
            .map(|_| ())
    }

    fn tailor_cv(&self, cv_text: &str, bullets: &[String], target: &TargetRole) -> Result<String> {
        let request = ChatRequest::new(
            Some(self.model_id.clone()),
            TAILOR_SYSTEM_PROMPT,
            tailor_prompt(cv_text, bullets, target),
            TAILOR_MAX_TOKENS,
        );
        Ok(self.complete(&request)?.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Hosted backend provider ---

pub const DEFAULT_BACKEND_URL: &str = "https://jd-cv-backend-production.up.railway.app";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendAnalyzeRequest<'a> {
    cv_text: &'a str,
    jd_text: &'a str,
    job_url: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendUpdateCvRequest<'a> {
    #[serde(rename = "originalCV")]
    original_cv: &'a str,
    tailored_bullets: &'a [String],
    job_info: &'a TargetRole,
}

#[derive(Debug)]
pub struct BackendProvider {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl BackendProvider {
    pub fn new(settings: &Settings) -> Self {
        let base_url = if settings.backend_url.is_empty() {
            DEFAULT_BACKEND_URL
        } else {
            settings.backend_url.as_str()
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: settings.access_token.clone(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> Result<Value> {
        let response = builder
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .map_err(|e| MatchaError::remote(format!("failed to reach the backend: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MatchaError::remote("Session expired. Please sign in again."));
        }

        let body: Value = response
            .json()
            .map_err(|e| MatchaError::remote(format!("failed to parse backend response: {}", e)))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("API request failed");
            return Err(MatchaError::remote(format!("{} ({})", message, status)));
        }
        Ok(body)
    }
}

impl AnalysisProvider for BackendProvider {
    fn analyze(&self, cv_text: &str, job_text: &str, job_url: &str) -> Result<Analysis> {
        info!(backend = %self.base_url, job_url, "requesting analysis from backend");
        let body = BackendAnalyzeRequest {
            cv_text,
            jd_text: job_text,
            job_url,
        };
        let value = self.request(
            self.client
                .post(format!("{}/api/analyze", self.base_url))
                .json(&body),
        )?;
        analysis_from_value(value)
    }

    fn test_connection(&self) -> Result<()> {
        self.request(self.client.get(format!("{}/api/auth/me", self.base_url)))
            .map(|_| ())
    }

    fn tailor_cv(&self, cv_text: &str, bullets: &[String], target: &TargetRole) -> Result<String> {
        let body = BackendUpdateCvRequest {
            original_cv: cv_text,
            tailored_bullets: bullets,
            job_info: target,
        };
        let value = self.request(
            self.client
                .post(format!("{}/api/update-cv", self.base_url))
                .json(&body),
        )?;
        value
            .get("updatedCV")
            .and_then(Value::as_str)
            .map(|cv| cv.trim().to_string())
            .ok_or_else(|| MatchaError::remote("backend response has no updatedCV"))
    }

    fn model_name(&self) -> &str {
        "backend"
    }
}
