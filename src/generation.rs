//! Content Generation Gateway
//!
//! Turns the four structured AI requests (content, quiz, study question,
//! concept explanation) into chat-completion calls and normalizes every
//! outcome into an [`AiResponse`]. Backend failures never escape this module:
//! they come back as `success: false` with the failure in `error`.

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ApiError;

const NOT_CONFIGURED: &str = "generation service not configured";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to generation service failed: {0}")]
    Transport(String),
    #[error("generation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response from generation service: {0}")]
    Decode(String),
}

/// One system + user exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u64>,
}

/// The external text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<Completion, GenerationError>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Deserialize)]
struct WireReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    total_tokens: u64,
}

impl OpenAiBackend {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn complete(&self, request: ChatRequest) -> Result<Completion, GenerationError> {
        let body = WireRequest {
            model: &self.model,
            messages: vec![
                WireMessage { role: "system", content: &request.system },
                WireMessage { role: "user", content: &request.user },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status: status.as_u16(), body });
        }

        let parsed: WireResponse =
            res.json().await.map_err(|e| GenerationError::Decode(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Decode("no choices in reply".to_string()))?;
        Ok(Completion {
            text,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

/// Whether the call was made and how it went. Not serialized; drives the
/// HTTP status of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Generated,
    Unconfigured,
    Failed,
}

/// Uniform gateway envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AiResponse {
    pub content: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub outcome: Outcome,
}

impl AiResponse {
    fn generated(content: Value, metadata: Map<String, Value>) -> Self {
        Self { content, metadata, success: true, error: None, outcome: Outcome::Generated }
    }

    fn unconfigured(content: Value) -> Self {
        Self {
            content,
            metadata: Map::new(),
            success: false,
            error: Some(NOT_CONFIGURED.to_string()),
            outcome: Outcome::Unconfigured,
        }
    }

    fn failed(content: Value, err: &GenerationError) -> Self {
        Self {
            content,
            metadata: Map::new(),
            success: false,
            error: Some(err.to_string()),
            outcome: Outcome::Failed,
        }
    }
}

impl IntoResponse for AiResponse {
    fn into_response(self) -> Response {
        let status = match self.outcome {
            Outcome::Generated => StatusCode::OK,
            Outcome::Unconfigured => StatusCode::SERVICE_UNAVAILABLE,
            Outcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

fn default_difficulty() -> String {
    "intermediate".to_string()
}

fn default_length() -> String {
    "medium".to_string()
}

fn default_num_questions() -> u32 {
    5
}

fn default_question_types() -> Vec<String> {
    vec!["multiple_choice".to_string(), "true_false".to_string()]
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ContentRequest {
    pub prompt: String,
    pub content_type: String, // lesson | quiz | assignment | explanation
    pub subject: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_length")]
    pub length: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct QuizRequest {
    pub topic: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: u32,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_question_types")]
    pub question_types: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StudyRequest {
    pub question: String,
    pub context: Option<String>,
    pub course_id: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ExplainRequest {
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default = "default_difficulty")]
    pub level: String,
}

fn system_prompt(content_type: &str, difficulty: &str, subject: &str) -> String {
    match content_type {
        "lesson" => format!(
            "You are an expert educator creating {} level lesson content for {}. \
             Create engaging, well-structured educational material.",
            difficulty, subject
        ),
        "quiz" => format!(
            "You are an expert educator creating {} level quiz questions for {}. \
             Create clear, fair, and educational quiz content.",
            difficulty, subject
        ),
        "assignment" => format!(
            "You are an expert educator creating {} level assignments for {}. \
             Create meaningful, practical assignments that reinforce learning.",
            difficulty, subject
        ),
        _ => format!(
            "You are an expert tutor providing {} level explanations for {}. \
             Provide clear, comprehensive explanations.",
            difficulty, subject
        ),
    }
}

fn length_instruction(length: &str) -> &'static str {
    match length {
        "short" => "Keep the response concise and focused (200-400 words).",
        "long" => "Create a comprehensive, detailed response (800-1200 words).",
        _ => "Provide a moderate length response (400-800 words).",
    }
}

/// Parses a quiz reply, tolerating a surrounding markdown code fence.
/// Anything that is not a JSON object is kept verbatim under `raw_content`.
fn parse_quiz(topic: &str, text: &str) -> Value {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map(|inner| inner.trim_start_matches("json").trim())
        .unwrap_or(trimmed);
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({
            "quiz_title": format!("{} Quiz", topic),
            "raw_content": text,
        }),
    }
}

fn with_tokens(mut metadata: Map<String, Value>, completion: &Completion) -> Map<String, Value> {
    metadata.insert("tokens_used".to_string(), json!(completion.tokens_used));
    metadata
}

pub struct ContentGateway {
    backend: Option<Arc<dyn GenerationBackend>>,
}

impl ContentGateway {
    pub fn new(backend: Option<Arc<dyn GenerationBackend>>) -> Self {
        Self { backend }
    }

    /// OpenAI backend when an API key is configured, otherwise unconfigured.
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        let backend: Option<Arc<dyn GenerationBackend>> = match &config.openai_api_key {
            Some(key) => {
                info!(
                    base_url = %config.openai_base_url,
                    model = %config.openai_model,
                    "generation backend configured"
                );
                Some(Arc::new(OpenAiBackend::new(
                    key,
                    &config.openai_base_url,
                    &config.openai_model,
                    config.generation_timeout,
                )?))
            }
            None => {
                info!("OPENAI_API_KEY not set; AI endpoints will report unavailable");
                None
            }
        };
        Ok(Self::new(backend))
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn generate_content(&self, req: &ContentRequest) -> AiResponse {
        let Some(backend) = &self.backend else {
            return AiResponse::unconfigured(json!(
                "AI service is currently unavailable. \
                 Please contact your administrator to configure the OpenAI API key."
            ));
        };

        let subject = req.subject.as_deref().unwrap_or("general studies");
        let system = format!(
            "{} {}",
            system_prompt(&req.content_type, &req.difficulty, subject),
            length_instruction(&req.length)
        );
        let chat =
            ChatRequest { system, user: req.prompt.clone(), max_tokens: 1500, temperature: 0.7 };

        match backend.complete(chat).await {
            Ok(completion) => {
                let metadata = json!({
                    "content_type": req.content_type,
                    "subject": req.subject,
                    "difficulty": req.difficulty,
                    "length": req.length,
                });
                let metadata = with_tokens(as_map(metadata), &completion);
                AiResponse::generated(json!(completion.text), metadata)
            }
            Err(e) => {
                error!(error = %e, "content generation failed");
                AiResponse::failed(json!(""), &e)
            }
        }
    }

    pub async fn generate_quiz(&self, req: &QuizRequest) -> AiResponse {
        let Some(backend) = &self.backend else {
            return AiResponse::unconfigured(json!({}));
        };

        let user = format!(
            "Create a {difficulty} level quiz about {topic} with {n} questions.\n\
             Include question types: {types}\n\n\
             Format as JSON with this structure:\n\
             {{\"quiz_title\": \"{topic} Quiz\", \"questions\": [{{\"id\": 1, \
             \"type\": \"multiple_choice\", \
             \"question\": \"...\", \"options\": [\"A) ...\", \"B) ...\", \"C) ...\", \"D) ...\"], \
             \"correct_answer\": \"A\", \"explanation\": \"...\"}}]}}\n\n\
             Ensure all questions are educational, clear, and appropriate for {difficulty} level.",
            difficulty = req.difficulty,
            topic = req.topic,
            n = req.num_questions,
            types = req.question_types.join(", "),
        );
        let chat = ChatRequest {
            system: "You are an expert educator creating educational quizzes. \
                     Always respond with valid JSON format."
                .to_string(),
            user,
            max_tokens: 2000,
            temperature: 0.6,
        };

        match backend.complete(chat).await {
            Ok(completion) => {
                let metadata = json!({
                    "topic": req.topic,
                    "num_questions": req.num_questions,
                    "difficulty": req.difficulty,
                    "question_types": req.question_types,
                });
                let metadata = with_tokens(as_map(metadata), &completion);
                AiResponse::generated(parse_quiz(&req.topic, &completion.text), metadata)
            }
            Err(e) => {
                error!(error = %e, "quiz generation failed");
                AiResponse::failed(json!({}), &e)
            }
        }
    }

    /// `course_info` is resolved by the caller (e.g. from the `Course`
    /// collection) before the call so no store lock spans the request.
    pub async fn study_assistant(
        &self,
        req: &StudyRequest,
        course_info: Option<String>,
    ) -> AiResponse {
        let Some(backend) = &self.backend else {
            return AiResponse::unconfigured(json!(
                "AI study assistant is currently unavailable. \
                 Please contact your instructor or administrator for assistance."
            ));
        };

        let mut user = format!("Student Question: {}", req.question);
        if let Some(context) = req.context.as_deref().filter(|c| !c.is_empty()) {
            user.push_str(&format!("\n\nContext: {}", context));
        }
        if let Some(info) = &course_info {
            user.push_str(&format!("\n\nCourse Information: {}", info));
        }
        let chat = ChatRequest {
            system: "You are a helpful AI tutor assistant. \
                     Provide clear, educational answers to student questions. \
                     Be encouraging and supportive while maintaining academic accuracy."
                .to_string(),
            user,
            max_tokens: 1000,
            temperature: 0.7,
        };

        match backend.complete(chat).await {
            Ok(completion) => {
                let metadata = json!({
                    "question": req.question,
                    "has_context": req.context.as_deref().is_some_and(|c| !c.is_empty()),
                    "has_course_info": course_info.is_some(),
                });
                let metadata = with_tokens(as_map(metadata), &completion);
                AiResponse::generated(json!(completion.text), metadata)
            }
            Err(e) => {
                error!(error = %e, "study assistant failed");
                AiResponse::failed(
                    json!(
                        "I apologize, but I'm unable to process your question at the moment. \
                         Please try again later or contact your instructor for assistance."
                    ),
                    &e,
                )
            }
        }
    }

    pub async fn explain_concept(&self, req: &ExplainRequest) -> Result<AiResponse, ApiError> {
        if req.concept.trim().is_empty() {
            return Err(ApiError::BadRequest("Concept is required".to_string()));
        }
        let content = ContentRequest {
            prompt: format!("Explain the concept: {}", req.concept),
            content_type: "explanation".to_string(),
            subject: Some(req.subject.clone()).filter(|s| !s.is_empty()),
            difficulty: req.level.clone(),
            length: "medium".to_string(),
        };
        Ok(self.generate_content(&content).await)
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
