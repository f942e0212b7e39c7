use crate::errors::AppError;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-5";

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PERSONA: &str =
    "You are an expert interview coach summarizing performance trends.";

const INSTRUCTIONS: &str = "Here are a list of emails of interview feedback that trainees have \
received on their behavioural interviews. The format of all the emails are the same. It starts \
off with a RAG scoring system on 5 different topics, followed by more detailed feedback about any \
questions that were asked in the interview. Provide a summary of what the trainee has improved \
over time, and what they still need to work on. Make the summary concise and clear. No more than \
200 words.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// The single request sent for a run: persona plus instructions and all bodies.
    pub fn feedback_digest(model: &str, bodies: &[String]) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PERSONA.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(bodies),
                },
            ],
        }
    }
}

/// Instruction block followed by every body, labelled `Email N:` in input order.
pub fn build_prompt(bodies: &[String]) -> String {
    let combined = bodies
        .iter()
        .enumerate()
        .map(|(index, body)| format!("Email {}:\n{}", index + 1, body))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n\n{}", INSTRUCTIONS, combined)
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Generated text of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, AppError>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI chat completions over the shared hyper client.
pub struct OpenAiChat {
    client: Client<HttpsConnector<HttpConnector>>,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(client: Client<HttpsConnector<HttpConnector>>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// `None` when `OPENAI_API_KEY` is unset or blank.
    pub fn from_env(client: Client<HttpsConnector<HttpConnector>>) -> Option<Self> {
        usable_key(env::var(API_KEY_VAR).ok()).map(|api_key| Self::new(client, api_key))
    }
}

fn usable_key(value: Option<String>) -> Option<String> {
    let key = value?.trim().to_string();
    (!key.is_empty()).then_some(key)
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AppError> {
        let http_request = Request::builder()
            .method(Method::POST)
            .uri(CHAT_COMPLETIONS_URL)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(request)?))?;

        debug!("POST {} (model {})", CHAT_COMPLETIONS_URL, request.model);
        let response = self.client.request(http_request).await?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;
        parse_response(status, &bytes)
    }
}

fn parse_response(status: StatusCode, bytes: &[u8]) -> Result<String, AppError> {
    if !status.is_success() {
        return Err(AppError::Summarizer(format!(
            "{}: {}",
            status,
            String::from_utf8_lossy(bytes)
        )));
    }
    parse_completion(bytes)
}

fn parse_completion(bytes: &[u8]) -> Result<String, AppError> {
    let response: ChatResponse = serde_json::from_slice(bytes)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| AppError::Summarizer("Response contained no message content".to_string()))
}

#[derive(Debug)]
pub enum SummaryOutcome {
    Generated(String),
    /// The model answered with nothing but whitespace.
    Empty,
    /// No API key configured; no request was made.
    Skipped,
    Failed(AppError),
}

impl SummaryOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            SummaryOutcome::Generated(text) => Some(text),
            _ => None,
        }
    }
}

/// Sends all bodies to the model in one request.
///
/// Never fails: a missing client or a failed request is reported through the
/// returned outcome.
pub async fn summarize<C>(chat: Option<&C>, model: &str, bodies: &[String]) -> SummaryOutcome
where
    C: ChatCompletion + ?Sized,
{
    let Some(chat) = chat else {
        return SummaryOutcome::Skipped;
    };

    let request = ChatRequest::feedback_digest(model, bodies);
    match chat.complete(&request).await {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                SummaryOutcome::Empty
            } else {
                SummaryOutcome::Generated(text.to_string())
            }
        }
        Err(e) => {
            debug!("chat completion failed: {:?}", e);
            SummaryOutcome::Failed(e)
        }
    }
}
