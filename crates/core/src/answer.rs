use crate::config::Settings;
use crate::error::AnswerError;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

pub const NOT_FOUND_ANSWER: &str = "I cannot find this information in these documents.";

const EXTRACTIVE_HEADER: &str = "**Answer (no LLM, extracted from sources):**\n";

const INSURANCE_QA_PROMPT: &str = "\
Role: you are an insurance expert. Answer ONLY from the provided context.
Rules:
- Cite the clause or article and the page explicitly in square brackets.
- If the information is not in the context, say: \"I cannot find this information in these documents.\"
- Do not invent percentages or definitions.
- Be concise (at most 6-8 lines) and list exclusions as bullet points when they appear.

Question: {question}

Context (relevant excerpts):
{context}

Answer:
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Llm,
    Extractive,
    /// The chat backend failed; `reason` is the error that caused the switch.
    ExtractiveFallback { reason: String },
    NotFound,
}

impl Provenance {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Llm => "LLM (OpenAI)",
            Self::Extractive => "extractive",
            Self::ExtractiveFallback { .. } => "extractive (fallback)",
            Self::NotFound => "not found",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub provenance: Provenance,
}

/// Turns a question and its retrieved context into an answer. Never fails:
/// backend problems surface through [`Provenance`].
pub trait AnswerGenerator {
    fn answer(&self, question: &str, context: &str) -> Answer;
}

pub fn render_prompt(question: &str, context: &str) -> String {
    INSURANCE_QA_PROMPT
        .replace("{question}", question)
        .replace("{context}", context)
}

pub fn extractive_answer(context: &str) -> String {
    format!("{EXTRACTIVE_HEADER}{context}")
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl ChatClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
    ) -> Result<Self, AnswerError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|error| {
            AnswerError::BackendResponse {
                backend: base_url.to_string(),
                details: format!("invalid api key: {error}"),
            }
        })?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn complete(&self, prompt: &str) -> Result<String, AnswerError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.1,
        };

        let response = self.client.post(&self.endpoint).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(AnswerError::BackendResponse {
                backend: self.endpoint.clone(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: ChatResponse = response.json()?;
        parsed.into_text(&self.endpoint)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self, backend: &str) -> Result<String, AnswerError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| AnswerError::BackendResponse {
                backend: backend.to_string(),
                details: "response has no message content".to_string(),
            })
    }
}

/// Answers with the chat backend when one is configured, otherwise (or when
/// it fails) by quoting the retrieved context.
pub struct RagChain {
    chat: Option<ChatClient>,
}

impl RagChain {
    pub fn extractive() -> Self {
        Self { chat: None }
    }

    pub fn with_chat(chat: ChatClient) -> Self {
        Self { chat: Some(chat) }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AnswerError> {
        match settings.api_key() {
            Some(api_key) if settings.llm_enabled() => {
                let chat =
                    ChatClient::new(api_key, &settings.openai_base_url, &settings.chat_model)?;
                info!(
                    endpoint = chat.endpoint(),
                    model = %settings.chat_model,
                    "chat backend enabled"
                );
                Ok(Self::with_chat(chat))
            }
            _ => Ok(Self::extractive()),
        }
    }

    pub fn uses_llm(&self) -> bool {
        self.chat.is_some()
    }
}

impl AnswerGenerator for RagChain {
    fn answer(&self, question: &str, context: &str) -> Answer {
        if context.trim().is_empty() {
            return Answer {
                text: NOT_FOUND_ANSWER.to_string(),
                provenance: Provenance::NotFound,
            };
        }

        let Some(chat) = &self.chat else {
            return Answer {
                text: extractive_answer(context),
                provenance: Provenance::Extractive,
            };
        };

        match chat.complete(&render_prompt(question, context)) {
            Ok(text) => Answer {
                text,
                provenance: Provenance::Llm,
            },
            Err(error) => {
                warn!(%error, "chat backend failed, answering extractively");
                Answer {
                    text: extractive_answer(context),
                    provenance: Provenance::ExtractiveFallback {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }
}
