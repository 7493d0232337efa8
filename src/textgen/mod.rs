//! Text-generation collaborator: produces question and answer suggestions.
//!
//! Providers are tried in order; a slow or failing provider is logged and
//! skipped, and when every provider fails the manager returns a canned line.
//! Callers never block on provider trouble and never see an error.

mod ollama;
mod openai;

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::protocol::AnswerFormat;

pub type TextGenResult<T> = Result<T, TextGenError>;

#[derive(Debug, thiserror::Error)]
pub enum TextGenError {
    #[error("provider request failed: {0}")]
    Api(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("response parsing failed: {0}")]
    Parse(String),
}

/// What kind of text is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenKind {
    Question,
    Answer,
}

/// Room/round context handed to a provider
#[derive(Debug, Clone)]
pub struct GenRequest {
    pub kind: GenKind,
    pub room_title: String,
    pub round_no: u32,
    /// The question being answered; set only for `GenKind::Answer`
    pub question: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// Generated text plus the answer-format hint a question carries
#[derive(Debug, Clone)]
pub struct GenText {
    pub text: String,
    pub format: AnswerFormat,
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate(&self, request: GenRequest) -> TextGenResult<GenText>;

    fn name(&self) -> &str;
}

/// Guess the answer format a question expects from its opening words
pub fn infer_format(question: &str) -> AnswerFormat {
    const YES_NO_OPENERS: &[&str] = &[
        "is ", "are ", "do ", "does ", "did ", "can ", "could ", "would ", "should ", "will ",
        "have ", "has ", "was ", "were ",
    ];
    let lowered = question.trim().to_lowercase();
    if YES_NO_OPENERS.iter().any(|w| lowered.starts_with(w)) {
        AnswerFormat::YesNo
    } else {
        AnswerFormat::FreeText
    }
}

const CANNED_QUESTIONS: &[(&str, AnswerFormat)] = &[
    (
        "What is the most useless talent you have?",
        AnswerFormat::FreeText,
    ),
    (
        "Would you rather fight one horse-sized duck or a hundred duck-sized horses?",
        AnswerFormat::FreeText,
    ),
    (
        "What would you do with an extra hour every day?",
        AnswerFormat::FreeText,
    ),
    ("Is cereal a soup?", AnswerFormat::YesNo),
    (
        "What smell brings back the strongest memory for you?",
        AnswerFormat::FreeText,
    ),
    ("Do you talk to yourself out loud?", AnswerFormat::YesNo),
];

const CANNED_ANSWERS: &[&str] = &[
    "Honestly, I'd rather not say.",
    "Whatever the person before me said, but louder.",
    "I plead the fifth on this one.",
    "Ask me again after the next round.",
];

/// A fallback question when no provider can deliver
pub fn canned_question() -> GenText {
    let idx = rand::rng().random_range(0..CANNED_QUESTIONS.len());
    let (text, format) = CANNED_QUESTIONS[idx];
    GenText {
        text: text.to_string(),
        format,
    }
}

/// A fallback answer when no provider can deliver
pub fn canned_answer() -> GenText {
    let idx = rand::rng().random_range(0..CANNED_ANSWERS.len());
    GenText {
        text: CANNED_ANSWERS[idx].to_string(),
        format: AnswerFormat::FreeText,
    }
}

/// Tries providers in order and falls back to canned lines
pub struct TextGenManager {
    providers: Vec<Box<dyn TextProvider>>,
    timeout: Duration,
    max_tokens: u32,
}

impl TextGenManager {
    pub fn new(providers: Vec<Box<dyn TextProvider>>, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            providers,
            timeout,
            max_tokens,
        }
    }

    pub async fn question(&self, room_title: &str, round_no: u32) -> GenText {
        self.generate(GenKind::Question, room_title, round_no, None)
            .await
    }

    pub async fn answer(&self, room_title: &str, round_no: u32, question: &str) -> GenText {
        self.generate(
            GenKind::Answer,
            room_title,
            round_no,
            Some(question.to_string()),
        )
        .await
    }

    async fn generate(
        &self,
        kind: GenKind,
        room_title: &str,
        round_no: u32,
        question: Option<String>,
    ) -> GenText {
        let request = GenRequest {
            kind,
            room_title: room_title.to_string(),
            round_no,
            question,
            max_tokens: Some(self.max_tokens),
            timeout: self.timeout,
        };

        for provider in &self.providers {
            match provider.generate(request.clone()).await {
                Ok(text) if !text.text.is_empty() => return text,
                Ok(_) => {
                    tracing::warn!(provider = provider.name(), "Provider returned empty text");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), "Provider failed: {}", e);
                }
            }
        }

        tracing::debug!(?kind, "All providers failed, using canned text");
        match kind {
            GenKind::Question => canned_question(),
            GenKind::Answer => canned_answer(),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct TextGenConfig {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl Default for TextGenConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            timeout: Duration::from_secs(10),
            max_tokens: 120,
        }
    }
}

impl TextGenConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let openai_model = std::env::var("OPENAI_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or(defaults.openai_model);

        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(url) => {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => defaults.ollama_base_url,
        };

        let ollama_model = std::env::var("OLLAMA_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or(defaults.ollama_model);

        Self {
            openai_api_key,
            openai_model,
            ollama_base_url,
            ollama_model,
            timeout: std::env::var("TEXTGEN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_tokens: std::env::var("TEXTGEN_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
        }
    }

    /// Build a manager with every configured provider
    pub fn build_manager(&self) -> TextGenResult<TextGenManager> {
        let mut providers: Vec<Box<dyn TextProvider>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )));
        }

        if providers.is_empty() {
            return Err(TextGenError::Config(
                "No text providers configured. Set OPENAI_API_KEY or OLLAMA_BASE_URL".to_string(),
            ));
        }

        Ok(TextGenManager::new(
            providers,
            self.timeout,
            self.max_tokens,
        ))
    }
}
