use super::*;
use serde::{Deserialize, Serialize};

pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
            client,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl TextProvider for OllamaProvider {
    async fn generate(&self, request: GenRequest) -> TextGenResult<GenText> {
        let prompt = match request.kind {
            GenKind::Question => format!(
                "Write one short icebreaker question for a party game where players answer \
                 anonymously. The room is called \"{}\", round {}. Under 25 words, playful, \
                 safe for mixed company. Reply with the question only.",
                request.room_title, request.round_no
            ),
            GenKind::Answer => format!(
                "Answer this party-game question the way a real player typing on their phone \
                 would: one or two casual sentences, answer only. The question is: {}",
                request.question.as_deref().unwrap_or("(no question)")
            ),
        };

        let ollama_request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            options: request.max_tokens.map(|num_predict| OllamaOptions {
                num_predict: Some(num_predict),
            }),
        };

        let url = format!("{}/api/generate", self.base_url);

        let response = tokio::time::timeout(
            request.timeout,
            self.client.post(&url).json(&ollama_request).send(),
        )
        .await
        .map_err(|_| TextGenError::Timeout(request.timeout))?
        .map_err(|e| TextGenError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TextGenError::Api(format!(
                "Ollama API returned status: {}",
                response.status()
            )));
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| TextGenError::Parse(e.to_string()))?;

        let text = ollama_response.response.trim().to_string();
        let format = match request.kind {
            GenKind::Question => infer_format(&text),
            GenKind::Answer => AnswerFormat::FreeText,
        };

        Ok(GenText { text, format })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
