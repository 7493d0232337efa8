use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};

const QUESTION_SYSTEM: &str = "You write one short icebreaker question for a party game where \
    players answer anonymously. Keep it under 25 words, playful but safe for mixed company. \
    Reply with the question only, no quotes, no commentary.";

const ANSWER_SYSTEM: &str = "You answer an icebreaker question in a party game the way a real \
    player typing on their phone would: one or two casual sentences, no lists, no hedging \
    preamble. Reply with the answer only.";

pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self { client, model }
    }
}

#[async_trait]
impl TextProvider for OpenAiProvider {
    async fn generate(&self, request: GenRequest) -> TextGenResult<GenText> {
        let (system, user) = match request.kind {
            GenKind::Question => (
                QUESTION_SYSTEM,
                format!(
                    "The room is called \"{}\" and this is round {}. Write the question:",
                    request.room_title, request.round_no
                ),
            ),
            GenKind::Answer => (
                ANSWER_SYSTEM,
                format!(
                    "The question is: {}",
                    request.question.as_deref().unwrap_or("(no question)")
                ),
            ),
        };

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages([
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| TextGenError::Api(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| TextGenError::Api(e.to_string()))?
                .into(),
        ]);
        if let Some(max_tokens) = request.max_tokens {
            builder.max_tokens(max_tokens);
        }
        let chat_request = builder
            .build()
            .map_err(|e| TextGenError::Api(e.to_string()))?;

        let response =
            tokio::time::timeout(request.timeout, self.client.chat().create(chat_request))
                .await
                .map_err(|_| TextGenError::Timeout(request.timeout))?
                .map_err(|e| TextGenError::Api(e.to_string()))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| TextGenError::Parse("No content in response".to_string()))?
            .trim()
            .to_string();

        let format = match request.kind {
            GenKind::Question => infer_format(&text),
            GenKind::Answer => AnswerFormat::FreeText,
        };

        Ok(GenText { text, format })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with actual API key
    async fn test_openai_generate_question() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let provider = OpenAiProvider::new(api_key, "gpt-4o-mini".to_string());

        let request = GenRequest {
            kind: GenKind::Question,
            room_title: "Friday Night".to_string(),
            round_no: 1,
            question: None,
            max_tokens: Some(60),
            timeout: Duration::from_secs(30),
        };

        let text = provider.generate(request).await.unwrap();
        assert!(!text.text.is_empty());
        println!("Generated question: {}", text.text);
    }
}
