use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::Classifier,
    error::{CbilError, Result},
    provider::Provider,
    types::{CbilLevel, Classification, Utterance},
};

const BACKEND_NAME: &str = "remote_llm";

static CBIL_CLASSIFICATION_PROMPT: &str = r#"
  You are an instructional coach classifying teacher utterances from a lesson
  transcript by cognitive demand (CBIL, Cognitive Behavioral Instruction Level).

  LEVELS:
  1 - simple confirmation (yes/no checks, acknowledgements)
  2 - fact recall (names, dates, definitions repeated from memory)
  3 - concept explanation (explaining or illustrating a concept)
  4 - analytical thinking (why/how questions, comparison, cause and effect)
  5 - synthesis (connecting ideas, summarising across topics)
  6 - evaluative judgment (judging, justifying, weighing alternatives)
  7 - creative application (designing, proposing, inventing new solutions)

  INPUT: a single utterance, optionally with its speaker.

  OUTPUT: Return ONLY valid JSON:
  {"level": <1-7>, "confidence": <0.0-1.0>, "rationale": "one short sentence"}

  RULES:
  - Pick the single level that best matches the cognitive demand placed on students
  - When two levels fit equally, choose the higher one
  - Output ONLY JSON, nothing else
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub provider: Provider,
    /// Overrides the provider's default endpoint.
    pub api_url: Option<String>,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    pub temperature: f64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_url: None,
            model: None,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    level: u8,
    confidence: f64,
    rationale: Option<String>,
}

pub struct RemoteLlmClassifier {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

impl RemoteLlmClassifier {
    /// The API key is supplied by the caller; this backend never reads the
    /// process environment.
    ///
    /// The client carries no timeout of its own; the per-call budget belongs
    /// to [`crate::classifier::BatchClassifier`].
    pub fn new(config: &RemoteConfig, api_key: String) -> Result<Self> {
        let provider_config = config.provider.config();
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| provider_config.api_url.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| provider_config.model.to_string()),
            api_key,
            temperature: config.temperature,
        })
    }

    fn user_prompt(utterance: &Utterance) -> String {
        match &utterance.speaker {
            Some(speaker) => format!("Speaker: {}\nUtterance: {}", speaker, utterance.text),
            None => format!("Utterance: {}", utterance.text),
        }
    }

    fn transport_error(err: reqwest::Error) -> CbilError {
        if err.is_connect() || err.is_timeout() {
            CbilError::BackendUnavailable {
                backend: BACKEND_NAME,
                reason: err.to_string(),
            }
        } else {
            CbilError::ApiError(err)
        }
    }
}

/// Parse the model's JSON answer, tolerating a surrounding markdown fence.
pub(crate) fn parse_verdict(content: &str, utterance_index: usize) -> Result<Classification> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let verdict: LlmVerdict = serde_json::from_str(body).map_err(|e| CbilError::Backend {
        backend: BACKEND_NAME,
        reason: format!("unparseable verdict: {e}"),
    })?;

    let level = CbilLevel::from_number(verdict.level).ok_or_else(|| CbilError::Backend {
        backend: BACKEND_NAME,
        reason: format!("level {} outside 1..=7", verdict.level),
    })?;

    let confidence = if verdict.confidence.is_finite() {
        verdict.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(Classification {
        utterance_index,
        level,
        confidence,
        rationale: verdict.rationale,
    })
}

#[async_trait]
impl Classifier for RemoteLlmClassifier {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn classify(&self, utterance: &Utterance) -> Result<Classification> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": CBIL_CLASSIFICATION_PROMPT,
                    },
                    {
                        "role": "user",
                        "content": Self::user_prompt(utterance),
                    },
                ],
                "temperature": self.temperature,
            }))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CbilError::BackendUnavailable {
                backend: BACKEND_NAME,
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(CbilError::Backend {
                backend: BACKEND_NAME,
                reason: format!("HTTP {status}"),
            });
        }

        let response = response
            .json::<serde_json::Value>()
            .await
            .map_err(Self::transport_error)?;

        // Extract content from response - chat completions format
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CbilError::Backend {
                backend: BACKEND_NAME,
                reason: format!("Invalid API response: {:?}", response),
            })?;

        parse_verdict(content, utterance.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_verdict() {
        let c = parse_verdict(
            r#"{"level": 4, "confidence": 0.8, "rationale": "asks for causes"}"#,
            7,
        )
        .unwrap();
        assert_eq!(c.utterance_index, 7);
        assert_eq!(c.level, CbilLevel::AnalyticalThinking);
        assert_eq!(c.confidence, 0.8);
        assert_eq!(c.rationale.as_deref(), Some("asks for causes"));
    }

    #[test]
    fn strips_markdown_fence() {
        let c = parse_verdict("```json\n{\"level\": 6, \"confidence\": 0.5}\n```", 0).unwrap();
        assert_eq!(c.level, CbilLevel::EvaluativeJudgment);
        assert_eq!(c.rationale, None);
    }

    #[test]
    fn clamps_confidence() {
        let c = parse_verdict(r#"{"level": 2, "confidence": 1.7}"#, 0).unwrap();
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn rejects_out_of_range_level() {
        let err = parse_verdict(r#"{"level": 8, "confidence": 0.9}"#, 0).unwrap_err();
        assert!(matches!(err, CbilError::Backend { .. }));
    }

    #[test]
    fn rejects_prose() {
        let err = parse_verdict("I think this is level 3.", 0).unwrap_err();
        assert!(matches!(err, CbilError::Backend { .. }));
    }

    #[test]
    fn overrides_take_precedence_over_provider_defaults() {
        let config = RemoteConfig {
            provider: Provider::Openai,
            api_url: Some("http://localhost:8080/v1/chat/completions".to_string()),
            model: None,
            temperature: 0.0,
        };
        let classifier = RemoteLlmClassifier::new(&config, "test-key".to_string()).unwrap();
        assert_eq!(classifier.api_url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(classifier.model, "gpt-5.1");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error_not_a_panic() {
        let config = RemoteConfig {
            api_url: Some("http://127.0.0.1:9/v1/chat/completions".to_string()),
            ..RemoteConfig::default()
        };
        let classifier = RemoteLlmClassifier::new(&config, "test-key".to_string()).unwrap();
        let result = classifier.classify(&Utterance::new(0, "Why?")).await;
        assert!(matches!(
            result,
            Err(CbilError::BackendUnavailable { .. }) | Err(CbilError::ApiError(_))
        ));
    }
}
