//! Content analysis over the full transcript: CEFR level, pacing,
//! complexity, topics, and the adult-content flag.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::contract::{self, ContractError, TopicCatalog};
use crate::llm::{repair, GenerationConfig, TextGenerator};
use crate::model::Analysis;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("analysis upstream failed after {attempts} attempts: {detail}")]
    Upstream { attempts: u32, detail: String },
}

pub type AnalyzeResult<T> = Result<T, AnalyzeError>;

#[derive(Clone)]
pub struct Analyzer {
    generator: Arc<dyn TextGenerator>,
    catalog: TopicCatalog,
    max_attempts: u32,
    attempt_backoff: Duration,
}

impl Analyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, catalog: TopicCatalog) -> Self {
        Self {
            generator,
            catalog,
            max_attempts: 2,
            attempt_backoff: Duration::from_millis(300),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_attempt_backoff(mut self, backoff: Duration) -> Self {
        self.attempt_backoff = backoff;
        self
    }

    pub async fn analyze(&self, transcript: &str) -> AnalyzeResult<Analysis> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(ContractError::SchemaViolation {
                path: "analysis.transcript".into(),
                detail: "transcript is empty".into(),
            }
            .into());
        }

        let generation = GenerationConfig {
            temperature: 0.2,
            ..GenerationConfig::default()
        };
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            let prompt = self.prompt(transcript, attempt > 1);
            match self.generator.generate(&prompt, &generation).await {
                Ok(response) => match repair::parse_object(&response) {
                    Some(value) => match contract::analysis_from_value(&value, &self.catalog) {
                        Ok(analysis) => return Ok(analysis),
                        Err(err) => {
                            warn!(attempt, error = %err, "analysis payload failed validation");
                            last_error = err.to_string();
                        }
                    },
                    None => {
                        warn!(attempt, "analysis response carried no JSON object");
                        last_error = "response carried no JSON object".into();
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %err, "analysis call failed");
                    last_error = err.to_string();
                    if err.is_rate_limited() && attempt < self.max_attempts {
                        sleep(Duration::from_secs(30)).await;
                        continue;
                    }
                }
            }
            if attempt < self.max_attempts {
                sleep(self.attempt_backoff * attempt).await;
            }
        }

        Err(AnalyzeError::Upstream {
            attempts: self.max_attempts,
            detail: last_error,
        })
    }

    fn prompt(&self, transcript: &str, reinforced: bool) -> String {
        let reminder = if reinforced {
            "\nReturn ONLY valid JSON. No markdown, no code fences, no commentary.\n"
        } else {
            ""
        };
        format!(
            "Analyze this language-learning video transcript.\n\n\
             Respond with a JSON object of exactly this shape:\n\
             {{\n\
               \"cefrLevel\": \"A1|A2|B1|B2|C1|C2\",\n\
               \"speechSpeed\": \"slow|normal|fast\",\n\
               \"grammarComplexity\": \"simple|intermediate|complex\",\n\
               \"vocabularyComplexity\": \"basic|intermediate|advanced\",\n\
               \"topics\": [\"up to 3 topics from the list below\"],\n\
               \"isAdultContent\": true|false\n\
             }}\n\n\
             Allowed topics (choose at most 3, verbatim):\n{topics}\n\n\
             Set \"isAdultContent\" to true only if the transcript contains explicit\n\
             references to sex, graphic violence, or illegal drug use.\n\
             {reminder}\n\
             Transcript:\n{transcript}",
            topics = self.catalog.entries().join(", "),
            reminder = reminder,
            transcript = transcript,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        responses: Mutex<VecDeque<LlmResult<String>>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> LlmResult<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(LlmError::Status {
                        status: 500,
                        body: "script exhausted".into(),
                    })
                })
        }
    }

    fn analyzer(responses: Vec<LlmResult<String>>) -> Analyzer {
        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(responses.into()),
        });
        let catalog = TopicCatalog::new(&[
            "Technology".to_string(),
            "Education".to_string(),
            "Travel".to_string(),
        ]);
        Analyzer::new(generator, catalog).with_attempt_backoff(Duration::from_millis(1))
    }

    const VALID: &str = r#"{
        "cefrLevel": "B1",
        "speechSpeed": "normal",
        "grammarComplexity": "intermediate",
        "vocabularyComplexity": "intermediate",
        "topics": ["Technology", "Education"],
        "isAdultContent": false
    }"#;

    #[tokio::test]
    async fn valid_response_parses_first_try() {
        let analysis = analyzer(vec![Ok(VALID.into())])
            .analyze("hello world")
            .await
            .unwrap();
        assert_eq!(analysis.topics, vec!["Technology", "Education"]);
    }

    #[tokio::test]
    async fn malformed_then_fenced_response_recovers() {
        let fenced = format!("```json\n{VALID}\n```");
        let analysis = analyzer(vec![Ok("no json here".into()), Ok(fenced)])
            .analyze("hello world")
            .await
            .unwrap();
        assert_eq!(analysis.cefr_level.as_str(), "B1");
    }

    #[tokio::test]
    async fn exhausted_attempts_raise_upstream() {
        let err = analyzer(vec![Ok("garbage".into()), Ok("more garbage".into())])
            .analyze("hello world")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Upstream { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn empty_transcript_is_a_schema_violation() {
        let err = analyzer(vec![]).analyze("   ").await.unwrap_err();
        assert!(matches!(err, AnalyzeError::Contract(_)));
    }
}
