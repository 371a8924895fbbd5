//! Exercise generation: six learner exercises per video under the
//! composition rules checked by the contract layer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::contract::{self, ContractError};
use crate::llm::{repair, GenerationConfig, TextGenerator};
use crate::model::Exercise;

#[derive(Debug, Error)]
pub enum ExerciseError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("exercise upstream failed after {attempts} attempts: {detail}")]
    Upstream { attempts: u32, detail: String },
}

pub type ExerciseResult<T> = Result<T, ExerciseError>;

#[derive(Clone)]
pub struct ExerciseGenerator {
    generator: Arc<dyn TextGenerator>,
    max_attempts: u32,
    attempt_backoff: Duration,
}

impl ExerciseGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
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

    pub async fn generate(&self, transcript: &str) -> ExerciseResult<Vec<Exercise>> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(ContractError::SchemaViolation {
                path: "exercises.transcript".into(),
                detail: "transcript is empty".into(),
            }
            .into());
        }

        let generation = GenerationConfig {
            temperature: 0.4,
            ..GenerationConfig::default()
        };
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            let prompt = self.prompt(transcript, attempt > 1);
            match self.generator.generate(&prompt, &generation).await {
                Ok(response) => match repair::parse_array(&response) {
                    Some(items) => {
                        match contract::exercises_from_value(&Value::Array(items)) {
                            Ok(exercises) => return Ok(exercises),
                            Err(err) => {
                                warn!(attempt, error = %err, "exercise payload failed validation");
                                last_error = err.to_string();
                            }
                        }
                    }
                    None => {
                        warn!(attempt, "exercise response carried no JSON array");
                        last_error = "response carried no JSON array".into();
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %err, "exercise call failed");
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

        Err(ExerciseError::Upstream {
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
            "Create exactly 6 exercises for Russian-speaking learners from this\n\
             video transcript.\n\n\
             Respond with a JSON array of exercise objects:\n\
             - 4 objects with \"type\": \"vocabulary\": each has \"word\" (a word from\n\
               the transcript), \"question\" (in Russian), \"options\" (3 or 4 strings),\n\
               and \"correctAnswer\" (0-based index). If the word is in Latin script the\n\
               options must be Russian translations; if the word is Russian the options\n\
               must be in Latin script.\n\
             - 1 object with \"type\": \"topic\": a question in Russian about what the\n\
               video is about, with 3 or 4 options and \"correctAnswer\".\n\
             - 1 object with \"type\": \"statementCheck\": a true/false/not-stated style\n\
               question in Russian about a statement from the video, with 3 or 4 options\n\
               and \"correctAnswer\".\n\n\
             Every \"question\" must be written in Russian.\n\
             {reminder}\n\
             Transcript:\n{transcript}",
            reminder = reminder,
            transcript = transcript,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationConfig, LlmError, LlmResult};
    use async_trait::async_trait;
    use serde_json::json;
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

    fn generator(responses: Vec<LlmResult<String>>) -> ExerciseGenerator {
        ExerciseGenerator::new(Arc::new(ScriptedGenerator {
            responses: Mutex::new(responses.into()),
        }))
        .with_attempt_backoff(Duration::from_millis(1))
    }

    fn valid_set() -> String {
        let vocab = |word: &str, options: [&str; 3]| {
            json!({
                "type": "vocabulary",
                "word": word,
                "question": format!("Что означает слово {word}?"),
                "options": options,
                "correctAnswer": 0,
            })
        };
        serde_json::to_string(&json!([
            vocab("bridge", ["мост", "дом", "река"]),
            vocab("river", ["река", "гора", "поле"]),
            vocab("house", ["дом", "сад", "лес"]),
            vocab("road", ["дорога", "окно", "стол"]),
            {
                "type": "topic",
                "question": "О чём это видео?",
                "options": ["о городе", "о еде", "о музыке"],
                "correctAnswer": 0,
            },
            {
                "type": "statementCheck",
                "question": "Рассказчик живёт у реки?",
                "options": ["да", "нет", "не сказано"],
                "correctAnswer": 2,
            },
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn valid_set_parses() {
        let exercises = generator(vec![Ok(valid_set())])
            .generate("a walk through the city")
            .await
            .unwrap();
        assert_eq!(exercises.len(), 6);
        assert_eq!(
            exercises
                .iter()
                .filter(|e| e.kind() == "vocabulary")
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn invalid_composition_retries_then_fails() {
        // Five vocabulary items, no topic exercise: rejected on both attempts.
        let vocab_only = serde_json::to_string(&json!([
            {"type": "vocabulary", "word": "a", "question": "Вопрос?", "options": ["м", "н", "о"], "correctAnswer": 0},
        ]))
        .unwrap();
        let err = generator(vec![Ok(vocab_only.clone()), Ok(vocab_only)])
            .generate("text")
            .await
            .unwrap_err();
        assert!(matches!(err, ExerciseError::Upstream { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn fenced_response_recovers_on_second_attempt() {
        let fenced = format!("```json\n{}\n```", valid_set());
        let exercises = generator(vec![Ok("sorry, here it is:".into()), Ok(fenced)])
            .generate("text")
            .await
            .unwrap();
        assert_eq!(exercises.len(), 6);
    }
}
