//! Chunked subtitle translation. Batches of phrase chunks go to the model
//! with surrounding context; responses are repaired, aligned by index, and
//! lines that come back without target-script text get one contextual
//! single-line retry. The aligned output is always exactly as long as the
//! input, and every timestamp is copied from the source chunk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::contract::has_cyrillic;
use crate::llm::{repair, GenerationConfig, TextGenerator};
use crate::model::{TranscriptionView, TranslatedChunk, Translation};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation upstream failed after {attempts} attempts: {detail}")]
    Upstream { attempts: u32, detail: String },
}

pub type TranslateResult<T> = Result<T, TranslateError>;

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub source_language: String,
    pub target_language: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    /// Lines of neighboring-batch context included in each prompt.
    pub context_lines: usize,
    /// Budget for the truncated full-transcript context.
    pub transcript_context_chars: usize,
    pub rate_limit_backoff: Duration,
    pub attempt_backoff: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            source_language: "english".into(),
            target_language: "russian".into(),
            batch_size: 60,
            max_attempts: 3,
            context_lines: 4,
            transcript_context_chars: 4_000,
            rate_limit_backoff: Duration::from_secs(30),
            attempt_backoff: Duration::from_millis(300),
        }
    }
}

impl TranslatorConfig {
    fn requires_cyrillic(&self) -> bool {
        matches!(
            self.target_language.trim().to_lowercase().as_str(),
            "russian" | "ru"
        )
    }
}

#[derive(Clone)]
pub struct Translator {
    generator: Arc<dyn TextGenerator>,
    config: TranslatorConfig,
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_wrapping_quotes(text: &str) -> &str {
    const PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}'), ('\u{00ab}', '\u{00bb}')];
    let mut current = text.trim();
    loop {
        let mut stripped = false;
        for (open, close) in PAIRS {
            if current.len() > 1 && current.starts_with(open) && current.ends_with(close) {
                current = current[open.len_utf8()..current.len() - close.len_utf8()].trim();
                stripped = true;
            }
        }
        if !stripped {
            return current;
        }
    }
}

/// Head + tail of the transcript, bounded at `max_chars` characters.
fn truncate_context(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_len = max_chars * 2 / 3;
    let tail_len = max_chars - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text
        .chars()
        .skip(total - tail_len)
        .collect();
    format!("{head}\n[…]\n{tail}")
}

impl Translator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: TranslatorConfig) -> Self {
        Self { generator, config }
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: 0.3,
            ..GenerationConfig::default()
        }
    }

    /// Translates a phrase view. The result has the same chunk count, each
    /// chunk's timestamp copied bit-identical from its source chunk.
    pub async fn translate(&self, phrases: &TranscriptionView) -> TranslateResult<Translation> {
        if phrases.chunks.is_empty() {
            return Ok(Translation::empty());
        }

        let sources: Vec<&str> = phrases.chunks.iter().map(|c| c.text.as_str()).collect();
        let context = truncate_context(&phrases.full_text, self.config.transcript_context_chars);
        let mut translated: Vec<String> = Vec::with_capacity(sources.len());

        let batch_size = self.config.batch_size.max(1);
        for (batch_index, batch) in sources.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let mut lines = self
                .translate_batch(offset, batch, &sources, &context)
                .await?;

            if self.config.requires_cyrillic() {
                for (pos, line) in lines.iter_mut().enumerate() {
                    if has_cyrillic(line) {
                        continue;
                    }
                    let global = offset + pos;
                    let previous = global.checked_sub(1).map(|i| sources[i]);
                    let next = sources.get(global + 1).copied();
                    match self.retry_line(sources[global], previous, next).await {
                        Some(retried) => *line = retried,
                        None => warn!(
                            line = global,
                            "line still lacks Cyrillic after retry; keeping best available text"
                        ),
                    }
                }
            }

            translated.extend(lines);
        }

        let chunks: Vec<TranslatedChunk> = phrases
            .chunks
            .iter()
            .zip(translated)
            .map(|(source, text)| TranslatedChunk {
                text: collapse_whitespace(&text),
                source_text: source.text.clone(),
                timestamp: source.timestamp,
            })
            .collect();
        let full_text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Translation { full_text, chunks })
    }

    async fn translate_batch(
        &self,
        offset: usize,
        batch: &[&str],
        all: &[&str],
        context: &str,
    ) -> TranslateResult<Vec<String>> {
        let prompt = self.batch_prompt(offset, batch, all, context);
        let generation = self.generation_config();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.config.max_attempts {
            match self.generator.generate(&prompt, &generation).await {
                Ok(response) => match self.align_response(&response, offset, batch) {
                    Some(lines) => return Ok(lines),
                    None => {
                        warn!(attempt, offset, "translation response was not a JSON array");
                        last_error = "response was not a JSON array".into();
                        if attempt < self.config.max_attempts {
                            sleep(self.config.attempt_backoff * attempt).await;
                        }
                    }
                },
                Err(err) => {
                    let rate_limited = err.is_rate_limited();
                    warn!(attempt, offset, rate_limited, error = %err, "translation call failed");
                    last_error = err.to_string();
                    if attempt < self.config.max_attempts {
                        if rate_limited {
                            sleep(self.config.rate_limit_backoff).await;
                        } else {
                            sleep(self.config.attempt_backoff * attempt).await;
                        }
                    }
                }
            }
        }

        Err(TranslateError::Upstream {
            attempts: self.config.max_attempts,
            detail: last_error,
        })
    }

    /// Normalizes a raw batch response and aligns it to the expected index
    /// range. Missing or empty slots fall back to the source text.
    fn align_response(&self, response: &str, offset: usize, batch: &[&str]) -> Option<Vec<String>> {
        let items = repair::parse_array(response)?;
        let expected = batch.len();

        let mut normalized: Vec<(usize, String)> = Vec::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            let raw = item.get("text").and_then(Value::as_str).unwrap_or("");
            let cleaned = strip_wrapping_quotes(raw).to_string();
            let text = if cleaned.is_empty() {
                batch.get(pos).map(|s| s.to_string()).unwrap_or_default()
            } else {
                cleaned
            };
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(offset + pos);
            normalized.push((index, text));
        }

        normalized.truncate(expected);
        while normalized.len() < expected {
            let pos = normalized.len();
            normalized.push((offset + pos, batch[pos].to_string()));
        }

        let mut by_index: HashMap<usize, String> = HashMap::with_capacity(expected);
        for (index, text) in normalized {
            if index < offset || index >= offset + expected {
                warn!(index, offset, "unexpected index in translation response");
            }
            match by_index.get(&index) {
                Some(existing) if !existing.is_empty() && text.is_empty() => {}
                _ => {
                    by_index.insert(index, text);
                }
            }
        }

        let mut aligned = Vec::with_capacity(expected);
        for (pos, source) in batch.iter().enumerate() {
            match by_index.remove(&(offset + pos)) {
                Some(text) if !text.is_empty() => aligned.push(text),
                _ => {
                    warn!(
                        index = offset + pos,
                        "missing translation line; falling back to source text"
                    );
                    aligned.push(source.to_string());
                }
            }
        }
        Some(aligned)
    }

    async fn retry_line(
        &self,
        source: &str,
        previous: Option<&str>,
        next: Option<&str>,
    ) -> Option<String> {
        let prompt = self.line_prompt(source, previous, next);
        match self.generator.generate(&prompt, &self.generation_config()).await {
            Ok(response) => {
                let cleaned =
                    collapse_whitespace(strip_wrapping_quotes(&repair::repair(&response)));
                if has_cyrillic(&cleaned) {
                    Some(cleaned)
                } else {
                    None
                }
            }
            Err(err) => {
                warn!(error = %err, "single-line retry failed");
                None
            }
        }
    }

    fn batch_prompt(&self, offset: usize, batch: &[&str], all: &[&str], context: &str) -> String {
        let previous: Vec<String> = all[..offset]
            .iter()
            .rev()
            .take(self.config.context_lines)
            .rev()
            .map(|s| s.to_string())
            .collect();
        let upcoming: Vec<String> = all[offset + batch.len()..]
            .iter()
            .take(self.config.context_lines)
            .map(|s| s.to_string())
            .collect();

        let payload: Vec<Value> = batch
            .iter()
            .enumerate()
            .map(|(pos, text)| serde_json::json!({"index": offset + pos, "text": text}))
            .collect();

        format!(
            "You are a professional subtitle translator from {source} to {target}.\n\n\
             Full transcript (possibly truncated), for context only:\n{context}\n\n\
             Previous lines (context only, do not translate):\n{previous}\n\n\
             Upcoming lines (context only, do not translate):\n{upcoming}\n\n\
             Translate every line in the payload below.\n\n\
             Rules:\n\
             1. Return exactly one translated line per payload line, matched by \"index\".\n\
             2. Never merge, split, or reorder lines.\n\
             3. Never borrow words from a neighboring line.\n\
             4. Respond with a JSON array only: [{{\"index\": <number>, \"text\": \"<translation>\"}}].\n\
             5. No commentary, no markdown, no code fences.\n\
             6. Preserve the punctuation and emphasis of each source line.\n\
             7. Transliterate proper names where a standard {target} localization exists.\n\
             8. Keep numbers and units as written.\n\
             9. If a line cannot be translated, return its source text unchanged.\n\
             10. Every \"text\" value must be written in {target}.\n\n\
             Payload:\n{payload}",
            source = self.config.source_language,
            target = self.config.target_language,
            context = context,
            previous = if previous.is_empty() { "(none)".to_string() } else { previous.join("\n") },
            upcoming = if upcoming.is_empty() { "(none)".to_string() } else { upcoming.join("\n") },
            payload = serde_json::to_string(&payload).unwrap_or_default(),
        )
    }

    fn line_prompt(&self, source: &str, previous: Option<&str>, next: Option<&str>) -> String {
        format!(
            "Translate this single subtitle line from {src} to {target}.\n\
             Previous line: {prev}\n\
             Next line: {next}\n\
             Line: {line}\n\
             Respond with the translated line only, no quotes, no commentary.",
            src = self.config.source_language,
            target = self.config.target_language,
            prev = previous.unwrap_or("(none)"),
            next = next.unwrap_or("(none)"),
            line = source,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResult};
    use crate::model::{Chunk, Timestamp};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        responses: Mutex<VecDeque<LlmResult<String>>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<LlmResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
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

    fn fast_config() -> TranslatorConfig {
        TranslatorConfig {
            rate_limit_backoff: Duration::from_millis(1),
            attempt_backoff: Duration::from_millis(1),
            ..TranslatorConfig::default()
        }
    }

    fn phrase_view(lines: &[&str]) -> TranscriptionView {
        let chunks: Vec<Chunk> = lines
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                text: text.to_string(),
                timestamp: Timestamp(i as f64, i as f64 + 0.9),
            })
            .collect();
        TranscriptionView {
            full_text: lines.join(" "),
            chunks,
        }
    }

    fn batch_json(entries: &[(usize, &str)]) -> String {
        let items: Vec<Value> = entries
            .iter()
            .map(|(index, text)| serde_json::json!({"index": index, "text": text}))
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    #[tokio::test]
    async fn empty_view_short_circuits() {
        let generator = ScriptedGenerator::new(vec![]);
        let translator = Translator::new(generator, fast_config());
        let translation = translator.translate(&phrase_view(&[])).await.unwrap();
        assert!(translation.chunks.is_empty());
        assert!(translation.full_text.is_empty());
    }

    #[tokio::test]
    async fn aligned_output_copies_timestamps() {
        let view = phrase_view(&["good morning", "how are you"]);
        let generator = ScriptedGenerator::new(vec![Ok(batch_json(&[
            (0, "доброе утро"),
            (1, "как дела"),
        ]))]);
        let translator = Translator::new(generator, fast_config());
        let translation = translator.translate(&view).await.unwrap();
        assert_eq!(translation.chunks.len(), 2);
        for (chunk, source) in translation.chunks.iter().zip(view.chunks.iter()) {
            assert_eq!(chunk.timestamp, source.timestamp);
            assert_eq!(chunk.source_text, source.text);
        }
        assert_eq!(translation.full_text, "доброе утро как дела");
    }

    #[tokio::test]
    async fn partial_response_falls_back_then_retries_missing_lines() {
        // Ten lines; the model answers seven, one of them with empty text.
        // Each non-Cyrillic fallback gets a single-line retry.
        let lines: Vec<String> = (0..10).map(|i| format!("line number {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let view = phrase_view(&refs);

        let mut entries: Vec<(usize, &str)> = vec![
            (0, "строка ноль"),
            (1, "строка один"),
            (2, ""),
            (3, "строка три"),
            (4, "строка четыре"),
            (5, "строка пять"),
            (6, "строка шесть"),
        ];
        entries.truncate(7);

        let mut responses = vec![Ok(batch_json(&entries))];
        // Retries for indices 2, 7, 8, 9 (source-text fallbacks without Cyrillic).
        for index in [2usize, 7, 8, 9] {
            responses.push(Ok(format!("строка {index}")));
        }

        let translator = Translator::new(ScriptedGenerator::new(responses), fast_config());
        let translation = translator.translate(&view).await.unwrap();

        assert_eq!(translation.chunks.len(), 10);
        for (chunk, source) in translation.chunks.iter().zip(view.chunks.iter()) {
            assert_eq!(chunk.timestamp, source.timestamp);
            assert!(has_cyrillic(&chunk.text), "chunk {:?}", chunk.text);
        }
        assert_eq!(translation.chunks[2].text, "строка 2");
    }

    #[tokio::test]
    async fn retry_failure_keeps_source_text() {
        let view = phrase_view(&["stubborn line"]);
        let responses = vec![
            Ok(batch_json(&[(0, "still english")])),
            // Single-line retry also fails to produce Cyrillic.
            Ok("still english".to_string()),
        ];
        let translator = Translator::new(ScriptedGenerator::new(responses), fast_config());
        let translation = translator.translate(&view).await.unwrap();
        assert_eq!(translation.chunks.len(), 1);
        assert_eq!(translation.chunks[0].text, "still english");
    }

    #[tokio::test]
    async fn non_array_response_retries_then_succeeds() {
        let view = phrase_view(&["hello"]);
        let responses = vec![
            Ok("I cannot translate this.".to_string()),
            Ok(batch_json(&[(0, "привет")])),
        ];
        let translator = Translator::new(ScriptedGenerator::new(responses), fast_config());
        let translation = translator.translate(&view).await.unwrap();
        assert_eq!(translation.chunks[0].text, "привет");
    }

    #[tokio::test]
    async fn exhausted_attempts_raise_upstream() {
        let view = phrase_view(&["hello"]);
        let responses = vec![
            Err(LlmError::Status {
                status: 500,
                body: "boom".into(),
            }),
            Err(LlmError::Status {
                status: 429,
                body: "slow down".into(),
            }),
            Err(LlmError::Status {
                status: 500,
                body: "boom".into(),
            }),
        ];
        let translator = Translator::new(ScriptedGenerator::new(responses), fast_config());
        let err = translator.translate(&view).await.unwrap_err();
        assert!(matches!(err, TranslateError::Upstream { attempts: 3, .. }));
    }

    #[test]
    fn context_truncation_keeps_head_and_tail() {
        let text = "a".repeat(3000) + &"b".repeat(3000);
        let truncated = truncate_context(&text, 4000);
        assert!(truncated.chars().count() < 4100);
        assert!(truncated.starts_with('a'));
        assert!(truncated.ends_with('b'));
        assert!(truncated.contains("[…]"));
    }

    #[test]
    fn wrapping_quotes_are_stripped() {
        assert_eq!(strip_wrapping_quotes("\"привет\""), "привет");
        assert_eq!(strip_wrapping_quotes("«привет»"), "привет");
        assert_eq!(strip_wrapping_quotes("при\"вет"), "при\"вет");
    }
}
