//! Typed contract between pipeline stages. Every value produced by a
//! non-deterministic source (LLM output, engine output, assembled records)
//! crosses one of these validators before the next stage consumes it.

mod catalog;

use serde_json::Value;
use thiserror::Error;

use crate::model::{
    Analysis, CefrLevel, Chunk, Exercise, GrammarComplexity, ProcessedVideo, SpeechSpeed,
    Timestamp, TranscriptionVariants, TranscriptionView, Translation, VocabularyComplexity,
};

pub use catalog::TopicCatalog;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("schema violation at {path}: {detail}")]
    SchemaViolation { path: String, detail: String },
}

pub type ContractResult<T> = Result<T, ContractError>;

fn violation(path: impl Into<String>, detail: impl Into<String>) -> ContractError {
    ContractError::SchemaViolation {
        path: path.into(),
        detail: detail.into(),
    }
}

pub fn has_cyrillic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
}

pub fn has_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

fn check_timestamp(timestamp: Timestamp, path: &str) -> ContractResult<Timestamp> {
    if !timestamp.start().is_finite() || !timestamp.end().is_finite() {
        return Err(violation(path, "timestamp must be finite"));
    }
    if timestamp.start() < 0.0 {
        return Err(violation(path, "timestamp start must be non-negative"));
    }
    if timestamp.end() < timestamp.start() {
        return Err(violation(path, "timestamp end precedes start"));
    }
    Ok(timestamp)
}

fn check_chunk(chunk: &Chunk, path: &str) -> ContractResult<Chunk> {
    let text = chunk.text.trim();
    if text.is_empty() {
        return Err(violation(path, "chunk text is empty"));
    }
    Ok(Chunk {
        text: text.to_string(),
        timestamp: check_timestamp(chunk.timestamp, path)?,
    })
}

fn check_view(view: &TranscriptionView, path: &str) -> ContractResult<TranscriptionView> {
    let mut chunks = Vec::with_capacity(view.chunks.len());
    for (index, chunk) in view.chunks.iter().enumerate() {
        chunks.push(check_chunk(chunk, &format!("{path}.chunks[{index}]"))?);
    }
    Ok(TranscriptionView {
        full_text: view.full_text.trim().to_string(),
        chunks,
    })
}

/// Normalizes the three views and enforces the cross-view `full_text`
/// equality invariant. The plain view must carry no chunks.
pub fn validate_variants(variants: &TranscriptionVariants) -> ContractResult<TranscriptionVariants> {
    let plain = check_view(&variants.plain, "transcription.plain")?;
    let phrases = check_view(&variants.phrases, "transcription.phrases")?;
    let words = check_view(&variants.words, "transcription.words")?;
    if !plain.chunks.is_empty() {
        return Err(violation(
            "transcription.plain.chunks",
            "plain view must not carry chunks",
        ));
    }
    let full_text = variants.full_text.trim().to_string();
    for (label, view) in [("plain", &plain), ("phrases", &phrases), ("words", &words)] {
        if view.full_text != full_text {
            return Err(violation(
                format!("transcription.{label}.fullText"),
                "full text differs between views",
            ));
        }
    }
    Ok(TranscriptionVariants {
        plain,
        phrases,
        words,
        full_text,
    })
}

/// Normalizes a translation and enforces 1:1 alignment against the phrase
/// view it translates: equal chunk counts and bit-identical timestamps.
pub fn validate_translation(
    translation: &Translation,
    phrases: &TranscriptionView,
) -> ContractResult<Translation> {
    if translation.chunks.len() != phrases.chunks.len() {
        return Err(violation(
            "translation.chunks",
            format!(
                "expected {} chunks, found {}",
                phrases.chunks.len(),
                translation.chunks.len()
            ),
        ));
    }
    let mut chunks = Vec::with_capacity(translation.chunks.len());
    for (index, (chunk, source)) in translation
        .chunks
        .iter()
        .zip(phrases.chunks.iter())
        .enumerate()
    {
        let path = format!("translation.chunks[{index}]");
        let text = chunk.text.trim();
        if text.is_empty() {
            return Err(violation(&path, "translated text is empty"));
        }
        if chunk.timestamp != source.timestamp {
            return Err(violation(&path, "timestamp differs from source chunk"));
        }
        chunks.push(crate::model::TranslatedChunk {
            text: text.to_string(),
            source_text: chunk.source_text.trim().to_string(),
            timestamp: check_timestamp(chunk.timestamp, &path)?,
        });
    }
    Ok(Translation {
        full_text: translation.full_text.trim().to_string(),
        chunks,
    })
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(text) = value.get(*key).and_then(Value::as_str) {
            return Some(text);
        }
    }
    None
}

/// Coerces a raw LLM payload into an [`Analysis`]. Enum fields are matched
/// case-insensitively and stored in canonical casing; unknown topics are
/// dropped through the catalog; missing `topics`/`isAdultContent` take the
/// documented defaults.
pub fn analysis_from_value(value: &Value, catalog: &TopicCatalog) -> ContractResult<Analysis> {
    let object = value
        .as_object()
        .ok_or_else(|| violation("analysis", "expected a JSON object"))?;

    let cefr_level: CefrLevel = string_field(value, &["cefrLevel", "cefr_level"])
        .ok_or_else(|| violation("analysis.cefrLevel", "missing"))?
        .parse()
        .map_err(|_| violation("analysis.cefrLevel", "not a CEFR level"))?;
    let speech_speed: SpeechSpeed = string_field(value, &["speechSpeed", "speech_speed"])
        .ok_or_else(|| violation("analysis.speechSpeed", "missing"))?
        .parse()
        .map_err(|_| violation("analysis.speechSpeed", "not one of slow/normal/fast"))?;
    let grammar_complexity: GrammarComplexity =
        string_field(value, &["grammarComplexity", "grammar_complexity"])
            .ok_or_else(|| violation("analysis.grammarComplexity", "missing"))?
            .parse()
            .map_err(|_| {
                violation(
                    "analysis.grammarComplexity",
                    "not one of simple/intermediate/complex",
                )
            })?;
    let vocabulary_complexity: VocabularyComplexity =
        string_field(value, &["vocabularyComplexity", "vocabulary_complexity"])
            .ok_or_else(|| violation("analysis.vocabularyComplexity", "missing"))?
            .parse()
            .map_err(|_| {
                violation(
                    "analysis.vocabularyComplexity",
                    "not one of basic/intermediate/advanced",
                )
            })?;

    let raw_topics = object
        .get("topics")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let mut topics: Vec<String> = Vec::new();
    for topic in raw_topics.iter().filter_map(|t| catalog.canonicalize(t)) {
        if !topics.iter().any(|existing| existing == topic) {
            topics.push(topic.to_string());
        }
    }
    topics.truncate(3);
    if topics.is_empty() {
        tracing::warn!("no topics matched the catalog; substituting defaults");
        topics = catalog.fallback();
    }

    let is_adult_content = object
        .get("isAdultContent")
        .or_else(|| object.get("is_adult_content"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(Analysis {
        cefr_level,
        speech_speed,
        grammar_complexity,
        vocabulary_complexity,
        topics,
        is_adult_content,
    })
}

fn exercise_from_value(value: &Value, path: &str) -> ContractResult<Exercise> {
    let kind = string_field(value, &["type", "kind"])
        .ok_or_else(|| violation(format!("{path}.type"), "missing"))?
        .trim()
        .to_string();

    let question = string_field(value, &["question"])
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| violation(format!("{path}.question"), "missing or empty"))?
        .to_string();
    if !has_cyrillic(&question) {
        return Err(violation(
            format!("{path}.question"),
            "question must contain Cyrillic",
        ));
    }

    let raw_options = value
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| violation(format!("{path}.options"), "missing"))?;
    let mut options = Vec::with_capacity(raw_options.len());
    for (index, option) in raw_options.iter().enumerate() {
        let text = option
            .as_str()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| violation(format!("{path}.options[{index}]"), "empty option"))?;
        options.push(text.to_string());
    }
    if options.len() != 3 && options.len() != 4 {
        return Err(violation(
            format!("{path}.options"),
            format!("expected 3 or 4 options, found {}", options.len()),
        ));
    }

    let correct_answer = value
        .get("correctAnswer")
        .or_else(|| value.get("correct_answer"))
        .and_then(Value::as_u64)
        .ok_or_else(|| violation(format!("{path}.correctAnswer"), "missing"))?
        as usize;
    if correct_answer >= options.len() {
        return Err(violation(
            format!("{path}.correctAnswer"),
            format!("index {correct_answer} out of range for {} options", options.len()),
        ));
    }

    match kind.as_str() {
        "vocabulary" => {
            let word = string_field(value, &["word"])
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .ok_or_else(|| violation(format!("{path}.word"), "missing or empty"))?
                .to_string();
            // Options quiz the opposite script of the drilled word.
            if has_latin(&word) && !has_cyrillic(&word) {
                for (index, option) in options.iter().enumerate() {
                    if !has_cyrillic(option) {
                        return Err(violation(
                            format!("{path}.options[{index}]"),
                            "options for a Latin word must contain Cyrillic",
                        ));
                    }
                }
            } else if has_cyrillic(&word) {
                for (index, option) in options.iter().enumerate() {
                    if !has_latin(option) {
                        return Err(violation(
                            format!("{path}.options[{index}]"),
                            "options for a Cyrillic word must contain Latin",
                        ));
                    }
                }
            }
            Ok(Exercise::Vocabulary {
                word,
                question,
                options,
                correct_answer,
            })
        }
        "topic" => Ok(Exercise::Topic {
            question,
            options,
            correct_answer,
        }),
        "statementCheck" | "statement_check" => Ok(Exercise::StatementCheck {
            question,
            options,
            correct_answer,
        }),
        other => Err(violation(
            format!("{path}.type"),
            format!("unknown exercise type {other:?}"),
        )),
    }
}

/// Checks the catalog composition after per-exercise normalization:
/// 3–4 vocabulary, exactly 1 topic, at least 1 statement check, 5–6 total.
pub fn validate_exercise_set(exercises: &[Exercise]) -> ContractResult<()> {
    let vocabulary = exercises
        .iter()
        .filter(|e| matches!(e, Exercise::Vocabulary { .. }))
        .count();
    let topic = exercises
        .iter()
        .filter(|e| matches!(e, Exercise::Topic { .. }))
        .count();
    let statement = exercises
        .iter()
        .filter(|e| matches!(e, Exercise::StatementCheck { .. }))
        .count();
    if !(3..=4).contains(&vocabulary) {
        return Err(violation(
            "exercises",
            format!("expected 3 or 4 vocabulary exercises, found {vocabulary}"),
        ));
    }
    if topic != 1 {
        return Err(violation(
            "exercises",
            format!("expected exactly 1 topic exercise, found {topic}"),
        ));
    }
    if statement < 1 {
        return Err(violation(
            "exercises",
            "expected at least 1 statement-check exercise",
        ));
    }
    if !(5..=6).contains(&exercises.len()) {
        return Err(violation(
            "exercises",
            format!("expected 5 or 6 exercises, found {}", exercises.len()),
        ));
    }
    Ok(())
}

/// Coerces a raw LLM payload into a validated exercise catalog.
pub fn exercises_from_value(value: &Value) -> ContractResult<Vec<Exercise>> {
    let entries = value
        .as_array()
        .ok_or_else(|| violation("exercises", "expected a JSON array"))?;
    let mut exercises = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        exercises.push(exercise_from_value(entry, &format!("exercise[{index}]"))?);
    }
    validate_exercise_set(&exercises)?;
    Ok(exercises)
}

/// Validates the composite record before persistence. An empty exercise
/// list is accepted (the exercise stage may be disabled); a non-empty one
/// must satisfy the composition rules.
pub fn validate_processed(
    video: &ProcessedVideo,
    catalog: &TopicCatalog,
) -> ContractResult<ProcessedVideo> {
    let name = video.video_name.trim();
    if name.is_empty() {
        return Err(violation("videoName", "empty"));
    }
    let url = video.video_url.trim();
    if url.is_empty() {
        return Err(violation("videoUrl", "empty"));
    }
    let transcription = validate_variants(&video.transcription)?;
    let translation = validate_translation(&video.translation, &transcription.phrases)?;
    for (index, topic) in video.analysis.topics.iter().enumerate() {
        if !catalog.contains(topic) {
            return Err(violation(
                format!("analysis.topics[{index}]"),
                format!("{topic:?} is not in the topic catalog"),
            ));
        }
    }
    if video.analysis.topics.len() > 3 {
        return Err(violation("analysis.topics", "more than 3 topics"));
    }
    if !video.exercises.is_empty() {
        validate_exercise_set(&video.exercises)?;
    }
    if video.is_adult_content != video.analysis.is_adult_content {
        return Err(violation(
            "isAdultContent",
            "does not mirror analysis.isAdultContent",
        ));
    }
    Ok(ProcessedVideo {
        video_name: name.to_string(),
        video_url: url.to_string(),
        duration_seconds: video.duration_seconds,
        transcription,
        translation,
        analysis: video.analysis.clone(),
        exercises: video.exercises.clone(),
        is_adult_content: video.is_adult_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> TopicCatalog {
        TopicCatalog::new(&[
            "Technology".to_string(),
            "Education".to_string(),
            "Travel".to_string(),
            "Science".to_string(),
        ])
    }

    #[test]
    fn analysis_canonicalizes_enums_and_topics() {
        let value = json!({
            "cefrLevel": "b1",
            "speechSpeed": "Normal",
            "grammarComplexity": "INTERMEDIATE",
            "vocabularyComplexity": "intermediate",
            "topics": ["technology", "education", "Quantum Chromodynamics"],
            "isAdultContent": false,
        });
        let analysis = analysis_from_value(&value, &catalog()).unwrap();
        assert_eq!(analysis.cefr_level, CefrLevel::B1);
        assert_eq!(analysis.topics, vec!["Technology", "Education"]);
        assert!(!analysis.is_adult_content);
    }

    #[test]
    fn analysis_defaults_topics_when_none_survive() {
        let value = json!({
            "cefrLevel": "A2",
            "speechSpeed": "slow",
            "grammarComplexity": "simple",
            "vocabularyComplexity": "basic",
            "topics": ["Astrology"],
        });
        let analysis = analysis_from_value(&value, &catalog()).unwrap();
        assert_eq!(analysis.topics, vec!["Technology", "Education", "Travel"]);
        assert!(!analysis.is_adult_content);
    }

    #[test]
    fn analysis_rejects_unknown_level() {
        let value = json!({
            "cefrLevel": "Z9",
            "speechSpeed": "slow",
            "grammarComplexity": "simple",
            "vocabularyComplexity": "basic",
        });
        let err = analysis_from_value(&value, &catalog()).unwrap_err();
        assert!(err.to_string().contains("analysis.cefrLevel"));
    }

    fn vocabulary(word: &str, options: [&str; 3]) -> serde_json::Value {
        json!({
            "type": "vocabulary",
            "word": word,
            "question": format!("Что означает слово {word}?"),
            "options": options,
            "correctAnswer": 0,
        })
    }

    fn full_set() -> serde_json::Value {
        json!([
            vocabulary("bridge", ["мост", "дом", "река"]),
            vocabulary("river", ["река", "гора", "поле"]),
            vocabulary("house", ["дом", "сад", "лес"]),
            vocabulary("road", ["дорога", "окно", "стол"]),
            {
                "type": "topic",
                "question": "О чём это видео?",
                "options": ["о путешествиях", "о кулинарии", "о спорте"],
                "correctAnswer": 0,
            },
            {
                "type": "statementCheck",
                "question": "Рассказчик переходил мост?",
                "options": ["да", "нет", "не сказано"],
                "correctAnswer": 0,
            },
        ])
    }

    #[test]
    fn exercises_accept_valid_composition() {
        let exercises = exercises_from_value(&full_set()).unwrap();
        assert_eq!(exercises.len(), 6);
        assert_eq!(exercises[4].kind(), "topic");
    }

    #[test]
    fn exercises_reject_out_of_range_answer() {
        let mut set = full_set();
        set[5]["correctAnswer"] = json!(3);
        let err = exercises_from_value(&set).unwrap_err();
        assert!(err.to_string().contains("exercise[5].correctAnswer"));
    }

    #[test]
    fn exercises_reject_missing_topic_exercise() {
        let mut set = full_set().as_array().unwrap().clone();
        set.remove(4);
        let err = exercises_from_value(&Value::Array(set)).unwrap_err();
        assert!(err.to_string().contains("topic exercise"));
    }

    #[test]
    fn vocabulary_scripts_must_not_mix() {
        let mut set = full_set();
        set[0]["options"][1] = json!("house");
        let err = exercises_from_value(&set).unwrap_err();
        assert!(err.to_string().contains("exercise[0].options[1]"));
    }

    #[test]
    fn cyrillic_word_requires_latin_options() {
        let mut set = full_set();
        set[0]["word"] = json!("мост");
        set[0]["options"] = json!(["bridge", "house", "river"]);
        assert!(exercises_from_value(&set).is_ok());
    }

    fn variants(full: &str) -> TranscriptionVariants {
        let chunk = Chunk {
            text: full.to_string(),
            timestamp: Timestamp(0.0, 2.0),
        };
        TranscriptionVariants {
            plain: TranscriptionView {
                full_text: full.to_string(),
                chunks: Vec::new(),
            },
            phrases: TranscriptionView {
                full_text: full.to_string(),
                chunks: vec![chunk.clone()],
            },
            words: TranscriptionView {
                full_text: full.to_string(),
                chunks: vec![chunk],
            },
            full_text: full.to_string(),
        }
    }

    #[test]
    fn variants_require_matching_full_text() {
        let mut bad = variants("hello there");
        bad.words.full_text = "hello".into();
        let err = validate_variants(&bad).unwrap_err();
        assert!(err.to_string().contains("transcription.words.fullText"));
    }

    #[test]
    fn variants_validation_is_idempotent() {
        let input = variants("  hello there  ");
        let once = validate_variants(&input).unwrap();
        let twice = validate_variants(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn translation_alignment_checks_timestamps() {
        let source = variants("hello there").phrases;
        let translation = Translation {
            full_text: "привет".into(),
            chunks: vec![crate::model::TranslatedChunk {
                text: "привет".into(),
                source_text: "hello there".into(),
                timestamp: Timestamp(0.0, 2.5),
            }],
        };
        let err = validate_translation(&translation, &source).unwrap_err();
        assert!(err.to_string().contains("translation.chunks[0]"));
    }
}
