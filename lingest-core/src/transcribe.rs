//! Speech-to-text engine interface. The engine itself is external; the
//! default provider shells out to the whisper CLI and parses its JSON
//! output with word-level timings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::TranscriptionSection;
use crate::model::WordEntry;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcription engine failed with status {status:?}: {stderr}")]
    Engine {
        status: Option<i32>,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse engine output: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type TranscribeResult<T> = Result<T, TranscribeError>;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<EngineWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineTranscript {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<EngineSegment>,
}

impl EngineTranscript {
    /// Word-level entries across all segments, empty words dropped.
    pub fn word_entries(&self) -> Vec<WordEntry> {
        self.segments
            .iter()
            .flat_map(|segment| segment.words.iter())
            .filter_map(|word| {
                let text = word.word.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(WordEntry {
                        text: text.to_string(),
                        start: word.start,
                        end: word.end,
                    })
                }
            })
            .collect()
    }
}

#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Transcribes a mono 16 kHz 16-bit PCM WAV.
    async fn transcribe(&self, audio_path: &Path) -> TranscribeResult<EngineTranscript>;
}

/// ISO-639-1 code for a language name, with named aliases.
pub fn language_code(language: &str) -> String {
    match language.trim().to_lowercase().as_str() {
        "english" => "en".into(),
        "russian" => "ru".into(),
        "spanish" => "es".into(),
        "french" => "fr".into(),
        "german" => "de".into(),
        "italian" => "it".into(),
        "portuguese" => "pt".into(),
        "chinese" => "zh".into(),
        "japanese" => "ja".into(),
        "korean" => "ko".into(),
        "ukrainian" => "uk".into(),
        "polish" => "pl".into(),
        other => other.to_string(),
    }
}

/// Whisper invoked through the configured python executable.
#[derive(Debug, Clone)]
pub struct WhisperSubprocess {
    python: String,
    model: String,
    language: String,
    device: Option<String>,
    beam_size: u32,
    best_of: u32,
    fp16: Option<bool>,
}

impl WhisperSubprocess {
    pub fn from_config(section: &TranscriptionSection) -> Self {
        Self {
            python: section.python_executable.clone(),
            model: section.model.clone(),
            language: language_code(&section.language),
            device: section.device.clone(),
            beam_size: section.beam_size,
            best_of: section.best_of,
            fp16: section.fp16,
        }
    }
}

#[async_trait]
impl SpeechTranscriber for WhisperSubprocess {
    async fn transcribe(&self, audio_path: &Path) -> TranscribeResult<EngineTranscript> {
        let output_dir = audio_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut command = Command::new(&self.python);
        command
            .kill_on_drop(true)
            .arg("-m")
            .arg("whisper")
            .arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--language")
            .arg(&self.language)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(&output_dir)
            .arg("--word_timestamps")
            .arg("True")
            .arg("--beam_size")
            .arg(self.beam_size.to_string())
            .arg("--best_of")
            .arg(self.best_of.to_string());
        if let Some(device) = &self.device {
            command.arg("--device").arg(device);
        }
        if let Some(fp16) = self.fp16 {
            command.arg("--fp16").arg(if fp16 { "True" } else { "False" });
        }

        let output = command.output().await.map_err(|source| TranscribeError::Io {
            path: PathBuf::from(&self.python),
            source,
        })?;
        if !output.status.success() {
            return Err(TranscribeError::Engine {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(audio = %audio_path.display(), "engine finished");

        // The engine names its output after the input file.
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let transcript_path = output_dir.join(format!("{stem}.json"));
        let contents =
            tokio::fs::read_to_string(&transcript_path)
                .await
                .map_err(|source| TranscribeError::Io {
                    path: transcript_path.clone(),
                    source,
                })?;
        let transcript: EngineTranscript = serde_json::from_str(&contents)?;
        let _ = tokio::fs::remove_file(&transcript_path).await;
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_aliases_resolve() {
        assert_eq!(language_code("English"), "en");
        assert_eq!(language_code("russian"), "ru");
        assert_eq!(language_code("de"), "de");
    }

    #[test]
    fn word_entries_flatten_segments_and_trim() {
        let json = r#"{
            "text": "hello world again",
            "segments": [
                {"start": 0.0, "end": 1.0, "text": "hello world", "words": [
                    {"word": " hello", "start": 0.0, "end": 0.4},
                    {"word": "world ", "start": 0.5, "end": 0.9}
                ]},
                {"start": 1.0, "end": 2.0, "text": "again", "words": [
                    {"word": "again", "start": 1.1, "end": 1.6},
                    {"word": "  ", "start": 1.6, "end": 1.7}
                ]}
            ]
        }"#;
        let transcript: EngineTranscript = serde_json::from_str(json).unwrap();
        let words = transcript.word_entries();
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "hello");
        assert_eq!(words[2].text, "again");
    }

    #[test]
    fn segments_without_words_are_tolerated() {
        let json = r#"{"text": "hi", "segments": [{"start": 0.0, "end": 1.0, "text": "hi"}]}"#;
        let transcript: EngineTranscript = serde_json::from_str(json).unwrap();
        assert!(transcript.word_entries().is_empty());
    }
}
