use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Half-open playback interval in seconds. Serialized as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestamp(pub f64, pub f64);

impl Timestamp {
    pub fn start(&self) -> f64 {
        self.0
    }

    pub fn end(&self) -> f64 {
        self.1
    }

    pub fn duration(&self) -> f64 {
        self.1 - self.0
    }
}

/// A single word with timings as reported by the transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// One subtitle unit at some granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub timestamp: Timestamp,
}

/// One segmentation of a transcription. `full_text` is shared across all
/// views of the same video; only `chunks` differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionView {
    pub full_text: String,
    pub chunks: Vec<Chunk>,
}

/// The three segmentations of one transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionVariants {
    pub plain: TranscriptionView,
    pub phrases: TranscriptionView,
    pub words: TranscriptionView,
    pub full_text: String,
}

/// A translated subtitle line. `timestamp` is copied from the phrase chunk
/// it translates; `source_text` is that chunk's original text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedChunk {
    pub text: String,
    pub source_text: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub full_text: String,
    pub chunks: Vec<TranslatedChunk>,
}

impl Translation {
    pub fn empty() -> Self {
        Self {
            full_text: String::new(),
            chunks: Vec::new(),
        }
    }
}

macro_rules! closed_enum {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let value = value.trim();
                $(if value.eq_ignore_ascii_case($label) {
                    return Ok(Self::$variant);
                })+
                Err(())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum!(CefrLevel {
    A1 => "A1",
    A2 => "A2",
    B1 => "B1",
    B2 => "B2",
    C1 => "C1",
    C2 => "C2",
});

closed_enum!(SpeechSpeed {
    Slow => "slow",
    Normal => "normal",
    Fast => "fast",
});

closed_enum!(GrammarComplexity {
    Simple => "simple",
    Intermediate => "intermediate",
    Complex => "complex",
});

closed_enum!(VocabularyComplexity {
    Basic => "basic",
    Intermediate => "intermediate",
    Advanced => "advanced",
});

/// Content-analysis record for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub cefr_level: CefrLevel,
    pub speech_speed: SpeechSpeed,
    pub grammar_complexity: GrammarComplexity,
    pub vocabulary_complexity: VocabularyComplexity,
    pub topics: Vec<String>,
    pub is_adult_content: bool,
}

/// Auto-generated exercise. The tag discriminates the three kinds; a
/// vocabulary exercise additionally names the word it drills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Exercise {
    #[serde(rename_all = "camelCase")]
    Vocabulary {
        word: String,
        question: String,
        options: Vec<String>,
        correct_answer: usize,
    },
    #[serde(rename_all = "camelCase")]
    Topic {
        question: String,
        options: Vec<String>,
        correct_answer: usize,
    },
    #[serde(rename_all = "camelCase")]
    StatementCheck {
        question: String,
        options: Vec<String>,
        correct_answer: usize,
    },
}

impl Exercise {
    pub fn kind(&self) -> &'static str {
        match self {
            Exercise::Vocabulary { .. } => "vocabulary",
            Exercise::Topic { .. } => "topic",
            Exercise::StatementCheck { .. } => "statementCheck",
        }
    }

    pub fn question(&self) -> &str {
        match self {
            Exercise::Vocabulary { question, .. }
            | Exercise::Topic { question, .. }
            | Exercise::StatementCheck { question, .. } => question,
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            Exercise::Vocabulary { options, .. }
            | Exercise::Topic { options, .. }
            | Exercise::StatementCheck { options, .. } => options,
        }
    }

    pub fn correct_answer(&self) -> usize {
        match self {
            Exercise::Vocabulary { correct_answer, .. }
            | Exercise::Topic { correct_answer, .. }
            | Exercise::StatementCheck { correct_answer, .. } => *correct_answer,
        }
    }
}

/// Composite record emitted per processed video. Mirrors the persisted row
/// and the per-video JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedVideo {
    pub video_name: String,
    pub video_url: String,
    pub duration_seconds: Option<i64>,
    pub transcription: TranscriptionVariants,
    pub translation: Translation,
    pub analysis: Analysis,
    pub exercises: Vec<Exercise>,
    pub is_adult_content: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exercise_tagged_serialization() {
        let exercise = Exercise::Vocabulary {
            word: "bridge".into(),
            question: "Что означает слово bridge?".into(),
            options: vec!["мост".into(), "дом".into(), "река".into()],
            correct_answer: 0,
        };
        let json = serde_json::to_value(&exercise).unwrap();
        assert_eq!(json["type"], "vocabulary");
        assert_eq!(json["correctAnswer"], 0);

        let back: Exercise = serde_json::from_value(json).unwrap();
        assert_eq!(back, exercise);
    }

    #[test]
    fn statement_check_tag_is_camel_case() {
        let exercise = Exercise::StatementCheck {
            question: "Верно ли утверждение?".into(),
            options: vec!["да".into(), "нет".into(), "не сказано".into()],
            correct_answer: 1,
        };
        let json = serde_json::to_value(&exercise).unwrap();
        assert_eq!(json["type"], "statementCheck");
    }

    #[test]
    fn timestamp_serializes_as_pair() {
        let json = serde_json::to_string(&Timestamp(1.5, 3.0)).unwrap();
        assert_eq!(json, "[1.5,3.0]");
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("b1".parse::<CefrLevel>(), Ok(CefrLevel::B1));
        assert_eq!("FAST".parse::<SpeechSpeed>(), Ok(SpeechSpeed::Fast));
        assert!("b7".parse::<CefrLevel>().is_err());
    }

    #[test]
    fn processed_video_round_trips_through_json() {
        let view = TranscriptionView {
            full_text: "hello world".into(),
            chunks: vec![Chunk {
                text: "hello world".into(),
                timestamp: Timestamp(0.0, 1.2),
            }],
        };
        let video = ProcessedVideo {
            video_name: "abc123.mp4".into(),
            video_url: "https://cdn.example.com/videos/abc123/master.m3u8".into(),
            duration_seconds: Some(30),
            transcription: TranscriptionVariants {
                plain: TranscriptionView {
                    full_text: "hello world".into(),
                    chunks: Vec::new(),
                },
                phrases: view.clone(),
                words: view,
                full_text: "hello world".into(),
            },
            translation: Translation {
                full_text: "привет мир".into(),
                chunks: vec![TranslatedChunk {
                    text: "привет мир".into(),
                    source_text: "hello world".into(),
                    timestamp: Timestamp(0.0, 1.2),
                }],
            },
            analysis: Analysis {
                cefr_level: CefrLevel::B1,
                speech_speed: SpeechSpeed::Normal,
                grammar_complexity: GrammarComplexity::Intermediate,
                vocabulary_complexity: VocabularyComplexity::Intermediate,
                topics: vec!["Technology".into()],
                is_adult_content: false,
            },
            exercises: Vec::new(),
            is_adult_content: false,
        };
        let json = serde_json::to_string_pretty(&video).unwrap();
        assert!(json.contains("\"fullText\""));
        assert!(json.contains("\"videoUrl\""));
        let back: ProcessedVideo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, video);
    }
}
