pub mod analyze;
pub mod config;
pub mod contract;
pub mod db;
pub mod driver;
pub mod exercise;
pub mod ingest;
pub mod llm;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod segment;
pub mod transcribe;
pub mod translate;

pub use analyze::{AnalyzeError, Analyzer};
pub use config::{load_config, ConfigError, LingestConfig};
pub use contract::{ContractError, TopicCatalog};
pub use db::{ContentDatabase, DatabaseError};
pub use driver::{BatchReport, DriverError, IngestDriver, VideoReport};
pub use exercise::{ExerciseError, ExerciseGenerator};
pub use ingest::{ArtifactStore, ContentUploader, IngestError, PendingVideo, VideoIntake};
pub use llm::{GeminiClient, GenerationConfig, LlmError, TextGenerator};
pub use media::{MediaError, MediaProcessor, MediaToolkit};
pub use model::{
    Analysis, CefrLevel, Chunk, Exercise, GrammarComplexity, ProcessedVideo, SpeechSpeed,
    Timestamp, TranscriptionVariants, TranscriptionView, TranslatedChunk, Translation,
    VocabularyComplexity, WordEntry,
};
pub use pipeline::{
    PipelineError, PipelineMode, PipelineOutcome, ShutdownToken, VideoPipeline,
};
pub use segment::SegmenterParams;
pub use transcribe::{
    EngineSegment, EngineTranscript, EngineWord, SpeechTranscriber, TranscribeError,
    WhisperSubprocess,
};
pub use translate::{TranslateError, Translator, TranslatorConfig};
