use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::segment::SegmenterParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("configuration {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct LingestConfig {
    pub s3_input: S3InputSection,
    pub storage: StorageSection,
    pub database: DatabaseSection,
    #[serde(default)]
    pub transcription: TranscriptionSection,
    #[serde(default)]
    pub audio_normalization: AudioNormalizationSection,
    #[serde(default)]
    pub video_compression: VideoCompressionSection,
    #[serde(default)]
    pub hls: HlsSection,
    #[serde(default)]
    pub google: GoogleSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default = "default_video_topics")]
    pub video_topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3InputSection {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_pending_prefix")]
    pub pending_prefix: String,
    #[serde(default = "default_processing_prefix")]
    pub processing_prefix: String,
    #[serde(default = "default_completed_prefix")]
    pub completed_prefix: String,
    #[serde(default = "default_failed_prefix")]
    pub failed_prefix: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub enable_polling: bool,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,
}

fn default_pending_prefix() -> String {
    "pending/".into()
}

fn default_processing_prefix() -> String {
    "processing/".into()
}

fn default_completed_prefix() -> String {
    "completed/".into()
}

fn default_failed_prefix() -> String {
    "failed/".into()
}

fn default_polling_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub cdn_domain: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_db_host() -> String {
    "127.0.0.1".into()
}

fn default_db_port() -> u16 {
    3306
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSection {
    #[serde(default = "default_transcription_provider")]
    pub provider: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_transcription_language")]
    pub language: String,
    #[serde(default = "default_phrase_min_words")]
    pub phrase_min_words: usize,
    #[serde(default = "default_phrase_max_words")]
    pub phrase_max_words: usize,
    #[serde(default = "default_phrase_min_duration")]
    pub phrase_min_duration_seconds: f64,
    #[serde(default = "default_phrase_max_duration")]
    pub phrase_max_duration_seconds: f64,
    #[serde(default = "default_word_words")]
    pub word_min_words: usize,
    #[serde(default = "default_word_words")]
    pub word_max_words: usize,
    #[serde(default = "default_max_gap")]
    pub max_gap_between_word_chunks_seconds: f64,
    #[serde(default = "default_python_executable")]
    pub python_executable: String,
    #[serde(default)]
    pub openai_model: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_beam_size")]
    pub beam_size: u32,
    #[serde(default = "default_beam_size")]
    pub best_of: u32,
    #[serde(default)]
    pub fp16: Option<bool>,
}

impl Default for TranscriptionSection {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            model: default_transcription_model(),
            language: default_transcription_language(),
            phrase_min_words: default_phrase_min_words(),
            phrase_max_words: default_phrase_max_words(),
            phrase_min_duration_seconds: default_phrase_min_duration(),
            phrase_max_duration_seconds: default_phrase_max_duration(),
            word_min_words: default_word_words(),
            word_max_words: default_word_words(),
            max_gap_between_word_chunks_seconds: default_max_gap(),
            python_executable: default_python_executable(),
            openai_model: None,
            device: None,
            beam_size: default_beam_size(),
            best_of: default_beam_size(),
            fp16: None,
        }
    }
}

fn default_transcription_provider() -> String {
    "openai".into()
}

fn default_transcription_model() -> String {
    "base".into()
}

fn default_transcription_language() -> String {
    "english".into()
}

fn default_phrase_min_words() -> usize {
    5
}

fn default_phrase_max_words() -> usize {
    9
}

fn default_phrase_min_duration() -> f64 {
    1.0
}

fn default_phrase_max_duration() -> f64 {
    4.5
}

fn default_word_words() -> usize {
    1
}

fn default_max_gap() -> f64 {
    1.5
}

fn default_python_executable() -> String {
    "python3".into()
}

fn default_beam_size() -> u32 {
    5
}

impl TranscriptionSection {
    pub fn phrase_params(&self) -> SegmenterParams {
        SegmenterParams {
            min_words: self.phrase_min_words,
            max_words: self.phrase_max_words,
            max_gap_seconds: self.max_gap_between_word_chunks_seconds,
            min_duration_seconds: Some(self.phrase_min_duration_seconds),
            max_duration_seconds: Some(self.phrase_max_duration_seconds),
        }
    }

    pub fn word_params(&self) -> SegmenterParams {
        SegmenterParams {
            min_words: self.word_min_words,
            max_words: self.word_max_words,
            max_gap_seconds: self.max_gap_between_word_chunks_seconds,
            min_duration_seconds: None,
            max_duration_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioNormalizationSection {
    #[serde(default = "default_true")]
    pub apply: bool,
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,
    #[serde(default = "default_loudness_range")]
    pub loudness_range: f64,
    #[serde(default = "default_true_peak")]
    pub true_peak: f64,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

impl Default for AudioNormalizationSection {
    fn default() -> Self {
        Self {
            apply: true,
            target_lufs: default_target_lufs(),
            loudness_range: default_loudness_range(),
            true_peak: default_true_peak(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_target_lufs() -> f64 {
    -16.0
}

fn default_loudness_range() -> f64 {
    7.0
}

fn default_true_peak() -> f64 {
    -1.5
}

fn default_audio_codec() -> String {
    "aac".into()
}

fn default_audio_bitrate() -> String {
    "192k".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoCompressionSection {
    #[serde(default)]
    pub apply: bool,
    #[serde(default = "default_video_codec")]
    pub codec: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub crf: Option<u32>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default)]
    pub max_bitrate: Option<String>,
    #[serde(default)]
    pub buf_size: Option<String>,
    #[serde(default)]
    pub tune: Option<String>,
}

impl Default for VideoCompressionSection {
    fn default() -> Self {
        Self {
            apply: false,
            codec: default_video_codec(),
            preset: None,
            crf: None,
            max_width: None,
            max_height: None,
            pixel_format: default_pixel_format(),
            max_bitrate: None,
            buf_size: None,
            tune: None,
        }
    }
}

fn default_video_codec() -> String {
    "libx264".into()
}

fn default_pixel_format() -> String {
    "yuv420p".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub include_mp4_fallback: bool,
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,
    #[serde(default = "default_playlist_type")]
    pub playlist_type: String,
    #[serde(default = "default_master_playlist_name")]
    pub master_playlist_name: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,
    #[serde(default = "default_target_frame_rate")]
    pub target_frame_rate: u32,
    #[serde(default = "default_renditions")]
    pub renditions: Vec<HlsRendition>,
}

impl Default for HlsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            include_mp4_fallback: false,
            segment_duration: default_segment_duration(),
            playlist_type: default_playlist_type(),
            master_playlist_name: default_master_playlist_name(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            preset: None,
            keyframe_interval: default_keyframe_interval(),
            target_frame_rate: default_target_frame_rate(),
            renditions: default_renditions(),
        }
    }
}

fn default_segment_duration() -> u32 {
    4
}

fn default_playlist_type() -> String {
    "vod".into()
}

fn default_master_playlist_name() -> String {
    "master.m3u8".into()
}

fn default_keyframe_interval() -> u32 {
    48
}

fn default_target_frame_rate() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsRendition {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

fn default_renditions() -> Vec<HlsRendition> {
    vec![HlsRendition {
        name: "720p".into(),
        width: 1280,
        height: 720,
        video_bitrate: "2800k".into(),
        audio_bitrate: "128k".into(),
    }]
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSection {
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_translation_chunk_size")]
    pub translation_chunk_size: usize,
    #[serde(default = "default_translation_attempts")]
    pub translation_attempts: u32,
}

impl Default for GoogleSection {
    fn default() -> Self {
        Self {
            gemini_model: default_gemini_model(),
            api_key: None,
            target_language: default_target_language(),
            translation_chunk_size: default_translation_chunk_size(),
            translation_attempts: default_translation_attempts(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".into()
}

fn default_target_language() -> String {
    "russian".into()
}

fn default_translation_chunk_size() -> usize {
    60
}

fn default_translation_attempts() -> u32 {
    3
}

impl GoogleSection {
    /// API key from config, falling back to the conventional env variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_work_dir() -> String {
    "work".into()
}

fn default_output_dir() -> String {
    "output".into()
}

fn default_video_topics() -> Vec<String> {
    [
        "Technology", "Education", "Travel", "Food", "Health", "Science", "Sports", "Music",
        "Movies", "Art", "History", "Nature", "Animals", "Business", "Finance", "Politics",
        "Culture", "Fashion", "Gaming", "Books", "Family", "Relationships", "Work", "Career",
        "Hobbies", "Weather", "Transportation", "Shopping", "Cooking", "Fitness", "Medicine",
        "Psychology", "Philosophy", "Religion", "Space", "Environment", "Economics", "Law",
        "News", "Society", "Language", "Humor", "Daily Life", "Architecture", "Photography",
        "Design", "Marketing", "Programming", "Mathematics", "Physics", "Chemistry", "Biology",
        "Geography", "Literature", "Theater",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<LingestConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
