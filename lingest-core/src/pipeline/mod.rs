//! Per-video orchestration: a linear stage graph from a downloaded source
//! file to the uploaded artifacts and the persisted record. Intermediate
//! files are tracked and removed on every exit path; the source file is
//! removed only when the whole run succeeded.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use thiserror::Error;
use tracing::{info, warn};

use crate::analyze::{AnalyzeError, Analyzer};
use crate::config::{
    AudioNormalizationSection, HlsSection, LingestConfig, TranscriptionSection,
    VideoCompressionSection,
};
use crate::contract::{self, ContractError, TopicCatalog};
use crate::db::{ContentDatabase, DatabaseError};
use crate::exercise::{ExerciseError, ExerciseGenerator};
use crate::ingest::{ArtifactStore, IngestError};
use crate::media::{MediaError, MediaProcessor};
use crate::model::{ProcessedVideo, Translation};
use crate::segment;
use crate::transcribe::{SpeechTranscriber, TranscribeError};
use crate::translate::{TranslateError, Translator};

const UPLOAD_PREFIX: &str = "videos";
const SAFE_ID_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Transcribe(#[from] TranscribeError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Exercise(#[from] ExerciseError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Storage(#[from] IngestError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("processing cancelled")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Two-level shutdown signal. A stop request is honored between videos; a
/// cancel is honored at every stage boundary inside a video.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    stop: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Stage-inclusion policy over the common pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    #[default]
    Full,
    NoExercises,
    TranscriptionOnly,
}

impl PipelineMode {
    pub fn exercises_enabled(&self) -> bool {
        matches!(self, PipelineMode::Full)
    }

    pub fn persistence_enabled(&self) -> bool {
        !matches!(self, PipelineMode::TranscriptionOnly)
    }
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "full" => Ok(PipelineMode::Full),
            "no-exercises" | "no_exercises" => Ok(PipelineMode::NoExercises),
            "transcription-only" | "transcription_only" => Ok(PipelineMode::TranscriptionOnly),
            other => Err(format!("unknown pipeline mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub safe_name: String,
    pub video_url: String,
    pub duration_seconds: Option<i64>,
    pub record_id: Option<u64>,
    pub artifact_path: Option<PathBuf>,
}

pub fn generate_safe_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SAFE_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Default)]
struct Scratch {
    paths: Vec<PathBuf>,
}

impl Scratch {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

#[derive(Clone)]
pub struct VideoPipeline {
    media: Arc<dyn MediaProcessor>,
    transcriber: Arc<dyn SpeechTranscriber>,
    translator: Translator,
    analyzer: Analyzer,
    exercises: ExerciseGenerator,
    uploader: Arc<dyn ArtifactStore>,
    database: Option<Arc<ContentDatabase>>,
    catalog: TopicCatalog,
    transcription: TranscriptionSection,
    audio_normalization: AudioNormalizationSection,
    video_compression: VideoCompressionSection,
    hls: HlsSection,
    work_dir: PathBuf,
    output_dir: PathBuf,
    mode: PipelineMode,
}

impl VideoPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media: Arc<dyn MediaProcessor>,
        transcriber: Arc<dyn SpeechTranscriber>,
        translator: Translator,
        analyzer: Analyzer,
        exercises: ExerciseGenerator,
        uploader: Arc<dyn ArtifactStore>,
        catalog: TopicCatalog,
        config: &LingestConfig,
    ) -> Self {
        Self {
            media,
            transcriber,
            translator,
            analyzer,
            exercises,
            uploader,
            database: None,
            catalog,
            transcription: config.transcription.clone(),
            audio_normalization: config.audio_normalization.clone(),
            video_compression: config.video_compression.clone(),
            hls: config.hls.clone(),
            work_dir: PathBuf::from(&config.paths.work_dir),
            output_dir: PathBuf::from(&config.paths.output_dir),
            mode: PipelineMode::Full,
        }
    }

    pub fn with_database(mut self, database: Arc<ContentDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Runs the stage graph for one local video. The cleanup contract holds
    /// on every exit path.
    pub async fn process(
        &self,
        source_path: &Path,
        shutdown: &ShutdownToken,
    ) -> PipelineResult<PipelineOutcome> {
        let mut scratch = Scratch::default();
        let result = self.run_stages(source_path, shutdown, &mut scratch).await;
        self.cleanup(&scratch, result.is_ok(), source_path).await;
        result
    }

    async fn run_stages(
        &self,
        source_path: &Path,
        shutdown: &ShutdownToken,
        scratch: &mut Scratch,
    ) -> PipelineResult<PipelineOutcome> {
        shutdown.ensure_active()?;
        for dir in [&self.work_dir, &self.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| PipelineError::Io {
                    path: dir.clone(),
                    source,
                })?;
        }

        let safe_id = generate_safe_id();
        let extension = source_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "mp4".to_string());
        let safe_name = format!("{safe_id}.{extension}");
        info!(source = %source_path.display(), safe_name, "processing video");

        let extraction = self
            .media
            .extract_audio(source_path, &self.work_dir, &safe_id)
            .await?;
        scratch.track(extraction.audio_path.clone());
        shutdown.ensure_active()?;

        let transcript = self.transcriber.transcribe(&extraction.audio_path).await?;
        shutdown.ensure_active()?;

        let words = transcript.word_entries();
        let variants = segment::build_variants(
            &transcript.text,
            &words,
            &self.transcription.phrase_params(),
            &self.transcription.word_params(),
        );
        let variants = contract::validate_variants(&variants)?;
        info!(
            phrases = variants.phrases.chunks.len(),
            words = variants.words.chunks.len(),
            "transcription segmented"
        );
        shutdown.ensure_active()?;

        if self.mode == PipelineMode::TranscriptionOnly {
            let deliverable = self.prepare_deliverable(source_path, &safe_name, scratch).await?;
            shutdown.ensure_active()?;
            let video_url = self
                .package_and_upload(&deliverable, &safe_id, &safe_name, scratch)
                .await?;
            let artifact_path = self
                .write_artifact(&safe_id, &serde_json::to_value(&variants).ok())
                .await?;
            return Ok(PipelineOutcome {
                safe_name,
                video_url,
                duration_seconds: extraction.duration_seconds,
                record_id: None,
                artifact_path,
            });
        }

        let translation = self.translator.translate(&variants.phrases).await?;
        let translation = if translation.chunks.is_empty() {
            Translation::empty()
        } else {
            contract::validate_translation(&translation, &variants.phrases)?
        };
        shutdown.ensure_active()?;

        let analysis = self.analyzer.analyze(&variants.full_text).await?;
        shutdown.ensure_active()?;

        let exercises = if self.mode.exercises_enabled() {
            self.exercises.generate(&variants.full_text).await?
        } else {
            Vec::new()
        };
        shutdown.ensure_active()?;

        let deliverable = self.prepare_deliverable(source_path, &safe_name, scratch).await?;
        shutdown.ensure_active()?;

        let video_url = self
            .package_and_upload(&deliverable, &safe_id, &safe_name, scratch)
            .await?;
        shutdown.ensure_active()?;

        let is_adult_content = analysis.is_adult_content;
        let processed = ProcessedVideo {
            video_name: safe_name.clone(),
            video_url,
            duration_seconds: extraction.duration_seconds,
            transcription: variants,
            translation,
            analysis,
            exercises,
            is_adult_content,
        };
        let processed = contract::validate_processed(&processed, &self.catalog)?;

        let record_id = match &self.database {
            Some(database) => Some(database.insert_video(&processed).await?),
            None => None,
        };

        let artifact_path = self
            .write_artifact(&safe_id, &serde_json::to_value(&processed).ok())
            .await?;

        Ok(PipelineOutcome {
            safe_name: processed.video_name,
            video_url: processed.video_url,
            duration_seconds: processed.duration_seconds,
            record_id,
            artifact_path,
        })
    }

    /// Normalizes the source (when enabled) and makes sure the on-disk
    /// basename equals the safe name. The source file itself is never moved.
    async fn prepare_deliverable(
        &self,
        source_path: &Path,
        safe_name: &str,
        scratch: &mut Scratch,
    ) -> PipelineResult<PathBuf> {
        let deliverable = if self.audio_normalization.apply || self.video_compression.apply {
            let normalized = self
                .media
                .normalize_audio(
                    source_path,
                    &self.work_dir,
                    &self.audio_normalization,
                    &self.video_compression,
                )
                .await?;
            scratch.track(normalized.clone());
            normalized
        } else {
            source_path.to_path_buf()
        };

        let target = self.work_dir.join(safe_name);
        if deliverable == target {
            return Ok(target);
        }
        if deliverable == source_path {
            tokio::fs::copy(&deliverable, &target)
                .await
                .map_err(|source| PipelineError::Io {
                    path: target.clone(),
                    source,
                })?;
        } else if let Err(err) = tokio::fs::rename(&deliverable, &target).await {
            // Cross-device moves fail; fall back to copy + unlink.
            warn!(error = %err, from = %deliverable.display(), "rename failed; copying instead");
            tokio::fs::copy(&deliverable, &target)
                .await
                .map_err(|source| PipelineError::Io {
                    path: target.clone(),
                    source,
                })?;
            if let Err(err) = tokio::fs::remove_file(&deliverable).await {
                warn!(error = %err, path = %deliverable.display(), "failed to remove pre-rename file");
            }
        }
        scratch.track(target.clone());
        Ok(target)
    }

    /// HLS packaging + tree upload when enabled, degrading to a plain MP4
    /// upload on any packaging or tree-upload failure.
    async fn package_and_upload(
        &self,
        deliverable: &Path,
        safe_id: &str,
        safe_name: &str,
        scratch: &mut Scratch,
    ) -> PipelineResult<String> {
        if self.hls.enabled {
            let hls_dir = self.work_dir.join(format!("{safe_id}_hls"));
            scratch.track(hls_dir.clone());
            let attempt: PipelineResult<String> = async {
                let package = self
                    .media
                    .encode_hls(deliverable, &hls_dir, safe_id, &self.hls)
                    .await?;
                let url = self
                    .uploader
                    .upload_tree(
                        &hls_dir,
                        UPLOAD_PREFIX,
                        safe_id,
                        &package.master_playlist_name,
                    )
                    .await?;
                Ok(url)
            }
            .await;
            match attempt {
                Ok(url) => {
                    if self.hls.include_mp4_fallback {
                        if let Err(err) = self
                            .uploader
                            .upload_file(deliverable, UPLOAD_PREFIX, safe_name)
                            .await
                        {
                            warn!(error = %err, "mp4 fallback upload failed");
                        }
                    }
                    return Ok(url);
                }
                Err(err) => {
                    warn!(error = %err, "hls packaging failed; uploading plain mp4 instead");
                }
            }
        }
        let url = self
            .uploader
            .upload_file(deliverable, UPLOAD_PREFIX, safe_name)
            .await?;
        Ok(url)
    }

    async fn write_artifact(
        &self,
        safe_id: &str,
        payload: &Option<serde_json::Value>,
    ) -> PipelineResult<Option<PathBuf>> {
        let Some(payload) = payload else {
            return Ok(None);
        };
        let path = self.output_dir.join(format!("{safe_id}.json"));
        let rendered = serde_json::to_string_pretty(payload).unwrap_or_default();
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Some(path))
    }

    /// Removes tracked intermediates on every exit; removes the source file
    /// only when the run succeeded. Failures here are logged and swallowed.
    async fn cleanup(&self, scratch: &Scratch, success: bool, source_path: &Path) {
        for path in &scratch.paths {
            let removal = if path.is_dir() {
                tokio::fs::remove_dir_all(path).await
            } else {
                tokio::fs::remove_file(path).await
            };
            match removal {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove intermediate")
                }
            }
        }
        if success {
            match tokio::fs::remove_file(source_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %source_path.display(), error = %err, "failed to remove source video")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_ids_are_sixteen_alphanumerics() {
        let id = generate_safe_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_safe_id(), generate_safe_id());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(PipelineMode::from_str("full"), Ok(PipelineMode::Full));
        assert_eq!(
            PipelineMode::from_str("no-exercises"),
            Ok(PipelineMode::NoExercises)
        );
        assert_eq!(
            PipelineMode::from_str("transcription_only"),
            Ok(PipelineMode::TranscriptionOnly)
        );
        assert!(PipelineMode::from_str("everything").is_err());
    }

    #[test]
    fn token_levels_are_distinct() {
        let token = ShutdownToken::new();
        assert!(!token.stop_requested());
        token.request_stop();
        assert!(token.stop_requested());
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.ensure_active().is_err());
    }
}
