//! Wrappers around the external media toolchain (ffmpeg/ffprobe). Every
//! operation is a subprocess with full argv construction; stderr is
//! captured and the tail attached to failures.

mod error;
mod types;

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{AudioNormalizationSection, HlsSection, VideoCompressionSection};

pub use error::{MediaError, MediaResult};
pub use types::{
    parse_bitrate_bits, AudioExtraction, EncodedRendition, HlsPackage, LoudnessMeasurement,
};

const STDERR_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct MediaToolkit {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for MediaToolkit {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        text.to_string()
    } else {
        text.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

impl MediaToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, tool: &str, args: &[String]) -> MediaResult<Output> {
        debug!(tool, ?args, "spawning media tool");
        let mut command = Command::new(tool);
        command.kill_on_drop(true).args(args);
        let output = command.output().await.map_err(|source| MediaError::Io {
            path: PathBuf::from(tool),
            source,
        })?;
        let stderr = tail(&output.stderr);
        if !output.status.success() {
            return Err(MediaError::Tool {
                tool: tool.to_string(),
                status: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!(tool, diagnostics = %stderr, "media tool finished");
        }
        Ok(output)
    }

    /// Extracts a 16 kHz mono s16le WAV and probes the container duration.
    /// A failed probe is non-fatal and yields `None`.
    pub async fn extract_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        base_name: &str,
    ) -> MediaResult<AudioExtraction> {
        let audio_path = temp_dir.join(format!("{base_name}.wav"));
        let args = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            video_path.display().to_string(),
            "-vn".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            audio_path.display().to_string(),
        ];
        self.run(&self.ffmpeg, &args).await?;
        let duration_seconds = self.probe_duration(video_path).await;
        Ok(AudioExtraction {
            audio_path,
            duration_seconds,
        })
    }

    /// Container duration in whole seconds, or `None` when ffprobe fails
    /// or reports nothing parseable.
    pub async fn probe_duration(&self, path: &Path) -> Option<i64> {
        let args = vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            path.display().to_string(),
        ];
        match self.run(&self.ffprobe, &args).await {
            Ok(output) => match serde_json::from_slice::<FfprobeOutput>(&output.stdout) {
                Ok(parsed) => parsed
                    .format
                    .duration
                    .as_deref()
                    .and_then(|value| value.parse::<f64>().ok())
                    .map(|seconds| seconds.round() as i64),
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "ffprobe payload was not parseable");
                    None
                }
            },
            Err(err) => {
                warn!(file = %path.display(), error = %err, "duration probe failed");
                None
            }
        }
    }

    async fn measure_loudness(
        &self,
        input: &Path,
        audio: &AudioNormalizationSection,
    ) -> Option<LoudnessMeasurement> {
        let filter = format!(
            "loudnorm=I={}:LRA={}:TP={}:print_format=json",
            audio.target_lufs, audio.loudness_range, audio.true_peak
        );
        let args = vec![
            "-hide_banner".into(),
            "-i".into(),
            input.display().to_string(),
            "-af".into(),
            filter,
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        let output = match self.run(&self.ffmpeg, &args).await {
            Ok(output) => output,
            Err(err) => {
                warn!(file = %input.display(), error = %err, "loudness measurement failed");
                return None;
            }
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        match last_json_block(&stderr).and_then(|block| serde_json::from_str(block).ok()) {
            Some(measurement) => Some(measurement),
            None => {
                warn!(file = %input.display(), "loudnorm printed no parseable measurement");
                None
            }
        }
    }

    /// Two-pass loudness normalization with optional video re-encode. On a
    /// failed measurement pass the audio stream is copied unchanged. The
    /// output container gets fast-start moov placement.
    pub async fn normalize_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        audio: &AudioNormalizationSection,
        video: &VideoCompressionSection,
    ) -> MediaResult<PathBuf> {
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let output_path = temp_dir.join(format!("{stem}_normalized.mp4"));

        let measurement = if audio.apply {
            self.measure_loudness(video_path, audio).await
        } else {
            None
        };

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            video_path.display().to_string(),
        ];

        match &measurement {
            Some(m) => {
                let filter = format!(
                    "loudnorm=I={}:LRA={}:TP={}:measured_I={}:measured_LRA={}:measured_TP={}:measured_thresh={}:offset={}:linear=true",
                    audio.target_lufs,
                    audio.loudness_range,
                    audio.true_peak,
                    m.input_i,
                    m.input_lra,
                    m.input_tp,
                    m.input_thresh,
                    m.target_offset,
                );
                args.extend([
                    "-af".into(),
                    filter,
                    "-c:a".into(),
                    audio.audio_codec.clone(),
                    "-b:a".into(),
                    audio.audio_bitrate.clone(),
                ]);
            }
            None => {
                if audio.apply {
                    warn!(file = %video_path.display(), "copying audio unchanged");
                }
                args.extend(["-c:a".into(), "copy".into()]);
            }
        }

        if video.apply {
            args.extend(["-c:v".into(), video.codec.clone()]);
            if let Some(preset) = &video.preset {
                args.extend(["-preset".into(), preset.clone()]);
            }
            if let Some(crf) = video.crf {
                args.extend(["-crf".into(), crf.to_string()]);
            }
            if let Some(filter) = downscale_filter(video.max_width, video.max_height) {
                args.extend(["-vf".into(), filter]);
            }
            args.extend(["-pix_fmt".into(), video.pixel_format.clone()]);
            if let Some(maxrate) = &video.max_bitrate {
                args.extend(["-maxrate".into(), maxrate.clone()]);
            }
            if let Some(bufsize) = &video.buf_size {
                args.extend(["-bufsize".into(), bufsize.clone()]);
            }
            if let Some(tune) = &video.tune {
                args.extend(["-tune".into(), tune.clone()]);
            }
        } else {
            args.extend(["-c:v".into(), "copy".into()]);
        }

        args.extend([
            "-movflags".into(),
            "+faststart".into(),
            output_path.display().to_string(),
        ]);

        self.run(&self.ffmpeg, &args).await?;
        Ok(output_path)
    }

    /// Encodes one fMP4-HLS rendition per configured entry and synthesizes
    /// the master playlist.
    pub async fn encode_hls(
        &self,
        input_path: &Path,
        output_dir: &Path,
        base_name: &str,
        hls: &HlsSection,
    ) -> MediaResult<HlsPackage> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| MediaError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let mut renditions = Vec::with_capacity(hls.renditions.len());
        for rendition in &hls.renditions {
            let playlist_name = format!("{base_name}_{}.m3u8", rendition.name);
            let playlist_path = output_dir.join(&playlist_name);
            let init_name = format!("{base_name}_{}_init.mp4", rendition.name);
            let segment_pattern = output_dir
                .join(format!("{base_name}_{}_%04d.m4s", rendition.name))
                .display()
                .to_string();

            let scale = format!(
                "scale=w={w}:h={h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
                w = rendition.width,
                h = rendition.height,
            );

            let mut args: Vec<String> = vec![
                "-y".into(),
                "-hide_banner".into(),
                "-loglevel".into(),
                "error".into(),
                "-i".into(),
                input_path.display().to_string(),
                "-vf".into(),
                scale,
                "-c:v".into(),
                hls.video_codec.clone(),
            ];
            if let Some(preset) = &hls.preset {
                args.extend(["-preset".into(), preset.clone()]);
            }
            args.extend([
                "-b:v".into(),
                rendition.video_bitrate.clone(),
                "-g".into(),
                hls.keyframe_interval.to_string(),
                "-keyint_min".into(),
                hls.keyframe_interval.to_string(),
                "-sc_threshold".into(),
                "0".into(),
                "-r".into(),
                hls.target_frame_rate.to_string(),
                "-vsync".into(),
                "cfr".into(),
                "-c:a".into(),
                hls.audio_codec.clone(),
                "-b:a".into(),
                rendition.audio_bitrate.clone(),
                "-ar".into(),
                "48000".into(),
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                hls.segment_duration.to_string(),
                "-hls_playlist_type".into(),
                hls.playlist_type.clone(),
                "-hls_flags".into(),
                "independent_segments".into(),
                "-hls_segment_type".into(),
                "fmp4".into(),
                "-hls_fmp4_init_filename".into(),
                init_name,
                "-hls_segment_filename".into(),
                segment_pattern,
                playlist_path.display().to_string(),
            ]);

            self.run(&self.ffmpeg, &args).await?;
            rewrite_init_reference(&playlist_path).await?;

            let bandwidth = parse_bitrate_bits(&rendition.video_bitrate).unwrap_or(0)
                + parse_bitrate_bits(&rendition.audio_bitrate).unwrap_or(0);
            renditions.push(EncodedRendition {
                name: rendition.name.clone(),
                playlist_name,
                width: rendition.width,
                height: rendition.height,
                bandwidth_bits: bandwidth,
            });
        }

        let master = build_master_playlist(&renditions);
        let master_path = output_dir.join(&hls.master_playlist_name);
        tokio::fs::write(&master_path, master)
            .await
            .map_err(|source| MediaError::Io {
                path: master_path.clone(),
                source,
            })?;

        Ok(HlsPackage {
            output_dir: output_dir.to_path_buf(),
            master_playlist_name: hls.master_playlist_name.clone(),
            renditions,
        })
    }
}

/// Seam over the toolchain so the orchestrator can run against fakes.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn extract_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        base_name: &str,
    ) -> MediaResult<AudioExtraction>;

    async fn normalize_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        audio: &AudioNormalizationSection,
        video: &VideoCompressionSection,
    ) -> MediaResult<PathBuf>;

    async fn encode_hls(
        &self,
        input_path: &Path,
        output_dir: &Path,
        base_name: &str,
        hls: &HlsSection,
    ) -> MediaResult<HlsPackage>;
}

#[async_trait]
impl MediaProcessor for MediaToolkit {
    async fn extract_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        base_name: &str,
    ) -> MediaResult<AudioExtraction> {
        MediaToolkit::extract_audio(self, video_path, temp_dir, base_name).await
    }

    async fn normalize_audio(
        &self,
        video_path: &Path,
        temp_dir: &Path,
        audio: &AudioNormalizationSection,
        video: &VideoCompressionSection,
    ) -> MediaResult<PathBuf> {
        MediaToolkit::normalize_audio(self, video_path, temp_dir, audio, video).await
    }

    async fn encode_hls(
        &self,
        input_path: &Path,
        output_dir: &Path,
        base_name: &str,
        hls: &HlsSection,
    ) -> MediaResult<HlsPackage> {
        MediaToolkit::encode_hls(self, input_path, output_dir, base_name, hls).await
    }
}

fn last_json_block(text: &str) -> Option<&str> {
    let start = text.rfind('{')?;
    let end = text[start..].find('}')? + start;
    Some(&text[start..=end])
}

/// Downscale-only filter keeping aspect ratio, with even-dimension output.
fn downscale_filter(max_width: Option<u32>, max_height: Option<u32>) -> Option<String> {
    match (max_width, max_height) {
        (Some(w), Some(h)) => Some(format!(
            "scale=w=min({w}\\,iw):h=min({h}\\,ih):force_original_aspect_ratio=decrease,pad=ceil(iw/2)*2:ceil(ih/2)*2"
        )),
        (Some(w), None) => Some(format!("scale=min({w}\\,iw):-2")),
        (None, Some(h)) => Some(format!("scale=-2:min({h}\\,ih)")),
        (None, None) => None,
    }
}

/// Rewrites the init-segment reference in a media playlist to a
/// basename-only path.
async fn rewrite_init_reference(playlist_path: &Path) -> MediaResult<()> {
    let contents =
        tokio::fs::read_to_string(playlist_path)
            .await
            .map_err(|source| MediaError::Io {
                path: playlist_path.to_path_buf(),
                source,
            })?;
    let rewritten = rewrite_init_lines(&contents);
    if rewritten != contents {
        tokio::fs::write(playlist_path, rewritten)
            .await
            .map_err(|source| MediaError::Io {
                path: playlist_path.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

fn rewrite_init_lines(contents: &str) -> String {
    let mut lines = Vec::new();
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("#EXT-X-MAP:URI=\"") {
            if let Some(uri_end) = rest.find('"') {
                let uri = &rest[..uri_end];
                let basename = uri.rsplit(['/', '\\']).next().unwrap_or(uri);
                lines.push(format!("#EXT-X-MAP:URI=\"{basename}\"{}", &rest[uri_end + 1..]));
                continue;
            }
        }
        lines.push(line.to_string());
    }
    let mut out = lines.join("\n");
    if contents.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn build_master_playlist(renditions: &[EncodedRendition]) -> String {
    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:7\n");
    playlist.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    for rendition in renditions {
        let mut attributes = format!("BANDWIDTH={}", rendition.bandwidth_bits);
        if rendition.width > 0 && rendition.height > 0 {
            attributes.push_str(&format!(
                ",RESOLUTION={}x{}",
                rendition.width, rendition.height
            ));
        }
        attributes.push_str(&format!(",NAME=\"{}\"", rendition.name));
        playlist.push_str(&format!("#EXT-X-STREAM-INF:{attributes}\n"));
        playlist.push_str(&format!("{}\n", rendition.playlist_name));
    }
    playlist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loudnorm_block_is_found_at_stderr_tail() {
        let stderr = "size=N/A time=00:00:30.00 bitrate=N/A\n\
                      [Parsed_loudnorm_0 @ 0x5555] \n{\n\
                      \t\"input_i\" : \"-27.61\",\n\
                      \t\"input_tp\" : \"-4.47\",\n\
                      \t\"input_lra\" : \"18.06\",\n\
                      \t\"input_thresh\" : \"-39.20\",\n\
                      \t\"target_offset\" : \"0.58\"\n}\n";
        let block = last_json_block(stderr).unwrap();
        let measurement: LoudnessMeasurement = serde_json::from_str(block).unwrap();
        assert!((measurement.input_lra - 18.06).abs() < f64::EPSILON);
    }

    #[test]
    fn downscale_filter_shapes() {
        assert!(downscale_filter(None, None).is_none());
        let both = downscale_filter(Some(1280), Some(720)).unwrap();
        assert!(both.contains("force_original_aspect_ratio=decrease"));
        assert!(both.contains("pad=ceil(iw/2)*2"));
        assert_eq!(
            downscale_filter(Some(1280), None).unwrap(),
            "scale=min(1280\\,iw):-2"
        );
    }

    #[test]
    fn init_reference_rewritten_to_basename() {
        let playlist = "#EXTM3U\n#EXT-X-MAP:URI=\"/tmp/work/abc_720p_init.mp4\"\n#EXTINF:4.0,\nabc_720p_0001.m4s\n";
        let rewritten = rewrite_init_lines(playlist);
        assert!(rewritten.contains("#EXT-X-MAP:URI=\"abc_720p_init.mp4\""));
        assert!(rewritten.contains("abc_720p_0001.m4s"));
    }

    #[test]
    fn master_playlist_sums_bandwidth() {
        let renditions = vec![EncodedRendition {
            name: "720p".into(),
            playlist_name: "abc_720p.m3u8".into(),
            width: 1280,
            height: 720,
            bandwidth_bits: 2_800_000 + 128_000,
        }];
        let master = build_master_playlist(&renditions);
        assert!(master.contains("BANDWIDTH=2928000"));
        assert!(master.contains("RESOLUTION=1280x720"));
        assert!(master.contains("NAME=\"720p\""));
        assert!(master.ends_with("abc_720p.m3u8\n"));
    }
}
