//! Batch and polling drivers. One pass lists pending objects and runs each
//! through the lifecycle: move to processing, download, orchestrate, move
//! to completed or failed. Polling repeats the pass on an interval with
//! non-overlapping cycles and graceful shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::ingest::{IngestError, VideoIntake};
use crate::pipeline::{ShutdownToken, VideoPipeline};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Clone)]
pub struct VideoReport {
    pub name: String,
    pub success: bool,
    pub seconds: f64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub videos: Vec<VideoReport>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.videos.iter().filter(|v| v.success).count()
    }

    pub fn failed(&self) -> usize {
        self.videos.iter().filter(|v| !v.success).count()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "{} video(s) completed, {} failed",
            self.processed(),
            self.failed()
        )];
        for video in &self.videos {
            let status = if video.success { "completed" } else { "failed" };
            let mut line = format!("  {} -> {} in {:.1}s", video.name, status, video.seconds);
            if let Some(detail) = &video.detail {
                line.push_str(&format!(": {detail}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Clone)]
pub struct IngestDriver {
    intake: VideoIntake,
    pipeline: VideoPipeline,
    work_dir: PathBuf,
    polling_interval: Duration,
}

impl IngestDriver {
    pub fn new(
        intake: VideoIntake,
        pipeline: VideoPipeline,
        work_dir: PathBuf,
        polling_interval: Duration,
    ) -> Self {
        Self {
            intake,
            pipeline,
            work_dir,
            polling_interval,
        }
    }

    /// One pass over the pending prefix. Per-video failures route the key
    /// to `failed/` and the pass continues; only a listing failure aborts.
    pub async fn run_batch(&self, shutdown: &ShutdownToken) -> DriverResult<BatchReport> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| DriverError::Io {
                path: self.work_dir.clone(),
                source,
            })?;

        let pending = self.intake.list_pending().await?;
        info!(count = pending.len(), "pending videos listed");
        let mut report = BatchReport::default();

        for video in pending {
            if shutdown.stop_requested() {
                info!("shutdown requested; leaving remaining videos pending");
                break;
            }
            let started = Instant::now();
            let key = self.intake.move_to_processing(&video.key).await;

            let local_path = match self.intake.download(&key, &self.work_dir).await {
                Ok(path) => path,
                Err(err) => {
                    warn!(key, error = %err, "download failed");
                    self.intake.move_to_failed(&key).await;
                    report.videos.push(VideoReport {
                        name: video.name.clone(),
                        success: false,
                        seconds: started.elapsed().as_secs_f64(),
                        detail: Some(err.to_string()),
                    });
                    continue;
                }
            };

            let outcome = self.pipeline.process(&local_path, shutdown).await;
            let seconds = started.elapsed().as_secs_f64();
            match outcome {
                Ok(outcome) => {
                    self.intake.move_to_completed(&key).await;
                    info!(
                        name = video.name,
                        safe_name = outcome.safe_name,
                        url = outcome.video_url,
                        seconds,
                        "video completed"
                    );
                    report.videos.push(VideoReport {
                        name: video.name.clone(),
                        success: true,
                        seconds,
                        detail: None,
                    });
                }
                Err(err) => {
                    warn!(name = video.name, error = %err, seconds, "video failed");
                    self.intake.move_to_failed(&key).await;
                    report.videos.push(VideoReport {
                        name: video.name.clone(),
                        success: false,
                        seconds,
                        detail: Some(err.to_string()),
                    });
                }
            }

            // The local copy goes away in every case; on success the
            // orchestrator has already removed it.
            if local_path.exists() {
                if let Err(err) = tokio::fs::remove_file(&local_path).await {
                    warn!(path = %local_path.display(), error = %err, "failed to remove local copy");
                }
            }
        }

        Ok(report)
    }

    /// Repeats the batch pass on the configured interval. A tick arriving
    /// while the previous cycle is still running is dropped. The first
    /// interrupt stops after the current video; a second cancels in-flight
    /// work at the next stage boundary.
    pub async fn run_polling(&self, shutdown: ShutdownToken) -> DriverResult<()> {
        let mut ticker = tokio::time::interval(self.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let busy = Arc::new(AtomicBool::new(false));
        info!(
            interval_seconds = self.polling_interval.as_secs(),
            "polling started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if busy.swap(true, Ordering::SeqCst) {
                        info!("previous cycle still running; tick skipped");
                        continue;
                    }
                    let driver = self.clone();
                    let flag = busy.clone();
                    let token = shutdown.clone();
                    tokio::spawn(async move {
                        match driver.run_batch(&token).await {
                            Ok(report) => {
                                if !report.videos.is_empty() {
                                    info!(
                                        processed = report.processed(),
                                        failed = report.failed(),
                                        "cycle complete"
                                    );
                                    println!("{}", report.render());
                                }
                            }
                            Err(err) => error!(error = %err, "cycle failed"),
                        }
                        flag.store(false, Ordering::SeqCst);
                    });
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        error!(error = %err, "signal handler failed");
                    }
                    info!("interrupt received; finishing current video before exit");
                    shutdown.request_stop();
                    break;
                }
            }
        }

        // Drain the in-flight cycle; a second interrupt cancels it.
        while busy.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() && !shutdown.is_cancelled() {
                        warn!("second interrupt; cancelling in-flight work");
                        shutdown.cancel();
                    }
                }
            }
        }
        info!("polling stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_and_rendering() {
        let report = BatchReport {
            videos: vec![
                VideoReport {
                    name: "hello.mp4".into(),
                    success: true,
                    seconds: 42.3,
                    detail: None,
                },
                VideoReport {
                    name: "bad.mp4".into(),
                    success: false,
                    seconds: 3.1,
                    detail: Some("transcription engine failed".into()),
                },
            ],
        };
        assert_eq!(report.processed(), 1);
        assert_eq!(report.failed(), 1);
        let rendered = report.render();
        assert!(rendered.contains("1 video(s) completed, 1 failed"));
        assert!(rendered.contains("hello.mp4 -> completed in 42.3s"));
        assert!(rendered.contains("bad.mp4 -> failed in 3.1s: transcription engine failed"));
    }
}
