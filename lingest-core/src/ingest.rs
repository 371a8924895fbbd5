//! Object-store lifecycle. Source videos live under four prefixes of the
//! intake bucket (`pending/`, `processing/`, `completed/`, `failed/`);
//! processed artifacts land in a CDN-served output bucket. Clients use
//! path-style addressing so S3-compatible endpoints work unchanged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::config::{S3InputSection, StorageSection};

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("object store listing failed: {0}")]
    List(String),
    #[error("download of {key} failed: {detail}")]
    Download { key: String, detail: String },
    #[error("upload of {path} failed: {detail}")]
    Upload { path: PathBuf, detail: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Clone)]
pub struct PendingVideo {
    pub key: String,
    pub name: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

fn build_client(endpoint: &str, region: &str, access_key: &str, secret_key: &str) -> Client {
    let credentials = Credentials::new(access_key, secret_key, None, None, "lingest");
    let config = S3ConfigBuilder::new()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(endpoint)
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();
    Client::from_conf(config)
}

fn is_video_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let lowered = ext.to_string_lossy().to_lowercase();
            VIDEO_EXTENSIONS.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn join_prefix(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

/// Intake-bucket client owning the pending → processing → completed|failed
/// key lifecycle.
#[derive(Clone)]
pub struct VideoIntake {
    client: Client,
    bucket: String,
    pending_prefix: String,
    processing_prefix: String,
    completed_prefix: String,
    failed_prefix: String,
}

impl VideoIntake {
    pub fn new(section: &S3InputSection) -> Self {
        let client = build_client(
            &section.endpoint,
            &section.region,
            &section.access_key_id,
            &section.secret_access_key,
        );
        Self {
            client,
            bucket: section.bucket.clone(),
            pending_prefix: section.pending_prefix.clone(),
            processing_prefix: section.processing_prefix.clone(),
            completed_prefix: section.completed_prefix.clone(),
            failed_prefix: section.failed_prefix.clone(),
        }
    }

    /// Lists videos waiting under the pending prefix. Non-video extensions
    /// and zero-byte entries are skipped.
    pub async fn list_pending(&self) -> IngestResult<Vec<PendingVideo>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.pending_prefix)
            .into_paginator()
            .send();

        let mut videos = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| IngestError::List(err.to_string()))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let name = basename(key).to_string();
                if name.is_empty() || !is_video_name(&name) {
                    continue;
                }
                let size = object.size().unwrap_or(0);
                if size == 0 {
                    warn!(key, "skipping zero-byte object");
                    continue;
                }
                let last_modified = object
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()));
                videos.push(PendingVideo {
                    key: key.to_string(),
                    name,
                    size,
                    last_modified,
                });
            }
        }
        Ok(videos)
    }

    async fn relocate(&self, key: &str, prefix: &str) -> Result<String, String> {
        let target = join_prefix(prefix, basename(key));
        let source = format!("{}/{}", self.bucket, key);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&source)
            .key(&target)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        Ok(target)
    }

    /// Moves the object under the processing prefix. A failed move is
    /// non-fatal; the original key is returned so the video is still
    /// processed.
    pub async fn move_to_processing(&self, key: &str) -> String {
        match self.relocate(key, &self.processing_prefix).await {
            Ok(new_key) => new_key,
            Err(detail) => {
                warn!(key, detail, "move to processing failed; continuing with original key");
                key.to_string()
            }
        }
    }

    pub async fn move_to_completed(&self, key: &str) {
        if let Err(detail) = self.relocate(key, &self.completed_prefix).await {
            warn!(key, detail, "move to completed failed");
        }
    }

    pub async fn move_to_failed(&self, key: &str) {
        if let Err(detail) = self.relocate(key, &self.failed_prefix).await {
            warn!(key, detail, "move to failed failed");
        }
    }

    /// Bucket reachability probe for health checks.
    pub async fn health_check(&self) -> IngestResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| IngestError::List(err.to_string()))?;
        Ok(())
    }

    /// Streams the object body to `local_dir/<basename>`.
    pub async fn download(&self, key: &str, local_dir: &Path) -> IngestResult<PathBuf> {
        let local_path = local_dir.join(basename(key));
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| IngestError::Download {
                key: key.to_string(),
                detail: err.to_string(),
            })?;

        let mut file =
            tokio::fs::File::create(&local_path)
                .await
                .map_err(|source| IngestError::Io {
                    path: local_path.clone(),
                    source,
                })?;
        let mut body = response.body;
        let mut downloaded = 0u64;
        while let Some(bytes) = body.try_next().await.map_err(|err| IngestError::Download {
            key: key.to_string(),
            detail: err.to_string(),
        })? {
            downloaded += bytes.len() as u64;
            file.write_all(&bytes)
                .await
                .map_err(|source| IngestError::Io {
                    path: local_path.clone(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| IngestError::Io {
            path: local_path.clone(),
            source,
        })?;
        info!(key, bytes = downloaded, "downloaded source video");
        Ok(local_path)
    }
}

/// Output-bucket client for CDN-served artifacts.
#[derive(Clone)]
pub struct ContentUploader {
    client: Client,
    bucket: String,
    cdn_domain: String,
}

impl ContentUploader {
    pub fn new(section: &StorageSection) -> Self {
        let client = build_client(
            &section.endpoint,
            &section.region,
            &section.access_key_id,
            &section.secret_access_key,
        );
        Self {
            client,
            bucket: section.bucket.clone(),
            cdn_domain: section.cdn_domain.clone(),
        }
    }

    /// Bucket reachability probe for health checks.
    pub async fn health_check(&self) -> IngestResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| IngestError::List(err.to_string()))?;
        Ok(())
    }

    pub fn cdn_url(&self, key: &str) -> String {
        let key = key.replace('\\', "/");
        let key = key.trim_start_matches('/');
        let domain = self
            .cdn_domain
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_matches('/');
        Url::parse(&format!("https://{domain}/"))
            .and_then(|base| base.join(key))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("https://{domain}/{key}"))
    }

    async fn put_file(&self, local_path: &Path, key: &str) -> IngestResult<()> {
        let body = aws_sdk_s3::primitives::ByteStream::from_path(local_path)
            .await
            .map_err(|err| IngestError::Upload {
                path: local_path.to_path_buf(),
                detail: err.to_string(),
            })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(local_path))
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|err| IngestError::Upload {
                path: local_path.to_path_buf(),
                detail: err.to_string(),
            })?;
        Ok(())
    }

    /// Uploads one file as `prefix/target_name` and returns its CDN URL.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        prefix: &str,
        target_name: &str,
    ) -> IngestResult<String> {
        let key = join_prefix(prefix, target_name);
        self.put_file(local_path, &key).await?;
        info!(key, "uploaded file");
        Ok(self.cdn_url(&key))
    }

    /// Recursively uploads every regular file under `local_dir` to
    /// `prefix/base_name/<relative-path>` and returns the CDN URL of
    /// `prefix/base_name/entry_file`.
    pub async fn upload_tree(
        &self,
        local_dir: &Path,
        prefix: &str,
        base_name: &str,
        entry_file: &str,
    ) -> IngestResult<String> {
        let mut directories = vec![local_dir.to_path_buf()];
        let mut uploaded = 0usize;
        while let Some(directory) = directories.pop() {
            let mut entries =
                tokio::fs::read_dir(&directory)
                    .await
                    .map_err(|source| IngestError::Io {
                        path: directory.clone(),
                        source,
                    })?;
            while let Some(entry) = entries.next_entry().await.map_err(|source| IngestError::Io {
                path: directory.clone(),
                source,
            })? {
                let path = entry.path();
                if path.is_dir() {
                    directories.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(local_dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let key = join_prefix(prefix, &format!("{base_name}/{relative}"));
                self.put_file(&path, &key).await?;
                uploaded += 1;
            }
        }
        info!(dir = %local_dir.display(), files = uploaded, "uploaded artifact tree");
        Ok(self.cdn_url(&join_prefix(prefix, &format!("{base_name}/{entry_file}"))))
    }
}

/// Seam over the output store so the orchestrator can run against fakes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload_file(
        &self,
        local_path: &Path,
        prefix: &str,
        target_name: &str,
    ) -> IngestResult<String>;

    async fn upload_tree(
        &self,
        local_dir: &Path,
        prefix: &str,
        base_name: &str,
        entry_file: &str,
    ) -> IngestResult<String>;
}

#[async_trait]
impl ArtifactStore for ContentUploader {
    async fn upload_file(
        &self,
        local_path: &Path,
        prefix: &str,
        target_name: &str,
    ) -> IngestResult<String> {
        ContentUploader::upload_file(self, local_path, prefix, target_name).await
    }

    async fn upload_tree(
        &self,
        local_dir: &Path,
        prefix: &str,
        base_name: &str,
        entry_file: &str,
    ) -> IngestResult<String> {
        ContentUploader::upload_tree(self, local_dir, prefix, base_name, entry_file).await
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("m4s") => "video/iso.segment",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("json") => "application/json",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}
