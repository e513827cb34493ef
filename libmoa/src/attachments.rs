//! Attachment transfer
//!
//! Source media is downloaded into a temporary file and uploaded to the
//! destination. Videos come in several encodings; the smallest one below the
//! size cap is chosen by probing each candidate before downloading it.
//! Temporary files are removed when the [`DownloadedMedia`] is dropped, on
//! every path out of the transfer.

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::{MediaError, MoaError, Result};
use crate::platforms::Platform;
use crate::types::{MediaAttachment, MediaUpload};

/// A media file in a temporary location
#[derive(Debug)]
pub struct DownloadedMedia {
    file: NamedTempFile,
    pub mime_type: String,
    pub size: u64,
}

impl DownloadedMedia {
    pub fn from_parts(file: NamedTempFile, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            file,
            mime_type: mime_type.into(),
            size,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Where source media is fetched from
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Size in bytes from a metadata-only request, when the server reports one
    async fn probe_size(&self, url: &str) -> std::result::Result<Option<u64>, MediaError>;

    async fn download(&self, url: &str) -> std::result::Result<DownloadedMedia, MediaError>;
}

/// Extension for a MIME type, preferring the one the URL already uses
pub fn extension_for(mime_type: &str, url: &str) -> String {
    let known = mime_guess::get_mime_extensions_str(mime_type).unwrap_or(&[]);

    let from_url = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
        })
        .filter(|ext| known.contains(&ext.as_str()));

    match from_url {
        Some(ext) => normalize_extension(&ext),
        None => known
            .first()
            .map(|ext| normalize_extension(ext))
            .unwrap_or_else(|| "bin".to_string()),
    }
}

/// `jpe` is a valid JPEG extension that destinations refuse
fn normalize_extension(ext: &str) -> String {
    match ext {
        "jpe" | "jfif" => "jpg".to_string(),
        other => other.to_string(),
    }
}

fn mime_from_response(response: &reqwest::Response, url: &str) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(url)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string()
        })
}

fn status_error(url: &str, status: reqwest::StatusCode) -> MediaError {
    let message = format!("{} returned {}", url, status);
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        MediaError::Transient(message)
    } else {
        MediaError::Rejected(message)
    }
}

/// Media source over HTTP
#[derive(Debug, Clone)]
pub struct HttpMediaSource {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpMediaSource {
    pub fn new(timeout: Duration) -> std::result::Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::Rejected(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes: MediaConfig::default().max_download_bytes,
        })
    }

    pub fn from_config(config: &MediaConfig) -> std::result::Result<Self, MediaError> {
        let source = Self::new(Duration::from_secs(config.timeout_secs))?;
        Ok(source.with_max_bytes(config.max_download_bytes))
    }

    /// Cap on the bytes written for a single download
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn too_large(&self, url: &str) -> MediaError {
        MediaError::Rejected(format!("{} is larger than {} bytes", url, self.max_bytes))
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn probe_size(&self, url: &str) -> std::result::Result<Option<u64>, MediaError> {
        let response = self.client.head(url).send().await?;

        if !response.status().is_success() {
            return Err(status_error(url, response.status()));
        }

        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()))
    }

    async fn download(&self, url: &str) -> std::result::Result<DownloadedMedia, MediaError> {
        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(status_error(url, response.status()));
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large(url));
        }

        let mime_type = mime_from_response(&response, url);
        let suffix = format!(".{}", extension_for(&mime_type, url));
        let mut file = tempfile::Builder::new()
            .prefix("moa-")
            .suffix(&suffix)
            .tempfile()?;

        let mut size = 0u64;
        while let Some(chunk) = response.chunk().await? {
            size += chunk.len() as u64;
            if size > self.max_bytes {
                return Err(self.too_large(url));
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;

        if size == 0 {
            return Err(MediaError::Rejected(format!("{} is empty", url)));
        }

        debug!("Downloaded {} bytes of {} from {}", size, mime_type, url);

        Ok(DownloadedMedia {
            file,
            mime_type,
            size,
        })
    }
}

pub struct AttachmentTransfer<'a> {
    source: &'a dyn MediaSource,
    max_video_bytes: u64,
}

impl<'a> AttachmentTransfer<'a> {
    pub fn new(source: &'a dyn MediaSource, max_video_bytes: u64) -> Self {
        Self {
            source,
            max_video_bytes,
        }
    }

    /// URL to download for an attachment, or `None` when no encoding fits
    ///
    /// Video encodings without a bitrate are never chosen. The rest are
    /// tried from the lowest bitrate up; encodings that are missing, too
    /// large, or report no size are passed over. Connection failures stop
    /// the selection.
    pub async fn select_url(
        &self,
        attachment: &MediaAttachment,
    ) -> std::result::Result<Option<String>, MediaError> {
        if !attachment.kind.is_video() || attachment.variants.is_empty() {
            return Ok(Some(attachment.url.clone()));
        }

        let mut candidates: Vec<_> = attachment
            .variants
            .iter()
            .filter_map(|v| v.bitrate.map(|bitrate| (bitrate, v)))
            .collect();
        candidates.sort_by_key(|(bitrate, _)| *bitrate);

        for (bitrate, variant) in candidates {
            match self.source.probe_size(&variant.url).await {
                Ok(Some(size)) if size <= self.max_video_bytes => {
                    debug!("Selected variant at {} bps ({} bytes)", bitrate, size);
                    return Ok(Some(variant.url.clone()));
                }
                Ok(Some(size)) => {
                    info!("Variant at {} bps is too large: {} bytes", bitrate, size);
                }
                Ok(None) => {
                    info!("Variant at {} bps reports no size", bitrate);
                }
                Err(MediaError::Rejected(reason)) => {
                    info!("Variant at {} bps unavailable: {}", bitrate, reason);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Move one attachment to `destination`, returning its media id
    ///
    /// Returns `Ok(None)` when the attachment is skipped because the source
    /// has no usable copy of it.
    pub async fn transfer(
        &self,
        attachment: &MediaAttachment,
        destination: &dyn Platform,
    ) -> Result<Option<String>> {
        let url = match self.select_url(attachment).await? {
            Some(url) => url,
            None => {
                warn!("No usable variant for {}, skipping attachment", attachment.url);
                return Ok(None);
            }
        };

        let media = match self.source.download(&url).await {
            Ok(media) => media,
            Err(MediaError::Rejected(reason)) => {
                warn!("Skipping attachment {}: {}", url, reason);
                return Ok(None);
            }
            Err(e) => return Err(MoaError::Media(e)),
        };

        let upload = MediaUpload {
            path: media.path().to_path_buf(),
            mime_type: media.mime_type.clone(),
            description: attachment.description.clone(),
            kind: attachment.kind,
        };

        // `media` lives until the upload has finished
        let id = destination.upload_media(&upload).await?;
        drop(media);

        Ok(Some(id))
    }

    /// Transfer every attachment in order, stopping at the first failure
    pub async fn transfer_all(
        &self,
        attachments: &[MediaAttachment],
        destination: &dyn Platform,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(attachments.len());

        for attachment in attachments {
            if let Some(id) = self.transfer(attachment, destination).await? {
                ids.push(id);
            }
        }

        Ok(ids)
    }
}
