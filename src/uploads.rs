//! # Audio Uploads
//!
//! Multipart parsing for the audio endpoints. The `file` part is streamed straight to
//! a request-scoped file under the uploads directory; [`SpooledUpload`] deletes that
//! file when it is dropped, so it is gone after the request on every path, including
//! errors and early returns.

use crate::config::UploadsConfig;
use crate::error::AppError;
use crate::gateway::AudioClip;
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the multipart part carrying audio.
pub const FILE_FIELD: &str = "file";
/// Name of the multipart part carrying plain text (`/api/llm/query`).
pub const TEXT_FIELD: &str = "text";

const MAX_TEXT_BYTES: usize = 64 * 1024;

/// An uploaded audio file spooled to disk for the duration of one request.
#[derive(Debug)]
pub struct SpooledUpload {
    path: PathBuf,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_in_bytes: u64,
}

impl SpooledUpload {
    /// Read the spooled bytes back for a gateway call.
    pub async fn to_clip(&self) -> Result<AudioClip, AppError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read spooled upload: {}", e)))?;
        Ok(AudioClip {
            bytes,
            content_type: self.content_type.clone(),
            filename: Some(self.filename.clone()),
        })
    }

    pub fn is_audio(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("audio/"))
            .unwrap_or(false)
    }
}

impl Drop for SpooledUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed spooled upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to delete temporary file"),
        }
    }
}

/// What a multipart request carried.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<SpooledUpload>,
    pub text: Option<String>,
}

impl UploadForm {
    pub fn require_file(self) -> Result<SpooledUpload, AppError> {
        self.file
            .ok_or_else(|| AppError::ValidationError(format!("No '{}' part in form", FILE_FIELD)))
    }
}

/// Drain a multipart payload: spool `file`, collect `text`, skip anything else.
pub async fn read_form(mut payload: Multipart, config: &UploadsConfig) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string)
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?;

        match field_name.as_str() {
            FILE_FIELD if form.file.is_none() => {
                form.file = Some(spool(field, config).await?);
            }
            TEXT_FIELD if form.text.is_none() => {
                form.text = Some(read_text(field).await?);
            }
            other => {
                debug!(field = %other, "Ignoring multipart field");
                drain(field).await?;
            }
        }
    }

    Ok(form)
}

async fn spool(mut field: Field, config: &UploadsConfig) -> Result<SpooledUpload, AppError> {
    let filename = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("recorded_{}.webm", chrono::Utc::now().timestamp()));
    let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

    tokio::fs::create_dir_all(&config.dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create uploads directory: {}", e)))?;

    let path = config.dir.join(format!("{}_{}", Uuid::new_v4().simple(), filename));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temporary file: {}", e)))?;

    // The guard owns the path from here on, so a failure below still cleans up.
    let mut upload = SpooledUpload {
        path,
        filename,
        content_type,
        size_in_bytes: 0,
    };

    let mut written: usize = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
        written += chunk.len();
        if written > config.max_upload_bytes {
            return Err(AppError::ValidationError(format!(
                "File too large (max: {} bytes)",
                config.max_upload_bytes
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write temporary file: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to write temporary file: {}", e)))?;

    upload.size_in_bytes = tokio::fs::metadata(&upload.path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(written as u64);

    debug!(
        filename = %upload.filename,
        size_in_bytes = upload.size_in_bytes,
        "Spooled upload"
    );
    Ok(upload)
}

async fn read_text(mut field: Field) -> Result<String, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > MAX_TEXT_BYTES {
            return Err(AppError::ValidationError("Text field too large".to_string()));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::ValidationError("Text field is not valid UTF-8".to_string()))
}

async fn drain(mut field: Field) -> Result<(), AppError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
    }
    Ok(())
}

/// Keep only the final path component and a conservative character set.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    base.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\voice note.wav"), "voicenote.wav");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("clip-1_final.webm"), "clip-1_final.webm");
    }

    #[tokio::test]
    async fn spooled_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc_clip.wav");
        tokio::fs::write(&path, b"RIFFdata").await.unwrap();

        let upload = SpooledUpload {
            path: path.clone(),
            filename: "clip.wav".to_string(),
            content_type: Some("audio/wav".to_string()),
            size_in_bytes: 8,
        };
        let clip = upload.to_clip().await.unwrap();
        assert_eq!(clip.bytes, b"RIFFdata");
        assert!(upload.is_audio());

        drop(upload);
        assert!(!path.exists());
    }

    #[test]
    fn non_audio_content_type_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let upload = SpooledUpload {
            path: dir.path().join("missing"),
            filename: "notes.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            size_in_bytes: 0,
        };
        assert!(!upload.is_audio());
    }
}
