use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::future::join_all;
use thiserror::Error;

use crate::backend::SyncBackend;
use crate::model::Attachment;

/// Inline payloads above this length are uploaded instead of being embedded
/// in the synced note document.
pub const INLINE_UPLOAD_THRESHOLD: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A device file path; must be read and uploaded.
    LocalPath,
    /// A `data:` URI too large to stay inline; must be decoded and uploaded.
    LargeInline,
    /// Small inline payloads and `http(s)`/`blob:` URLs pass through.
    Remote,
}

pub fn classify(data: &str) -> AttachmentSource {
    if data.starts_with("data:") {
        if data.len() > INLINE_UPLOAD_THRESHOLD {
            AttachmentSource::LargeInline
        } else {
            AttachmentSource::Remote
        }
    } else if data.starts_with("http") || data.starts_with("blob:") {
        AttachmentSource::Remote
    } else {
        AttachmentSource::LocalPath
    }
}

#[derive(Debug, Error)]
enum ExternalizeError {
    #[error("failed to read attachment file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to decode inline payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("malformed data uri")]
    MalformedDataUri,
}

/// Replaces locally-addressed attachment payloads with durable remote URLs.
/// Entries are processed independently: a failed read or upload keeps the
/// original `data` and flags the entry with `sync_error` instead of aborting
/// its siblings. Re-running on an externalized list is a no-op.
pub async fn externalize_attachments<B>(backend: &B, attachments: &[Attachment]) -> Vec<Attachment>
where
    B: SyncBackend + ?Sized,
{
    let tasks = attachments
        .iter()
        .map(|attachment| externalize_one(backend, attachment.clone()));
    join_all(tasks).await
}

async fn externalize_one<B>(backend: &B, mut attachment: Attachment) -> Attachment
where
    B: SyncBackend + ?Sized,
{
    let resolved = match classify(&attachment.data) {
        AttachmentSource::Remote => return attachment,
        AttachmentSource::LocalPath => read_local_file(&attachment).await,
        AttachmentSource::LargeInline => decode_inline(&attachment),
    };

    match resolved {
        Ok((bytes, filename)) => match backend.upload_file(bytes, &filename).await {
            Ok(url) => {
                attachment.data = url;
                attachment.sync_error = None;
            }
            Err(err) => {
                attachment.sync_error = Some(format!("upload failed: {err}"));
            }
        },
        Err(err) => {
            attachment.sync_error = Some(err.to_string());
        }
    }

    attachment
}

async fn read_local_file(attachment: &Attachment) -> Result<(Vec<u8>, String), ExternalizeError> {
    let path = Path::new(&attachment.data);
    let bytes = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| derived_filename(attachment, None));
    Ok((bytes, filename))
}

fn decode_inline(attachment: &Attachment) -> Result<(Vec<u8>, String), ExternalizeError> {
    let (bytes, mime) = decode_data_uri(&attachment.data)?;
    let filename = derived_filename(attachment, mime.as_deref());
    Ok((bytes, filename))
}

fn decode_data_uri(data: &str) -> Result<(Vec<u8>, Option<String>), ExternalizeError> {
    let rest = data
        .strip_prefix("data:")
        .ok_or(ExternalizeError::MalformedDataUri)?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or(ExternalizeError::MalformedDataUri)?;

    let bytes = if header.ends_with(";base64") {
        BASE64.decode(payload.trim())?
    } else {
        payload.as_bytes().to_vec()
    };

    let mime = header.trim_end_matches(";base64");
    let mime = (!mime.is_empty()).then(|| mime.to_string());
    Ok((bytes, mime))
}

/// Filename for an inline payload: the attachment name when it already has an
/// extension, otherwise name plus an extension derived from the MIME subtype,
/// defaulting to `bin`.
fn derived_filename(attachment: &Attachment, mime: Option<&str>) -> String {
    let name = attachment.name.trim();
    let name = if name.is_empty() { "attachment" } else { name };
    if Path::new(name).extension().is_some() {
        return name.to_string();
    }

    let mime = mime
        .filter(|m| !m.is_empty())
        .or_else(|| Some(attachment.mime_type.as_str()).filter(|m| !m.is_empty()));
    let ext = mime
        .and_then(|m| m.split('/').nth(1))
        .and_then(|subtype| subtype.split(['+', ';']).next())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    format!("{name}.{ext}")
}
