use super::{create_temp_file, IncomingUpload, UploadPart};
use crate::models::RelayConfig;
use crate::upstream::mime;
use crate::{Error, Result};
use axum::extract::multipart::{Field, Multipart};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

// Enough bytes for every signature `image::guess_format` knows.
const SNIFF_LEN: usize = 32;

/// Drains a multipart body, spooling the configured file fields to disk and
/// keeping the configured pass-through text fields. A slot field sent without
/// a filename is a text part, not a file, and leaves the slot empty.
///
/// Any error here drops the partially built upload, which deletes the files
/// spooled so far.
pub async fn read_multipart(multipart: &mut Multipart, config: &RelayConfig) -> Result<IncomingUpload> {
    let mut upload = IncomingUpload::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::ClientInput(format!("Failed to parse multipart data: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(slot) = config.fields.slot_for(&name) {
            if field.file_name().is_none() {
                warn!("Ignoring upload field '{}' sent without a filename", name);
                continue;
            }
            if upload.has(slot) {
                warn!("Ignoring duplicate upload field '{}'", name);
                continue;
            }
            let part = spool_field(field, &name, config.temp_dir.as_deref()).await?;
            debug!(
                field = %name,
                file_name = %part.file_name,
                content_type = %part.content_type,
                size = part.len(),
                "Spooled upload part"
            );
            upload.insert(slot, part);
        } else if config.forward_fields.iter().any(|f| f == &name) {
            let value = field.text().await.map_err(|e| {
                Error::ClientInput(format!("Failed to read field {}: {}", name, e))
            })?;
            upload.push_field(name, value);
        } else {
            debug!("Ignoring unexpected multipart field '{}'", name);
        }
    }

    Ok(upload)
}

async fn spool_field(mut field: Field<'_>, name: &str, temp_dir: Option<&Path>) -> Result<UploadPart> {
    let file_name = field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or(name)
        .to_string();
    let declared = field.content_type().map(str::to_string);

    let file = create_temp_file(temp_dir)?;
    let mut writer = tokio::fs::File::from_std(file.reopen()?);
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut len = 0u64;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::ClientInput(format!("Failed to read {}: {}", name, e)))?
    {
        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        writer.write_all(&chunk).await?;
        len += chunk.len() as u64;
    }
    writer.flush().await?;

    let content_type = mime::resolve_upload_mime(declared.as_deref(), &file_name, &head);

    Ok(UploadPart::new(
        name.to_string(),
        file_name,
        content_type,
        len,
        file,
    ))
}
