//! Request-scoped upload handling
//!
//! Uploaded images are spooled into temporary files owned by [`UploadPart`].
//! Dropping a part deletes its file, so every exit path of a relay call
//! releases the storage it acquired.

pub mod spool;

pub use crate::models::UploadSlot;
pub use spool::read_multipart;

use crate::models::FieldMapping;
use crate::{Error, Result};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

const TEMP_PREFIX: &str = "virtufit-upload-";

/// One uploaded file, backed by a temporary file that lives as long as the part.
#[derive(Debug)]
pub struct UploadPart {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    len: u64,
    file: NamedTempFile,
}

impl UploadPart {
    pub(crate) fn new(
        field_name: String,
        file_name: String,
        content_type: String,
        len: u64,
        file: NamedTempFile,
    ) -> Self {
        Self {
            field_name,
            file_name,
            content_type,
            len,
            file,
        }
    }

    /// Spool an in-memory payload, mainly for callers that already hold the bytes.
    pub async fn from_bytes(
        field_name: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
        temp_dir: Option<&Path>,
    ) -> Result<Self> {
        let file = create_temp_file(temp_dir)?;
        let mut writer = tokio::fs::File::from_std(file.reopen()?);
        writer.write_all(bytes).await?;
        writer.flush().await?;

        Ok(Self::new(
            field_name.to_string(),
            file_name.to_string(),
            content_type.to_string(),
            bytes.len() as u64,
            file,
        ))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Opens a fresh read handle on the spooled content.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::open(self.file.path()).await?)
    }

    pub async fn read_all(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.file.path()).await?)
    }
}

pub(crate) fn create_temp_file(temp_dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX);

    let file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    Ok(file)
}

/// Whatever arrived in the multipart body, before validation.
#[derive(Debug, Default)]
pub struct IncomingUpload {
    garment: Option<UploadPart>,
    subject: Option<UploadPart>,
    fields: Vec<(String, String)>,
}

impl IncomingUpload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, slot: UploadSlot) -> bool {
        self.slot(slot).is_some()
    }

    fn slot(&self, slot: UploadSlot) -> &Option<UploadPart> {
        match slot {
            UploadSlot::Garment => &self.garment,
            UploadSlot::Subject => &self.subject,
        }
    }

    /// Stores a part; returns `false` (and drops the part) if the slot is already filled.
    pub fn insert(&mut self, slot: UploadSlot, part: UploadPart) -> bool {
        let target = match slot {
            UploadSlot::Garment => &mut self.garment,
            UploadSlot::Subject => &mut self.subject,
        };
        if target.is_some() {
            return false;
        }
        *target = Some(part);
        true
    }

    pub fn with_part(mut self, slot: UploadSlot, part: UploadPart) -> Self {
        self.insert(slot, part);
        self
    }

    pub fn push_field(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.push_field(name.to_string(), value.to_string());
        self
    }

    /// Checks that both file parts are present and non-empty.
    pub fn validate(self, mapping: &FieldMapping) -> Result<ValidatedUpload> {
        let missing: Vec<&str> = UploadSlot::ALL
            .into_iter()
            .filter(|slot| !self.has(*slot))
            .map(|slot| mapping.inbound(slot))
            .collect();

        match missing.as_slice() {
            [] => {}
            [one] => return Err(Error::ClientInput(format!("{} is required", one))),
            many => {
                return Err(Error::ClientInput(format!(
                    "{} are required",
                    many.join(" and ")
                )))
            }
        }

        let (Some(garment), Some(subject)) = (self.garment, self.subject) else {
            return Err(Error::Internal("upload slots changed during validation".to_string()));
        };

        for part in [&garment, &subject] {
            if part.is_empty() {
                return Err(Error::ClientInput(format!(
                    "{} must not be empty",
                    part.field_name
                )));
            }
        }

        Ok(ValidatedUpload {
            garment,
            subject,
            fields: self.fields,
        })
    }
}

/// Both images present and non-empty; only this type can be forwarded upstream.
#[derive(Debug)]
pub struct ValidatedUpload {
    pub garment: UploadPart,
    pub subject: UploadPart,
    pub fields: Vec<(String, String)>,
}

impl ValidatedUpload {
    pub fn part(&self, slot: UploadSlot) -> &UploadPart {
        match slot {
            UploadSlot::Garment => &self.garment,
            UploadSlot::Subject => &self.subject,
        }
    }
}
