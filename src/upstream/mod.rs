//! Upstream try-on inference integration
//!
//! The upstream is an opaque HTTP endpoint taking two image files as
//! multipart/form-data. This module only moves bytes; deciding what the
//! reply means is the relay's job.

pub mod client;
pub mod mime;
pub mod mock;

pub use client::TryOnClient;
pub use mock::{MockReply, MockTryOnClient, RecordedCall, RecordedPart};

use crate::models::{FieldMapping, UploadSlot};
use crate::upload::{UploadPart, ValidatedUpload};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

// Upstream bodies echoed into error messages are cut to this many bytes.
const ECHO_LIMIT: usize = 2048;

/// One file part of the outbound request, under its upstream field name.
#[derive(Debug)]
pub struct OutgoingPart<'a> {
    pub field_name: &'a str,
    pub upload: &'a UploadPart,
}

/// The multipart request sent to the upstream, borrowing the spooled uploads.
#[derive(Debug)]
pub struct OutgoingRelayRequest<'a> {
    pub url: &'a Url,
    pub parts: Vec<OutgoingPart<'a>>,
    pub fields: &'a [(String, String)],
}

impl<'a> OutgoingRelayRequest<'a> {
    pub fn new(url: &'a Url, upload: &'a ValidatedUpload, mapping: &'a FieldMapping) -> Self {
        let parts = UploadSlot::ALL
            .into_iter()
            .map(|slot| OutgoingPart {
                field_name: mapping.upstream(slot),
                upload: upload.part(slot),
            })
            .collect();

        Self {
            url,
            parts,
            fields: &upload.fields,
        }
    }
}

/// Raw upstream reply: status, declared content type and the full body.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamReply {
    pub fn new(status: StatusCode, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn image(content_type: &str, body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, Some(content_type), body)
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status, Some("application/json"), value.to_string())
    }

    /// Body as lossy UTF-8, truncated for inclusion in error messages.
    pub fn body_excerpt(&self) -> String {
        let end = self.body.len().min(ECHO_LIMIT);
        let mut text = String::from_utf8_lossy(&self.body[..end]).trim().to_string();
        if self.body.len() > ECHO_LIMIT {
            text.push_str("...");
        }
        text
    }
}

#[async_trait]
pub trait TryOnService: Send + Sync {
    /// Sends the two images (plus pass-through fields) in a single POST.
    async fn submit(&self, request: &OutgoingRelayRequest<'_>) -> Result<UpstreamReply>;

    /// Plain GET used to resolve image URLs returned by the upstream or storage.
    async fn fetch_image(&self, url: &Url) -> Result<UpstreamReply>;
}
