//! Interpretation of upstream replies
//!
//! Upstreams in this domain answer either with raw image bytes or with a JSON
//! object pointing at the image under one of several key names. Both shapes
//! are normalised into [`RelayResult`].

use crate::models::RelaySuccessBody;
use crate::upstream::{mime, UpstreamReply};
use crate::{Error, Result};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use bytes::Bytes;
use url::Url;

/// JSON keys probed for the image reference, in priority order.
pub const IMAGE_KEYS: [&str; 3] = ["image_url", "url", "image"];

/// Where the resulting image lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    /// Remote image; may need a secondary fetch.
    Url(Url),
    /// Image bytes carried inside the reply (data URL or bare base64).
    Inline { content_type: String, data: Bytes },
}

impl ImageRef {
    /// Classifies a raw reference string. Relative references resolve against `base`.
    pub fn parse(raw: &str, base: &Url) -> std::result::Result<Self, String> {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix("data:") {
            return Self::parse_data_url(rest);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Url::parse(raw)
                .map(ImageRef::Url)
                .map_err(|e| format!("invalid image URL '{}': {}", raw, e));
        }

        if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(raw) {
            if let Some(content_type) = mime::sniff_image_mime(&data) {
                return Ok(ImageRef::Inline {
                    content_type: content_type.to_string(),
                    data: data.into(),
                });
            }
        }

        base.join(raw)
            .map(ImageRef::Url)
            .map_err(|e| format!("unrecognized image reference '{}': {}", raw, e))
    }

    fn parse_data_url(rest: &str) -> std::result::Result<Self, String> {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| "malformed data URL".to_string())?;

        let mut params = header.split(';');
        let declared = params.next().unwrap_or_default().trim();
        if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
            return Err("data URL is not base64-encoded".to_string());
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64 in data URL: {}", e))?;

        let content_type = if declared.is_empty() {
            mime::sniff_image_mime(&data)
                .unwrap_or(mime::OCTET_STREAM)
                .to_string()
        } else {
            declared.to_string()
        };

        Ok(ImageRef::Inline {
            content_type,
            data: data.into(),
        })
    }

    /// The value handed to the browser: a URL or a data URL.
    pub fn to_client_value(&self) -> String {
        match self {
            ImageRef::Url(url) => url.to_string(),
            ImageRef::Inline { content_type, data } => format!(
                "data:{};base64,{}",
                content_type,
                base64::engine::general_purpose::STANDARD.encode(data)
            ),
        }
    }
}

/// Normalised outcome of a successful relay call.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayResult {
    Binary {
        status: StatusCode,
        content_type: String,
        body: Bytes,
    },
    Json {
        status: StatusCode,
        image: ImageRef,
    },
}

impl RelayResult {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayResult::Binary { status, .. } | RelayResult::Json { status, .. } => *status,
        }
    }
}

impl IntoResponse for RelayResult {
    fn into_response(self) -> Response {
        match self {
            RelayResult::Binary {
                status,
                content_type,
                body,
            } => {
                let length = body.len().to_string();
                (
                    status,
                    [(CONTENT_TYPE, content_type), (CONTENT_LENGTH, length)],
                    body,
                )
                    .into_response()
            }
            RelayResult::Json { status, image } => (
                status,
                Json(RelaySuccessBody {
                    success: true,
                    image: image.to_client_value(),
                }),
            )
                .into_response(),
        }
    }
}

fn contract_error(reply: &UpstreamReply, reason: impl Into<String>) -> Error {
    Error::UpstreamContract {
        reason: reason.into(),
        status: reply.status.as_u16(),
        body: reply.body_excerpt(),
    }
}

/// Turns a raw upstream reply into a [`RelayResult`], or the matching error.
pub fn interpret(reply: UpstreamReply, base: &Url) -> Result<RelayResult> {
    if !reply.status.is_success() {
        return Err(Error::UpstreamRejected {
            status: reply.status,
            body: reply.body_excerpt(),
        });
    }

    if reply.body.is_empty() {
        return Err(contract_error(&reply, "upstream returned an empty body"));
    }

    let essence = reply.content_type.as_deref().map(mime::essence);

    match essence.as_deref() {
        Some(ct) if mime::is_image(ct) => {
            let content_type = reply.content_type.clone().unwrap_or_else(|| ct.to_string());
            Ok(RelayResult::Binary {
                status: reply.status,
                content_type,
                body: reply.body,
            })
        }
        Some(ct) if mime::is_json(ct) => interpret_json(&reply, base),
        None | Some(mime::OCTET_STREAM) => match mime::sniff_image_mime(&reply.body) {
            Some(sniffed) => Ok(RelayResult::Binary {
                status: reply.status,
                content_type: sniffed.to_string(),
                body: reply.body,
            }),
            None => interpret_json(&reply, base),
        },
        Some(other) => Err(contract_error(
            &reply,
            format!("unexpected content type '{}'", other),
        )),
    }
}

fn interpret_json(reply: &UpstreamReply, base: &Url) -> Result<RelayResult> {
    let value: serde_json::Value = serde_json::from_slice(&reply.body)
        .map_err(|e| contract_error(reply, format!("malformed JSON body: {}", e)))?;

    let raw = IMAGE_KEYS
        .iter()
        .find_map(|key| {
            value
                .get(*key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .ok_or_else(|| {
            contract_error(
                reply,
                format!("no image reference ({}) in JSON body", IMAGE_KEYS.join(", ")),
            )
        })?;

    let image = ImageRef::parse(raw, base).map_err(|reason| contract_error(reply, reason))?;

    Ok(RelayResult::Json {
        status: reply.status,
        image,
    })
}
