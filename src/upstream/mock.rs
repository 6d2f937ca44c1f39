use super::{OutgoingRelayRequest, TryOnService, UpstreamReply};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

/// Canned outcome of a mocked upstream call.
#[derive(Debug, Clone)]
pub enum MockReply {
    Reply(UpstreamReply),
    Unavailable { timed_out: bool },
}

impl MockReply {
    fn into_result(self, url: &Url) -> Result<UpstreamReply> {
        match self {
            MockReply::Reply(reply) => Ok(reply),
            MockReply::Unavailable { timed_out } => Err(Error::UpstreamUnavailable {
                reason: format!("mock upstream {} unavailable", url),
                timed_out,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPart {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// What the mock saw in one `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub url: String,
    pub parts: Vec<RecordedPart>,
    pub fields: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct MockTryOnClient {
    replies: Arc<Mutex<Vec<MockReply>>>,
    fetch_replies: Arc<Mutex<HashMap<String, MockReply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    fetches: Arc<Mutex<Vec<String>>>,
}

impl MockTryOnClient {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(Vec::new())),
            fetch_replies: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fetches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_reply(self, reply: UpstreamReply) -> Self {
        self.replies.lock().unwrap().push(MockReply::Reply(reply));
        self
    }

    pub fn with_unavailable(self, timed_out: bool) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push(MockReply::Unavailable { timed_out });
        self
    }

    pub fn with_fetch_reply(self, url: &str, reply: UpstreamReply) -> Self {
        self.fetch_replies
            .lock()
            .unwrap()
            .insert(url.to_string(), MockReply::Reply(reply));
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn default_reply() -> UpstreamReply {
        // Tiny valid PNG
        UpstreamReply::image(
            "image/png",
            vec![
                0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
                0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
                0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1 pixel
                0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49,
                0x44, 0x41, // IDAT chunk
                0x54, 0x08, 0x99, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0xE2,
                0x25, 0x00, 0xBC, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, // IEND chunk
                0x44, 0xAE, 0x42, 0x60, 0x82,
            ],
        )
    }
}

impl Default for MockTryOnClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TryOnService for MockTryOnClient {
    async fn submit(&self, request: &OutgoingRelayRequest<'_>) -> Result<UpstreamReply> {
        let mut parts = Vec::with_capacity(request.parts.len());
        for part in &request.parts {
            parts.push(RecordedPart {
                field_name: part.field_name.to_string(),
                file_name: part.upload.file_name.clone(),
                content_type: part.upload.content_type.clone(),
                bytes: part.upload.read_all().await?,
            });
        }

        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                url: request.url.to_string(),
                parts,
                fields: request.fields.to_vec(),
            });
            calls.len() - 1
        };

        let reply = {
            let replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                MockReply::Reply(Self::default_reply())
            } else {
                replies[index % replies.len()].clone()
            }
        };

        reply.into_result(request.url)
    }

    async fn fetch_image(&self, url: &Url) -> Result<UpstreamReply> {
        self.fetches.lock().unwrap().push(url.to_string());

        let reply = self.fetch_replies.lock().unwrap().get(url.as_str()).cloned();
        match reply {
            Some(reply) => reply.into_result(url),
            None => Ok(UpstreamReply::new(
                reqwest::StatusCode::NOT_FOUND,
                Some("text/plain"),
                format!("No mock image at {}", url),
            )),
        }
    }
}
