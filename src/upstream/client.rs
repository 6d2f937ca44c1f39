use super::{OutgoingRelayRequest, TryOnService, UpstreamReply};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header::CONTENT_TYPE, Body, Client, Response};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use url::Url;

/// reqwest-backed upstream client. One instance shares its connection pool
/// across all concurrent relay calls.
pub struct TryOnClient {
    client: Client,
    timeout: Duration,
}

impl TryOnClient {
    pub fn new(timeout: Duration) -> Self {
        Self::new_with_client(Client::new(), timeout)
    }

    pub fn new_with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Streams each spooled file into the form with its exact length, so the
    /// upstream sees a sized body and nothing is buffered in memory.
    async fn build_form(&self, request: &OutgoingRelayRequest<'_>) -> Result<Form> {
        let mut form = Form::new();

        for part in &request.parts {
            let file = part.upload.open().await?;
            let body = Body::wrap_stream(ReaderStream::new(file));
            let file_part = Part::stream_with_length(body, part.upload.len())
                .file_name(part.upload.file_name.clone())
                .mime_str(&part.upload.content_type)
                .map_err(|e| {
                    Error::Internal(format!(
                        "Invalid content type '{}' for {}: {}",
                        part.upload.content_type, part.field_name, e
                    ))
                })?;
            form = form.part(part.field_name.to_string(), file_part);
        }

        for (name, value) in request.fields {
            form = form.text(name.clone(), value.clone());
        }

        Ok(form)
    }

    fn unavailable(&self, url: &Url, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            tracing::error!("Upstream {} timed out after {:?}", url, self.timeout);
            Error::UpstreamUnavailable {
                reason: format!("request to {} timed out after {:?}", url, self.timeout),
                timed_out: true,
            }
        } else {
            tracing::error!("Failed to reach upstream {}: {}", url, err);
            Error::UpstreamUnavailable {
                reason: format!("request to {} failed: {}", url, err),
                timed_out: false,
            }
        }
    }

    async fn read_reply(&self, url: &Url, response: Response) -> Result<UpstreamReply> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| self.unavailable(url, e))?;

        tracing::debug!(
            %status,
            content_type = content_type.as_deref().unwrap_or("<none>"),
            size = body.len(),
            "Received upstream reply from {}",
            url
        );

        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl TryOnService for TryOnClient {
    async fn submit(&self, request: &OutgoingRelayRequest<'_>) -> Result<UpstreamReply> {
        let form = self.build_form(request).await?;

        tracing::debug!("Sending try-on request to {}", request.url);

        let response = self
            .client
            .post(request.url.clone())
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.unavailable(request.url, e))?;

        self.read_reply(request.url, response).await
    }

    async fn fetch_image(&self, url: &Url) -> Result<UpstreamReply> {
        tracing::debug!("Fetching image from {}", url);

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.unavailable(url, e))?;

        self.read_reply(url, response).await
    }
}
