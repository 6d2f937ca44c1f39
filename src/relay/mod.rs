//! The upload relay
//!
//! One component, parameterised by [`RelayConfig`], that validates a two-image
//! upload, forwards it to the configured try-on upstream and shapes the reply
//! for the caller. Every call runs `Idle → Validating → Forwarding →
//! RelayingResponse → Done`, or stops in `Failed`. Nothing is retried here:
//! the uploaded streams may already be consumed, so retrying is the caller's call.

pub mod response;

pub use response::{ImageRef, RelayResult};

use crate::models::{RelayConfig, ResponseMode};
use crate::upload::IncomingUpload;
use crate::upstream::{mime, OutgoingRelayRequest, TryOnService, UpstreamReply};
use bytes::Bytes;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, Instrument};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStage {
    Idle,
    Validating,
    Forwarding,
    RelayingResponse,
    Done,
    Failed(String),
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStage::Idle => write!(f, "idle"),
            RelayStage::Validating => write!(f, "validating"),
            RelayStage::Forwarding => write!(f, "forwarding"),
            RelayStage::RelayingResponse => write!(f, "relaying_response"),
            RelayStage::Done => write!(f, "done"),
            RelayStage::Failed(reason) => write!(f, "failed({})", reason),
        }
    }
}

struct StageTracker {
    current: RelayStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: RelayStage::Idle,
        }
    }

    fn enter(&mut self, next: RelayStage) {
        debug!("Relay stage {} -> {}", self.current, next);
        self.current = next;
    }

    fn fail(&mut self, err: &Error) {
        let failed = RelayStage::Failed(err.kind().to_string());
        debug!("Relay stage {} -> {}: {}", self.current, failed, err);
        self.current = failed;
    }
}

pub struct Relay {
    config: RelayConfig,
    upstream: Arc<dyn TryOnService>,
}

impl Relay {
    pub fn new(config: RelayConfig, upstream: Arc<dyn TryOnService>) -> Self {
        Self { config, upstream }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs one relay call. The upload (and its temporary files) is consumed
    /// and released before this returns, whatever the outcome.
    pub async fn relay(&self, upload: IncomingUpload) -> Result<RelayResult> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "relay",
            %request_id,
            upstream = %self.config.upstream_url
        );

        async move {
            let mut stage = StageTracker::new();
            match self.run(upload, &mut stage).await {
                Ok(result) => {
                    stage.enter(RelayStage::Done);
                    Ok(result)
                }
                Err(err) => {
                    stage.fail(&err);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, upload: IncomingUpload, stage: &mut StageTracker) -> Result<RelayResult> {
        stage.enter(RelayStage::Validating);
        let upload = upload.validate(&self.config.fields)?;

        stage.enter(RelayStage::Forwarding);
        let reply = {
            let request =
                OutgoingRelayRequest::new(&self.config.upstream_url, &upload, &self.config.fields);
            self.upstream.submit(&request).await?
        };
        info!(
            garment_bytes = upload.garment.len(),
            subject_bytes = upload.subject.len(),
            status = %reply.status,
            "Upstream replied"
        );
        // Temporary files are not needed past this point.
        drop(upload);

        stage.enter(RelayStage::RelayingResponse);
        let result = response::interpret(reply, &self.config.upstream_url)?;
        self.shape(result).await
    }

    /// Applies the configured [`ResponseMode`] to an interpreted reply.
    async fn shape(&self, result: RelayResult) -> Result<RelayResult> {
        match (self.config.response_mode, result) {
            (ResponseMode::Auto, result) => Ok(result),
            (
                ResponseMode::Json,
                RelayResult::Binary {
                    status,
                    content_type,
                    body,
                },
            ) => Ok(RelayResult::Json {
                status,
                image: ImageRef::Inline {
                    content_type,
                    data: body,
                },
            }),
            (ResponseMode::Binary, RelayResult::Json { status, image }) => {
                let (content_type, body) = match image {
                    ImageRef::Inline { content_type, data } => {
                        let reply = UpstreamReply::new(status, Some(&content_type), data);
                        checked_image(reply, "inline result")?
                    }
                    ImageRef::Url(url) => self.fetch_result_image(&url).await?,
                };
                Ok(RelayResult::Binary {
                    status,
                    content_type,
                    body,
                })
            }
            (_, result) => Ok(result),
        }
    }

    async fn fetch_result_image(&self, url: &Url) -> Result<(String, Bytes)> {
        debug!("Resolving result image from {}", url);
        let reply = self.upstream.fetch_image(url).await?;

        if !reply.status.is_success() {
            return Err(Error::UpstreamContract {
                reason: format!(
                    "result image at {} could not be fetched (status {})",
                    url, reply.status
                ),
                status: reply.status.as_u16(),
                body: reply.body_excerpt(),
            });
        }

        checked_image(reply, &format!("result at {}", url))
    }
}

/// Accepts a result body only if it is an image: a declared `image/*` type
/// is kept, anything else must sniff as an image.
fn checked_image(reply: UpstreamReply, what: &str) -> Result<(String, Bytes)> {
    let content_type = match reply.content_type.as_deref() {
        Some(ct) if mime::is_image(ct) => ct.to_string(),
        declared => match mime::sniff_image_mime(&reply.body) {
            Some(sniffed) => {
                debug!(
                    "{} declared {:?}, serving sniffed {}",
                    what, declared, sniffed
                );
                sniffed.to_string()
            }
            None => {
                return Err(Error::UpstreamContract {
                    reason: format!(
                        "{} is not an image ({})",
                        what,
                        declared.unwrap_or("no content type")
                    ),
                    status: reply.status.as_u16(),
                    body: reply.body_excerpt(),
                })
            }
        },
    };

    Ok((content_type, reply.body))
}
