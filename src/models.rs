//! Data models and configuration
//!
//! Defines the relay configuration (upstream URL, field-name mapping,
//! response shape) and the JSON bodies the service sends back to callers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_ROUTE: &str = "/api/try-on";
pub const DEFAULT_GARMENT_FIELD: &str = "clothing_image";
pub const DEFAULT_SUBJECT_FIELD: &str = "avatar_image";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// The two file slots every try-on request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadSlot {
    Garment,
    Subject,
}

impl UploadSlot {
    pub const ALL: [UploadSlot; 2] = [UploadSlot::Garment, UploadSlot::Subject];
}

/// Inbound and upstream field names for the two file slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub garment: String,
    pub subject: String,
    pub upstream_garment: String,
    pub upstream_subject: String,
}

impl FieldMapping {
    /// Same names on both sides of the relay.
    pub fn symmetric(garment: &str, subject: &str) -> Self {
        Self {
            garment: garment.to_string(),
            subject: subject.to_string(),
            upstream_garment: garment.to_string(),
            upstream_subject: subject.to_string(),
        }
    }

    pub fn with_upstream_names(mut self, garment: &str, subject: &str) -> Self {
        self.upstream_garment = garment.to_string();
        self.upstream_subject = subject.to_string();
        self
    }

    pub fn inbound(&self, slot: UploadSlot) -> &str {
        match slot {
            UploadSlot::Garment => &self.garment,
            UploadSlot::Subject => &self.subject,
        }
    }

    pub fn upstream(&self, slot: UploadSlot) -> &str {
        match slot {
            UploadSlot::Garment => &self.upstream_garment,
            UploadSlot::Subject => &self.upstream_subject,
        }
    }

    pub fn slot_for(&self, field_name: &str) -> Option<UploadSlot> {
        UploadSlot::ALL
            .into_iter()
            .find(|slot| self.inbound(*slot) == field_name)
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::symmetric(DEFAULT_GARMENT_FIELD, DEFAULT_SUBJECT_FIELD)
    }
}

/// Shape of the body returned to the caller on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Binary stays binary, JSON becomes `{ success, image }`.
    #[default]
    Auto,
    /// Always image bytes; JSON references are resolved.
    Binary,
    /// Always `{ success, image }`; binary results become data URLs.
    Json,
}

impl FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ResponseMode::Auto),
            "binary" => Ok(ResponseMode::Binary),
            "json" => Ok(ResponseMode::Json),
            other => Err(Error::Config(format!(
                "Invalid response mode '{}'. Expected auto, binary or json",
                other
            ))),
        }
    }
}

/// Everything one relay route needs to know about its upstream.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub route: String,
    pub upstream_url: Url,
    pub fields: FieldMapping,
    pub forward_fields: Vec<String>,
    pub response_mode: ResponseMode,
    pub timeout: Duration,
    pub temp_dir: Option<PathBuf>,
}

impl RelayConfig {
    pub fn new(upstream_url: Url) -> Self {
        Self {
            route: DEFAULT_ROUTE.to_string(),
            upstream_url,
            fields: FieldMapping::default(),
            forward_fields: Vec::new(),
            response_mode: ResponseMode::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temp_dir: None,
        }
    }

    pub fn with_route(mut self, route: &str) -> Self {
        self.route = route.to_string();
        self
    }

    pub fn with_fields(mut self, fields: FieldMapping) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_forward_fields(mut self, fields: &[&str]) -> Self {
        self.forward_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub relay: RelayConfig,
    pub storage_public_url: Option<Url>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_address = var("BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid BIND_ADDRESS: {}", e)))?;

        let upstream_url = var("RELAY_UPSTREAM_URL")
            .ok_or_else(|| Error::Config("RELAY_UPSTREAM_URL not set".to_string()))?;
        let upstream_url = Url::parse(upstream_url.trim())
            .map_err(|e| Error::Config(format!("Invalid RELAY_UPSTREAM_URL: {}", e)))?;

        let garment = var("RELAY_GARMENT_FIELD").unwrap_or_else(|| DEFAULT_GARMENT_FIELD.into());
        let subject = var("RELAY_SUBJECT_FIELD").unwrap_or_else(|| DEFAULT_SUBJECT_FIELD.into());
        if garment == subject {
            return Err(Error::Config(format!(
                "Garment and subject fields must differ (both are '{}')",
                garment
            )));
        }
        let fields = FieldMapping {
            upstream_garment: var("RELAY_UPSTREAM_GARMENT_FIELD").unwrap_or_else(|| garment.clone()),
            upstream_subject: var("RELAY_UPSTREAM_SUBJECT_FIELD").unwrap_or_else(|| subject.clone()),
            garment,
            subject,
        };

        let forward_fields = var("RELAY_FORWARD_FIELDS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let response_mode = match var("RELAY_RESPONSE_MODE") {
            Some(mode) => mode.parse()?,
            None => ResponseMode::default(),
        };

        let timeout_secs = match var("RELAY_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("Invalid RELAY_TIMEOUT_SECS: {}", e)))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(Error::Config(
                "RELAY_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let route = var("RELAY_ROUTE").unwrap_or_else(|| DEFAULT_ROUTE.to_string());
        if !route.starts_with('/') {
            return Err(Error::Config(format!(
                "RELAY_ROUTE must start with '/', got '{}'",
                route
            )));
        }

        let storage_public_url = var("STORAGE_PUBLIC_URL")
            .map(|raw| {
                Url::parse(raw.trim())
                    .map_err(|e| Error::Config(format!("Invalid STORAGE_PUBLIC_URL: {}", e)))
            })
            .transpose()?;

        Ok(Self {
            bind_address,
            relay: RelayConfig {
                route,
                upstream_url,
                fields,
                forward_fields,
                response_mode,
                timeout: Duration::from_secs(timeout_secs),
                temp_dir: var("RELAY_TEMP_DIR").map(PathBuf::from),
            },
            storage_public_url,
        })
    }
}

/// Error body returned at the outer boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<serde_json::Value>,
}

/// JSON success body: `{ "success": true, "image": <reference> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySuccessBody {
    pub success: bool,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
}
