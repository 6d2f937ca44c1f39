//! Multipart relay for virtual try-on uploads.
//!
//! Accepts a garment image and a subject image from a client, streams both to
//! an upstream inference service in a single request, and hands the result
//! image back to the caller as raw bytes or a JSON reference.

pub mod app;
pub mod error;
pub mod models;
pub mod relay;
pub mod upload;
pub mod upstream;

pub use error::{Error, Result};
