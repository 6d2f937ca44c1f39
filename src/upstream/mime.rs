pub const OCTET_STREAM: &str = "application/octet-stream";

/// Lowercased media type without parameters (`image/jpeg; q=1` -> `image/jpeg`).
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_image(content_type: &str) -> bool {
    essence(content_type).starts_with("image/")
}

pub fn is_json(content_type: &str) -> bool {
    let essence = essence(content_type);
    essence == "application/json" || essence.ends_with("+json")
}

/// Returns the image MIME type for a recognised signature, `None` otherwise.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes) {
        Ok(format) => Some(format.to_mime_type()),
        Err(_) => {
            tracing::debug!(
                "Unrecognized image format (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            None
        }
    }
}

/// Picks the content type for an uploaded part: the declared one when it parses,
/// else a guess from the filename, else the sniffed signature, else octet-stream.
pub fn resolve_upload_mime(declared: Option<&str>, file_name: &str, head: &[u8]) -> String {
    if let Some(declared) = declared {
        if declared.parse::<mime_guess::mime::Mime>().is_ok() {
            return declared.to_string();
        }
        tracing::warn!("Ignoring unparsable content type '{}' for {}", declared, file_name);
    }

    if let Some(guess) = mime_guess::from_path(file_name).first() {
        if guess.type_() == mime_guess::mime::IMAGE {
            return guess.essence_str().to_string();
        }
    }

    sniff_image_mime(head).unwrap_or(OCTET_STREAM).to_string()
}
