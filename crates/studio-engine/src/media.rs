use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::Part as MultipartPart;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use studio_contracts::{StudioError, StudioResult};

use crate::http::{send, truncate_text};

/// Raw bytes of an image or video input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub mime: String,
}

pub fn is_data_url(input: &str) -> bool {
    input.trim_start().starts_with("data:")
}

/// Decodes `data:<mime>;base64,<payload>`.
pub fn parse_data_url(input: &str) -> StudioResult<MediaBytes> {
    let invalid = || StudioError::validation("Invalid data URL format");
    let rest = input.trim().strip_prefix("data:").ok_or_else(invalid)?;
    let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let mime = header.strip_suffix(";base64").ok_or_else(invalid)?;
    if mime.is_empty() || mime.contains(';') {
        return Err(invalid());
    }
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|_| StudioError::validation("Invalid data URL payload"))?;
    Ok(MediaBytes {
        bytes,
        mime: mime.to_string(),
    })
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// Base64 payload of a data URL, or the input unchanged.
pub fn strip_data_url_prefix(input: &str) -> &str {
    if !is_data_url(input) {
        return input;
    }
    input
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or(input)
}

/// Materializes an input given as a data URL or a remote URL.
pub fn load_media(
    http: &HttpClient,
    input: &str,
    fallback_mime: &str,
    what: &str,
) -> StudioResult<MediaBytes> {
    if is_data_url(input) {
        return parse_data_url(input);
    }
    if !(input.starts_with("http://") || input.starts_with("https://")) {
        return Err(StudioError::validation(format!(
            "Unsupported {what} source '{}'",
            truncate_text(input, 64)
        )));
    }
    let response = send(what, http.get(input))?;
    let status = response.status();
    if !status.is_success() {
        return Err(StudioError::upstream(format!(
            "Failed to fetch {what}: {}",
            status.as_u16()
        )));
    }
    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback_mime.to_string());
    let bytes = response
        .bytes()
        .map_err(|err| StudioError::upstream(format!("Failed to read {what}: {err}")))?
        .to_vec();
    Ok(MediaBytes { bytes, mime })
}

impl MediaBytes {
    /// Multipart file part named `{stem}.{ext}`.
    pub fn into_part(self, stem: &str) -> StudioResult<MultipartPart> {
        let file_name = format!("{stem}.{}", extension_for_mime(&self.mime));
        MultipartPart::bytes(self.bytes)
            .file_name(file_name)
            .mime_str(&self.mime)
            .map_err(|_| StudioError::validation(format!("Invalid mime type '{}'", self.mime)))
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "bin",
    }
}
