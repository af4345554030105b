use reqwest::blocking::Client as HttpClient;
use studio_contracts::api::DownloadQuery;
use studio_contracts::{StudioError, StudioResult};
use tracing::warn;

use crate::media::{is_data_url, parse_data_url};

/// Upstream headers never forwarded to the client.
const DROPPED_HEADERS: &[&str] = &[
    "x-robots-tag",
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "content-type",
    "content-disposition",
    "connection",
];

/// A fetched resource ready to be re-served as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedResource {
    pub content_type: String,
    pub content_disposition: String,
    /// Forwarded upstream headers, lowercase names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DownloadedResource {
    /// Every response header, forced ones included.
    pub fn all_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        headers.push(("content-type".to_string(), self.content_type.clone()));
        headers.push((
            "content-disposition".to_string(),
            self.content_disposition.clone(),
        ));
        headers
    }
}

pub fn attachment_disposition(filename: &str) -> String {
    let clean: String = filename
        .chars()
        .filter(|ch| !matches!(ch, '"' | '\r' | '\n' | '\\'))
        .collect();
    let clean = if clean.trim().is_empty() {
        "download".to_string()
    } else {
        clean
    };
    format!("attachment; filename=\"{clean}\"")
}

#[derive(Debug, Clone)]
pub struct Downloader {
    http: HttpClient,
}

impl Downloader {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn fetch(&self, query: &DownloadQuery) -> StudioResult<DownloadedResource> {
        let source = query.source()?;
        let disposition = attachment_disposition(query.filename());

        if is_data_url(source) {
            let media = parse_data_url(source)?;
            return Ok(DownloadedResource {
                content_type: media.mime,
                content_disposition: disposition,
                headers: Vec::new(),
                body: media.bytes,
            });
        }
        if !(source.starts_with("http://") || source.starts_with("https://")) {
            return Err(StudioError::validation("Unsupported url scheme"));
        }

        let response = self.http.get(source).send().map_err(|err| {
            warn!(error = %err, "download proxy fetch failed");
            StudioError::internal("Download proxy failed")
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(StudioError::upstream(format!(
                "Upstream fetch failed: {}",
                status.as_u16()
            )));
        }

        let mut content_type = "application/octet-stream".to_string();
        let mut headers = Vec::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let name = name.as_str().to_ascii_lowercase();
            if name == "content-type" {
                content_type = value.to_string();
                continue;
            }
            if DROPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.push((name, value.to_string()));
        }
        let body = response
            .bytes()
            .map_err(|err| {
                warn!(error = %err, "download proxy body read failed");
                StudioError::internal("Download proxy failed")
            })?
            .to_vec();

        Ok(DownloadedResource {
            content_type,
            content_disposition: disposition,
            headers,
            body,
        })
    }
}
