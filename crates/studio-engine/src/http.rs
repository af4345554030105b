use std::env;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::{Map, Value};
use studio_contracts::{StudioError, StudioResult};

pub fn build_client(timeout: Duration) -> StudioResult<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| StudioError::internal(format!("HTTP client init failed: {err}")))
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// First non-empty value among `env_keys`, else `default`, without a trailing slash.
pub fn api_base(env_keys: &[&str], default: &str) -> String {
    env_keys
        .iter()
        .find_map(|key| non_empty_env(key))
        .unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string()
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// First non-empty string found at any of the JSON pointers.
pub fn string_at(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|pointer| {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    })
}

/// Body text as JSON when it parses, raw text otherwise.
pub fn details_from_text(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(body)
            .unwrap_or_else(|_| Value::String(truncate_text(body, 2048))),
    )
}

pub fn send(provider: &str, request: RequestBuilder) -> StudioResult<HttpResponse> {
    request.send().map_err(|err| {
        if err.is_timeout() {
            StudioError::timeout(format!("{provider} request timed out"))
        } else {
            StudioError::upstream(format!("{provider} request failed: {err}"))
        }
    })
}

/// Status code and body text of a response.
pub fn read_text(provider: &str, response: HttpResponse) -> StudioResult<(u16, String)> {
    let code = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| StudioError::upstream(format!("{provider} response body read failed: {err}")))?;
    Ok((code, body))
}

pub fn parse_json(provider: &str, body: &str) -> StudioResult<Value> {
    serde_json::from_str(body).map_err(|_| {
        StudioError::upstream_with(
            format!("Invalid JSON from {provider}"),
            502,
            details_from_text(body),
        )
    })
}

/// Parses a 2xx body as JSON; anything else becomes a 502 carrying the body.
pub fn response_json_or_error(provider: &str, response: HttpResponse) -> StudioResult<Value> {
    let (code, body) = read_text(provider, response)?;
    if !(200..300).contains(&code) {
        return Err(StudioError::upstream_with(
            format!("{provider} request failed: {code}"),
            502,
            details_from_text(&body),
        ));
    }
    parse_json(provider, &body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn string_at_takes_first_present_pointer() {
        let value = json!({"data": [{"url": ""}], "file": {"download_url": "https://cdn/v.mp4"}});
        assert_eq!(
            string_at(&value, &["/data/0/url", "/file/download_url"]),
            Some("https://cdn/v.mp4".to_string())
        );
        assert_eq!(string_at(&value, &["/missing"]), None);
    }

    #[test]
    fn details_keep_json_or_text() {
        assert_eq!(details_from_text("{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(details_from_text("oops"), Some(json!("oops")));
        assert_eq!(details_from_text("  "), None);
    }

    #[test]
    fn api_base_falls_back_and_trims_slash() {
        assert_eq!(
            api_base(&["STUDIO_TEST_UNSET_API_BASE"], "https://api.example.com/v1/"),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn invalid_json_is_upstream_error() {
        let err = parse_json("Ideogram", "<html>").err();
        assert_eq!(
            err.as_ref().map(|err| err.to_string()),
            Some("Invalid JSON from Ideogram".to_string())
        );
        assert_eq!(err.map(|err| err.http_status()), Some(502));
    }
}
