//! Owned view of an inbound request, as seen by the scorer and the gate.

use std::net::IpAddr;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Everything the defense layer inspects about one request.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub path: String,
    /// Path plus the raw, still-encoded query string.
    pub url: String,
    pub headers: HeaderMap,
    /// Decoded query pairs.
    pub query: Vec<(String, String)>,
    /// Parsed body: JSON as-is, forms as an object of strings, other text
    /// as a string. `None` for empty or binary bodies.
    pub body: Option<Value>,
    pub body_len: usize,
    pub source_ip: Option<IpAddr>,
}

impl RequestSnapshot {
    /// Snapshot with no headers and no body. `url` is a path with an
    /// optional query string.
    pub fn new(method: Method, url: &str) -> Self {
        let (path, raw_query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        Self {
            method,
            path: path.to_string(),
            url: url.to_string(),
            headers: HeaderMap::new(),
            query: raw_query.map(decode_pairs).unwrap_or_default(),
            body: None,
            body_len: 0,
            source_ip: None,
        }
    }

    /// Build from the head of a live request and its buffered body.
    pub fn from_parts(parts: &Parts, body: &[u8], source_ip: Option<IpAddr>) -> Self {
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let mut snapshot = Self::new(parts.method.clone(), &url);
        snapshot.headers = parts.headers.clone();
        snapshot.body = parse_body(content_type(&parts.headers), body);
        snapshot.body_len = body.len();
        snapshot.source_ip = source_ip;
        snapshot
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.body_len = body.to_string().len();
        self.body = Some(body);
        self
    }

    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }

    /// Declared body size, when the header parses.
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// POST, PUT, PATCH or DELETE.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Value of a cookie from the `cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        cookie_value(&self.headers, name)
    }

    /// String leaves of the body, each with a dotted location.
    pub fn body_strings(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        if let Some(body) = &self.body {
            collect_strings(body, String::from("body"), &mut out);
        }
        out
    }

    /// First string found at the top level of the body for any of `fields`.
    pub fn body_field(&self, fields: &[String]) -> Option<&str> {
        let object = self.body.as_ref()?.as_object()?;
        fields
            .iter()
            .find_map(|field| object.get(field).and_then(Value::as_str))
    }
}

/// Value of a cookie in any `cookie` header.
pub(crate) fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

fn collect_strings<'a>(value: &'a Value, location: String, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::String(s) => out.push((location, s.as_str())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_strings(item, format!("{location}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_strings(item, format!("{location}.{key}"), out);
            }
        }
        _ => {}
    }
}

fn decode_pairs(raw: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn parse_body(content_type: &str, body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime == "application/x-www-form-urlencoded" {
        let map: Map<String, Value> = form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Some(Value::Object(map));
    }

    if mime.ends_with("json") {
        if let Ok(value) = serde_json::from_slice(body) {
            return Some(value);
        }
    }

    std::str::from_utf8(body)
        .ok()
        .map(|text| Value::String(text.to_string()))
}
