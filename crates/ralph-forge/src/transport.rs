// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dependency-injection seam between [`crate::client::ForgeClient`]
//! and the network: a single `request` contract, a production
//! implementation over `reqwest`, and a fake for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ForgeApiError;
use crate::retry::classify_network_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn is_mutation(self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One forge call: `request(path, {method, body, headers?, query?})`.
#[derive(Debug, Clone)]
pub struct ForgeRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub etag: Option<String>,
}

impl ForgeRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, headers: Vec::new(), query: Vec::new(), etag: None }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Tokenized scan for a GraphQL `mutation` keyword in the request
    /// body, used by the sandbox tripwire when `path` is the GraphQL
    /// endpoint rather than a REST resource.
    pub fn is_graphql_mutation(&self) -> bool {
        let Some(body) = &self.body else { return false };
        let Some(query) = body.get("query").and_then(Value::as_str) else { return false };
        query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .any(|token| token.eq_ignore_ascii_case("mutation"))
    }
}

#[derive(Debug, Clone)]
pub struct ForgeResponse {
    pub data: Value,
    pub status: u16,
    pub etag: Option<String>,
    /// Raw `Link` header, carrying `rel="next"` pagination when present.
    pub link: Option<String>,
    /// `true` when the server answered `304 Not Modified` against a
    /// supplied ETag: the sentinel empty result that preserves the
    /// caller's cursor.
    pub not_modified: bool,
}

impl ForgeResponse {
    pub fn not_modified(etag: Option<String>) -> Self {
        Self { data: Value::Null, status: 304, etag, link: None, not_modified: true }
    }
}

/// Extracts the `rel="next"` URL from a GitHub-style `Link` header.
pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let url_part = segments.next()?.trim();
        let is_next = segments.any(|s| s.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        url_part.trim_start_matches('<').trim_end_matches('>').to_string().into()
    })
}

#[async_trait]
pub trait ForgeTransport: Send + Sync {
    async fn request(&self, req: ForgeRequest) -> Result<ForgeResponse, ForgeApiError>;
}

/// Production transport: bearer auth from an env var, `Link`-header
/// pagination left to the caller (it reads the raw header off `data`'s
/// sibling fields via [`ForgeResponse`] extension points as needed).
pub struct ReqwestForgeTransport {
    client: reqwest::Client,
    base_url: String,
    token_env_var: String,
}

impl ReqwestForgeTransport {
    pub fn new(base_url: impl Into<String>, token_env_var: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), token_env_var: token_env_var.into() }
    }

    fn token(&self) -> Result<String, ForgeApiError> {
        std::env::var(&self.token_env_var).map_err(|_| {
            ForgeApiError::new("AUTH_TOKEN_MISSING", format!("{} is not set", self.token_env_var))
        })
    }
}

#[async_trait]
impl ForgeTransport for ReqwestForgeTransport {
    async fn request(&self, req: ForgeRequest) -> Result<ForgeResponse, ForgeApiError> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self
            .client
            .request(req.method.as_reqwest(), url)
            .bearer_auth(token)
            .header("accept", "application/vnd.github+json")
            .query(&req.query);

        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(etag) = &req.etag {
            builder = builder.header("if-none-match", etag);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let kind = classify_network_error(&e);
            ForgeApiError::new(format!("{:?}", kind).to_uppercase(), e.to_string())
        })?;

        let status = response.status().as_u16();
        let etag = response.headers().get("etag").and_then(|v| v.to_str().ok()).map(str::to_string);
        let link = response.headers().get("link").and_then(|v| v.to_str().ok()).map(str::to_string);
        let request_id =
            response.headers().get("x-github-request-id").and_then(|v| v.to_str().ok()).map(str::to_string);
        let retry_after = response.headers().get("retry-after").and_then(|v| v.to_str().ok()).map(str::to_string);

        if status == 304 {
            return Ok(ForgeResponse::not_modified(etag));
        }

        let text = response.text().await.unwrap_or_default();
        if status >= 400 {
            let mut err = ForgeApiError::new(status_code(status), format!("forge request failed: {status}"))
                .with_status(status)
                .with_response_text(text);
            if let Some(id) = request_id {
                err = err.with_request_id(id);
            }
            if let Some(ra) = retry_after {
                err = err.with_retry_after(ra);
            }
            return Err(err);
        }

        let data: Value = if text.is_empty() { Value::Null } else { serde_json::from_str(&text).unwrap_or(Value::Null) };
        Ok(ForgeResponse { data, status, etag, link, not_modified: false })
    }
}

fn status_code(status: u16) -> &'static str {
    match status {
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        405 => "METHOD_NOT_ALLOWED",
        409 => "CONFLICT",
        422 => "UNPROCESSABLE",
        _ if (500..600).contains(&status) => "SERVER_ERROR",
        _ => "HTTP_ERROR",
    }
}

/// Canned-response transport for tests: records every request made and
/// replays a pre-loaded queue of results (or a default 404 if exhausted).
pub struct FakeForgeTransport {
    responses: Mutex<VecDeque<Result<ForgeResponse, ForgeApiError>>>,
    requests: Mutex<Vec<ForgeRequest>>,
}

impl Default for FakeForgeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeForgeTransport {
    pub fn new() -> Self {
        Self { responses: Mutex::new(VecDeque::new()), requests: Mutex::new(Vec::new()) }
    }

    pub fn push_ok(&self, response: ForgeResponse) {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).push_back(Ok(response));
    }

    pub fn push_err(&self, err: ForgeApiError) {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<ForgeRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ForgeTransport for FakeForgeTransport {
    async fn request(&self, req: ForgeRequest) -> Result<ForgeResponse, ForgeApiError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(req);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ForgeApiError::new("NOT_FOUND", "no canned response queued").with_status(404)))
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
