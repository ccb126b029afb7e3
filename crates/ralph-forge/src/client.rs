// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed GitHub REST/GraphQL client: one retry/ETag/sandbox-checked
//! `request` primitive, plus the minimal operation set the queue driver
//! and worker rely on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ralph_core::Clock;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::error::ForgeApiError;
use crate::retry::{backoff_delay, is_retriable_status, parse_retry_after};
use crate::sandbox::SandboxPolicy;
use crate::transport::{next_page_url, ForgeRequest, ForgeResponse, ForgeTransport, HttpMethod};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(30) }
    }
}

/// A page of list results plus the forge's `next` cursor, when any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub etag: Option<String>,
    pub not_modified: bool,
}

pub struct ForgeClient<T: ForgeTransport, C: Clock> {
    transport: T,
    clock: C,
    sandbox: SandboxPolicy,
    retry: RetryPolicy,
    etag_cache: Mutex<HashMap<String, String>>,
}

impl<T: ForgeTransport, C: Clock> ForgeClient<T, C> {
    pub fn new(transport: T, clock: C, sandbox: SandboxPolicy) -> Self {
        Self { transport, clock, sandbox, retry: RetryPolicy::default(), etag_cache: Mutex::new(HashMap::new()) }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn cache_key(req: &ForgeRequest) -> String {
        format!("{:?} {} {:?}", req.method, req.path, req.query)
    }

    /// The shared primitive every typed method funnels through: sandbox
    /// check before any I/O, ETag injection/update, retry with
    /// `Retry-After` honored over our own backoff schedule.
    #[instrument(skip(self, req), fields(path = %req.path, method = ?req.method))]
    pub async fn request(&self, mut req: ForgeRequest) -> Result<ForgeResponse, ForgeApiError> {
        self.sandbox.check(&req)?;

        if req.etag.is_none() {
            if let Some(cached) = self.etag_cache.lock().unwrap_or_else(|e| e.into_inner()).get(&Self::cache_key(&req))
            {
                req.etag = Some(cached.clone());
            }
        }

        let mut attempt = 0;
        loop {
            let result = self.transport.request(req.clone()).await;
            match result {
                Ok(resp) => {
                    if let Some(etag) = &resp.etag {
                        self.etag_cache
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(Self::cache_key(&req), etag.clone());
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    let retriable = err.status.map(is_retriable_status).unwrap_or(true);
                    if !retriable || attempt + 1 >= self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = err
                        .retry_after
                        .as_deref()
                        .and_then(|h| parse_retry_after(h, self.clock.utc_now()))
                        .unwrap_or_else(|| backoff_delay(self.retry.base_delay, attempt, self.retry.max_delay, 1.0));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, code = %err.code, "retrying forge request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    // -- typed operations -------------------------------------------------

    pub async fn list_issues(&self, owner: &str, repo: &str, since_rfc3339: &str, cursor: Option<String>) -> Result<Page<Value>, ForgeApiError> {
        let path = cursor.unwrap_or_else(|| format!("/repos/{owner}/{repo}/issues"));
        let mut req = ForgeRequest::new(HttpMethod::Get, path);
        if !req.path.contains('?') {
            req = req.with_query("since", since_rfc3339).with_query("state", "all").with_query("per_page", "100");
        }
        let resp = self.request(req).await?;
        if resp.not_modified {
            return Ok(Page { items: Vec::new(), next_cursor: None, etag: resp.etag, not_modified: true });
        }
        let items = resp.data.as_array().cloned().unwrap_or_default();
        let next_cursor = resp.link.as_deref().and_then(next_page_url);
        Ok(Page { items, next_cursor, etag: resp.etag, not_modified: false })
    }

    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Value, ForgeApiError> {
        let resp = self.request(ForgeRequest::new(HttpMethod::Get, format!("/repos/{owner}/{repo}/issues/{number}"))).await?;
        Ok(resp.data)
    }

    pub async fn patch_issue(&self, owner: &str, repo: &str, number: u64, fields: Value) -> Result<Value, ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Patch, format!("/repos/{owner}/{repo}/issues/{number}")).with_body(fields);
        Ok(self.request(req).await?.data)
    }

    pub async fn list_labels(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<String>, ForgeApiError> {
        let resp = self.request(ForgeRequest::new(HttpMethod::Get, format!("/repos/{owner}/{repo}/issues/{number}/labels"))).await?;
        Ok(resp
            .data
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.get("name").and_then(Value::as_str).map(str::to_string)).collect())
            .unwrap_or_default())
    }

    pub async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> Result<(), ForgeApiError> {
        if labels.is_empty() {
            return Ok(());
        }
        let req = ForgeRequest::new(HttpMethod::Post, format!("/repos/{owner}/{repo}/issues/{number}/labels"))
            .with_body(json!({ "labels": labels }));
        match self.request(req).await {
            Ok(_) => Ok(()),
            // Conflict/already-exists is idempotent success per the error taxonomy.
            Err(e) if e.status == Some(409) || e.status == Some(422) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn remove_label(&self, owner: &str, repo: &str, number: u64, label: &str) -> Result<(), ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Delete, format!("/repos/{owner}/{repo}/issues/{number}/labels/{label}"));
        match self.request(req).await {
            Ok(_) => Ok(()),
            Err(e) if e.status == Some(404) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<Value, ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Post, format!("/repos/{owner}/{repo}/pulls"))
            .with_body(json!({ "title": title, "head": head, "base": base, "body": body }));
        match self.request(req).await {
            Ok(resp) => Ok(resp.data),
            // "A pull request already exists" is an idempotent success; the
            // caller resolves the canonical PR via search afterwards.
            Err(e) if e.status == Some(422) && e.response_text.as_deref().unwrap_or("").contains("already exists") => {
                Ok(json!({ "already_exists": true }))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn merge_pr(&self, owner: &str, repo: &str, number: u64) -> Result<Value, ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Put, format!("/repos/{owner}/{repo}/pulls/{number}/merge"));
        Ok(self.request(req).await?.data)
    }

    pub async fn get_required_status_checks(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<String>, ForgeApiError> {
        let resp = self
            .request(ForgeRequest::new(HttpMethod::Get, format!("/repos/{owner}/{repo}/branches/{branch}/protection/required_status_checks")))
            .await?;
        Ok(resp
            .data
            .get("contexts")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    /// Implements the 405 "Base branch was modified" retry-once rule at
    /// the call site: update the branch, then let the caller re-attempt
    /// the merge exactly once.
    pub async fn update_branch(&self, owner: &str, repo: &str, number: u64) -> Result<(), ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Put, format!("/repos/{owner}/{repo}/pulls/{number}/update-branch"));
        self.request(req).await?;
        Ok(())
    }

    pub async fn create_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<Value, ForgeApiError> {
        let req = ForgeRequest::new(HttpMethod::Post, format!("/repos/{owner}/{repo}/issues/{number}/comments"))
            .with_body(json!({ "body": body }));
        Ok(self.request(req).await?.data)
    }

    pub async fn search_merged_prs(&self, owner: &str, repo: &str, cursor: Option<String>) -> Result<Page<Value>, ForgeApiError> {
        let path = cursor.unwrap_or_else(|| format!("/search/issues?q=repo:{owner}/{repo}+is:pr+is:merged&sort=updated&order=asc"));
        let resp = self.request(ForgeRequest::new(HttpMethod::Get, path)).await?;
        let items = resp.data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        let next_cursor = resp.link.as_deref().and_then(next_page_url);
        Ok(Page { items, next_cursor, etag: resp.etag, not_modified: resp.not_modified })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
