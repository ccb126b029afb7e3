// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The sandbox tripwire: in `sandbox` profile, any write is rejected
//! before network I/O unless the target repo matches the configured
//! owner allowlist and name prefix.

use crate::error::ForgeApiError;
use crate::transport::ForgeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Production,
    Sandbox,
}

#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub profile: Profile,
    pub allowed_owners: Vec<String>,
    pub repo_name_prefix: String,
}

impl SandboxPolicy {
    pub fn production() -> Self {
        Self { profile: Profile::Production, allowed_owners: Vec::new(), repo_name_prefix: String::new() }
    }

    pub fn sandbox(allowed_owners: Vec<String>, repo_name_prefix: impl Into<String>) -> Self {
        Self { profile: Profile::Sandbox, allowed_owners, repo_name_prefix: repo_name_prefix.into() }
    }

    /// Rejects the request before any network call if it is a write and
    /// the inferred target repo does not match `{allowedOwners} ×
    /// "{repoNamePrefix}*"`.
    pub fn check(&self, req: &ForgeRequest) -> Result<(), ForgeApiError> {
        if self.profile != Profile::Sandbox {
            return Ok(());
        }
        let is_write = req.method.is_mutation() || req.is_graphql_mutation();
        if !is_write {
            return Ok(());
        }

        let Some((owner, repo_name)) = infer_target(req) else {
            return Err(ForgeApiError::sandbox_tripwire(
                "SANDBOX TRIPWIRE: cannot determine target repo for a write in sandbox profile",
            ));
        };

        let owner_ok = self.allowed_owners.iter().any(|o| o.eq_ignore_ascii_case(&owner));
        let name_ok = repo_name.starts_with(&self.repo_name_prefix);
        if owner_ok && name_ok {
            Ok(())
        } else {
            Err(ForgeApiError::sandbox_tripwire(format!(
                "SANDBOX TRIPWIRE: write to {owner}/{repo_name} is outside the sandbox allowlist"
            )))
        }
    }
}

/// Infers `(owner, repo_name)` from either the REST path
/// (`/repos/{owner}/{repo}/...`) or, when the path targets a generator
/// endpoint that names the new repo in its body (e.g. `.../generate`),
/// from `body.owner`/`body.name`.
fn infer_target(req: &ForgeRequest) -> Option<(String, String)> {
    if let Some(body) = &req.body {
        if let (Some(owner), Some(name)) = (body.get("owner").and_then(|v| v.as_str()), body.get("name").and_then(|v| v.as_str()))
        {
            return Some((owner.to_string(), name.to_string()));
        }
    }

    let segments: Vec<&str> = req.path.trim_start_matches('/').split('/').collect();
    if segments.len() >= 3 && segments[0] == "repos" {
        return Some((segments[1].to_string(), segments[2].to_string()));
    }
    None
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
