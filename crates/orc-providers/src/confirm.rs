// SPDX-License-Identifier: MIT OR Apache-2.0
//! Confirmation providers.
//!
//! When a patch trips a size limit the execution service asks for
//! confirmation before retrying without limits. Unattended runs use
//! [`DenyAll`] (the default); [`AllowAll`] exists for eval suites that
//! exercise the unlimited-retry path.

use async_trait::async_trait;

/// Answers yes/no questions the engine cannot decide itself.
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Return `true` to proceed with the described action.
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Denies every request. The safe default for unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl Confirmation for DenyAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Approves every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Confirmation for AllowAll {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}
