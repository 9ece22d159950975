// SPDX-License-Identifier: MIT OR Apache-2.0
//! orc-patch
//!
//! Recovers unified diffs from model prose and applies them to a working
//! tree, all-or-nothing, under size and binary limits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod extract;

pub use apply::{Applied, ApplyOptions, apply_unified_diff};
pub use extract::{extract_diff, patch_stats};

/// Why a hunk could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Context lines did not match the target file.
    ContextMismatch,
    /// The patch modifies or deletes a file that does not exist.
    MissingFile,
    /// The patch creates a file that already exists.
    TargetExists,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ContextMismatch => "context mismatch",
            Self::MissingFile => "missing file",
            Self::TargetExists => "target exists",
        };
        f.write_str(s)
    }
}

/// Tagged patch-operation errors.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// A configured size ceiling was hit before any mutation.
    #[error("patch exceeds limit: {detail}")]
    Limit {
        /// Which ceiling, and by how much.
        detail: String,
    },

    /// A hunk did not fit the target file.
    #[error("conflict in {file} at line {line}: {kind}")]
    Conflict {
        /// Repo-relative path of the conflicting file.
        file: String,
        /// 1-based line the hunk expected to match.
        line: usize,
        /// What went wrong.
        kind: ConflictKind,
    },

    /// The patch touches binary content and binary patches are disallowed.
    #[error("binary patch for {file} is not allowed")]
    Binary {
        /// Repo-relative path of the binary file.
        file: String,
    },

    /// The diff text could not be parsed.
    #[error("malformed patch: {detail}")]
    Malformed {
        /// Parse failure description.
        detail: String,
    },

    /// Reading or writing the working tree failed.
    #[error("patch io error on {path}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    /// Short machine-readable tag: `limit | conflict | binary | malformed | io`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Limit { .. } => "limit",
            Self::Conflict { .. } => "conflict",
            Self::Binary { .. } => "binary",
            Self::Malformed { .. } => "malformed",
            Self::Io { .. } => "io",
        }
    }
}
