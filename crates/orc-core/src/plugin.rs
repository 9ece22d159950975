// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plugin SDK contract (manifest + version negotiation).
//!
//! Contract only: the workspace does not load plugins dynamically, but the
//! negotiated shapes are fixed here so external plugins can build against
//! them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SDK version negotiated at plugin load.
pub const SDK_VERSION: u32 = 1;

/// What a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// A model provider adapter.
    Provider,
    /// A verification/tool integration.
    Tool,
    /// A memory backend.
    Memory,
}

/// Version range a plugin declares itself compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SdkVersionRange {
    /// Lowest SDK version the plugin supports.
    pub min_version: u32,
    /// Highest supported version; `None` means "min and above".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<u32>,
}

/// Plugin self-description presented at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PluginManifest {
    /// Unique plugin name.
    pub name: String,
    /// What the plugin provides.
    pub kind: PluginKind,
    /// Declared compatibility range.
    pub sdk_version: SdkVersionRange,
}

/// Incompatibility found during negotiation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PluginError {
    /// The host SDK is older than the plugin requires.
    #[error("plugin '{name}' requires SDK >= {required}, host is {host}")]
    HostTooOld {
        /// Plugin name.
        name: String,
        /// Plugin's minimum SDK version.
        required: u32,
        /// Host SDK version.
        host: u32,
    },
    /// The host SDK is newer than the plugin supports.
    #[error("plugin '{name}' supports SDK <= {supported}, host is {host}")]
    HostTooNew {
        /// Plugin name.
        name: String,
        /// Plugin's maximum SDK version.
        supported: u32,
        /// Host SDK version.
        host: u32,
    },
}

/// Check a manifest against the host [`SDK_VERSION`]. Fails fast on any
/// incompatibility.
pub fn negotiate(manifest: &PluginManifest) -> Result<(), PluginError> {
    if manifest.sdk_version.min_version > SDK_VERSION {
        return Err(PluginError::HostTooOld {
            name: manifest.name.clone(),
            required: manifest.sdk_version.min_version,
            host: SDK_VERSION,
        });
    }
    if let Some(max) = manifest.sdk_version.max_version {
        if max < SDK_VERSION {
            return Err(PluginError::HostTooNew {
                name: manifest.name.clone(),
                supported: max,
                host: SDK_VERSION,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(min: u32, max: Option<u32>) -> PluginManifest {
        PluginManifest {
            name: "p".into(),
            kind: PluginKind::Provider,
            sdk_version: SdkVersionRange {
                min_version: min,
                max_version: max,
            },
        }
    }

    #[test]
    fn compatible_ranges_negotiate() {
        assert!(negotiate(&manifest(1, None)).is_ok());
        assert!(negotiate(&manifest(1, Some(1))).is_ok());
    }

    #[test]
    fn future_plugin_fails_fast() {
        let err = negotiate(&manifest(2, None)).unwrap_err();
        assert!(matches!(err, PluginError::HostTooOld { required: 2, .. }));
    }

    #[test]
    fn obsolete_plugin_fails_fast() {
        let err = negotiate(&manifest(0, Some(0))).unwrap_err();
        assert!(matches!(err, PluginError::HostTooNew { supported: 0, .. }));
    }
}
