//! Bundle gating.
//!
//! The server publishes the list of installed bundles on a well-known topic
//! (`nodecg/bundles` by default). A topic is only declared while its owning
//! bundle is installed; an optional semver requirement per bundle turns a
//! version mismatch into a warning status.

use crate::topic::TopicKey;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Namespace of the default installed-packages topic.
pub const DEFAULT_PACKAGES_NAMESPACE: &str = "nodecg";

/// Name of the default installed-packages topic.
pub const DEFAULT_PACKAGES_NAME: &str = "bundles";

/// One entry of the installed-packages topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledBundle {
    /// Bundle name (the namespace its replicants live in)
    pub name: String,
    /// Installed version
    pub version: String,
}

/// Gating verdict for a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GateStatus {
    /// Installed and compatible (or no requirement configured)
    Available,
    /// Not installed
    Missing,
    /// Installed, but the version does not satisfy the requirement
    Incompatible {
        /// Installed version
        installed: String,
        /// Configured requirement
        required: String,
    },
}

impl GateStatus {
    /// Whether topics in the namespace may be declared.
    #[must_use]
    pub fn allows_declaration(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// Gating configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleGate {
    /// Topic that lists installed bundles
    pub packages_topic: TopicKey,
    requirements: BTreeMap<String, VersionReq>,
}

impl Default for BundleGate {
    fn default() -> Self {
        Self::new(TopicKey::new(
            DEFAULT_PACKAGES_NAMESPACE,
            DEFAULT_PACKAGES_NAME,
        ))
    }
}

impl BundleGate {
    /// Gate on the given installed-packages topic, with no version requirements.
    #[must_use]
    pub fn new(packages_topic: TopicKey) -> Self {
        Self {
            packages_topic,
            requirements: BTreeMap::new(),
        }
    }

    /// Require `namespace`'s bundle to satisfy `requirement`.
    #[must_use]
    pub fn with_requirement(mut self, namespace: impl Into<String>, requirement: VersionReq) -> Self {
        self.requirements.insert(namespace.into(), requirement);
        self
    }

    /// Parse and add a requirement such as `">=4.8.0"`.
    ///
    /// # Errors
    ///
    /// Returns error if the requirement is not a valid semver range.
    pub fn require(
        self,
        namespace: impl Into<String>,
        requirement: &str,
    ) -> Result<Self, semver::Error> {
        let requirement = VersionReq::parse(requirement)?;
        Ok(self.with_requirement(namespace, requirement))
    }

    /// Configured requirement of a namespace.
    #[must_use]
    pub fn requirement(&self, namespace: &str) -> Option<&VersionReq> {
        self.requirements.get(namespace)
    }

    /// Whether `key` is subject to gating.
    ///
    /// Topics sharing the packages topic's namespace are never gated.
    #[must_use]
    pub fn is_gated(&self, key: &TopicKey) -> bool {
        key.namespace != self.packages_topic.namespace
    }

    /// Read the installed bundles out of the packages topic's value.
    ///
    /// Entries without a string `name` and `version` are skipped.
    #[must_use]
    pub fn installed_bundles(value: &Value) -> Vec<InstalledBundle> {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(InstalledBundle {
                    name: item.get("name")?.as_str()?.to_string(),
                    version: item.get("version")?.as_str()?.to_string(),
                })
            })
            .collect()
    }

    /// Decide the gating status of `namespace` against the installed bundles.
    #[must_use]
    pub fn evaluate(&self, namespace: &str, installed: &[InstalledBundle]) -> GateStatus {
        let Some(bundle) = installed.iter().find(|bundle| bundle.name == namespace) else {
            return GateStatus::Missing;
        };

        let Some(requirement) = self.requirements.get(namespace) else {
            return GateStatus::Available;
        };

        let satisfied = Version::parse(bundle.version.trim().trim_start_matches('v'))
            .is_ok_and(|version| requirement.matches(&version));

        if satisfied {
            GateStatus::Available
        } else {
            GateStatus::Incompatible {
                installed: bundle.version.clone(),
                required: requirement.to_string(),
            }
        }
    }
}
