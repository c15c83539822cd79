//! Typed JSON merge patches.
//!
//! Patches are plain serde structs so the field paths are checked at compile
//! time instead of being assembled with `format!`.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;

use crate::error::Result;

/// Pod template annotation whose value changes on every rotation pass.
pub const ROTATION_ANNOTATION: &str = "ca-rotation";

/// Merge patch that sets `spec.template.metadata.annotations.ca-rotation`.
///
/// Changing a pod template annotation changes the template hash, which makes
/// the owning controller roll out fresh pods.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RolloutPatch {
    spec: TemplateSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct TemplateSpec {
    template: Template,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Template {
    metadata: TemplateMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct TemplateMetadata {
    annotations: BTreeMap<String, String>,
}

impl RolloutPatch {
    /// Create a patch with a specific nonce.
    pub fn new(nonce: i32) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(ROTATION_ANNOTATION.to_string(), nonce.to_string());
        Self {
            spec: TemplateSpec {
                template: Template {
                    metadata: TemplateMetadata { annotations },
                },
            },
        }
    }

    /// Create a patch with a random non-negative nonce.
    pub fn random() -> Self {
        Self::new(rand::thread_rng().gen_range(0..i32::MAX))
    }

    /// The annotation value carried by this patch.
    pub fn nonce(&self) -> Option<&str> {
        self.spec
            .template
            .metadata
            .annotations
            .get(ROTATION_ANNOTATION)
            .map(String::as_str)
    }

    /// Serialize to the merge patch body.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Merge patch that sets `spec.replicas`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplicasPatch {
    spec: ReplicasSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct ReplicasSpec {
    replicas: i32,
}

impl ReplicasPatch {
    pub fn new(replicas: i32) -> Self {
        Self {
            spec: ReplicasSpec { replicas },
        }
    }

    /// Serialize to the merge patch body.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
