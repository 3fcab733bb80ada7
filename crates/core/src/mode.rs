//! Klusterlet deploy mode, read from the cluster's annotations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotation selecting how the klusterlet is deployed for a cluster.
pub const DEPLOY_MODE_ANNOTATION: &str = "import.open-cluster-management.io/klusterlet-deploy-mode";
pub const DEPLOY_MODE_HOSTED: &str = "Hosted";
pub const DEPLOY_MODE_DEFAULT: &str = "Default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeployMode {
    #[default]
    Default,
    Hosted,
}

impl DeployMode {
    /// Only a case-insensitive `Hosted` selects hosted mode; anything else,
    /// including a missing map or key, is `Default`.
    pub fn of(annotations: Option<&BTreeMap<String, String>>) -> Self {
        match annotations.and_then(|a| a.get(DEPLOY_MODE_ANNOTATION)) {
            Some(v) if fold_eq(v, DEPLOY_MODE_HOSTED) => DeployMode::Hosted,
            _ => DeployMode::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Default => DEPLOY_MODE_DEFAULT,
            DeployMode::Hosted => DEPLOY_MODE_HOSTED,
        }
    }
}

/// Unicode simple case folding, char by char: `ſ` matches `s`, the Kelvin sign
/// matches `k`. Mappings that expand to several chars never match one char.
fn fold_eq(a: &str, b: &str) -> bool {
    a.chars().count() == b.chars().count()
        && a.chars().zip(b.chars()).all(|(x, y)| {
            x == y || x.to_lowercase().eq(y.to_lowercase()) || x.to_uppercase().eq(y.to_uppercase())
        })
}

pub fn is_default_mode(annotations: Option<&BTreeMap<String, String>>) -> bool {
    DeployMode::of(annotations) == DeployMode::Default
}
