//! Guard configuration
//!
//! Classes carry a [`GuardConfig`] that subclasses inherit. It can be built
//! in code or loaded from JSON, e.g. `{"reentrancy": "reject"}`; omitted
//! keys take their defaults.

use crate::error::{Error, Result};

/// How a guarded operation that calls another guarded operation on the same
/// instance is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reentrancy {
    /// The nested call joins the outer transaction: its writes land in the
    /// outer ledger and the invariant is checked once, at the outermost exit.
    #[default]
    Flatten,
    /// The nested call fails with a usage error and has no effect.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub reentrancy: Reentrancy,
}

impl GuardConfig {
    pub fn with_reentrancy(reentrancy: Reentrancy) -> Self {
        GuardConfig { reentrancy }
    }

    /// Parse a configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::usage("GuardConfig", format!("invalid configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_flatten() {
        assert_eq!(GuardConfig::default().reentrancy, Reentrancy::Flatten);
    }

    #[test]
    fn test_from_json() {
        let cfg = GuardConfig::from_json(r#"{"reentrancy": "reject"}"#).unwrap();
        assert_eq!(cfg.reentrancy, Reentrancy::Reject);
    }

    #[test]
    fn test_from_json_missing_keys_use_defaults() {
        let cfg = GuardConfig::from_json("{}").unwrap();
        assert_eq!(cfg, GuardConfig::default());
    }

    #[test]
    fn test_from_json_rejects_unknown_policy() {
        let err = GuardConfig::from_json(r#"{"reentrancy": "sometimes"}"#).unwrap_err();
        assert_eq!(err.kind(), "usage_error");
    }
}
