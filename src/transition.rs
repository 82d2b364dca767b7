//! Outcome of a single state transition check

use serde::Serialize;
use std::fmt;

/// Classification of an observed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionStatus {
    Success,
    Warn,
    Error,
}

impl TransitionStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// Anything other than SUCCESS is a finding
    pub fn is_finding(self) -> bool {
        self != Self::Success
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
