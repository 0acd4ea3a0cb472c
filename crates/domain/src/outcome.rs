use serde::{Deserialize, Serialize};

/// The answer delivered to a caller: the model's text, or `None` when no
/// usable result exists. Callers must not read a reason into `None`.
pub type Answer = Option<String>;

/// Terminal classification of a dispatched request, as recorded in the audit
/// trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// The endpoint answered and the answer passed validation.
    Success,
    /// Every attempt failed (transport, status, timeout or payload shape).
    Failed,
    /// The endpoint answered but the text did not match the policy schema.
    ValidationFailed,
    /// The engine shut down before the request was dispatched.
    Cancelled,

    /// Forward-compatibility fallback for newer variants.
    #[serde(other)]
    Unknown,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::ValidationFailed => "validation_failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestOutcome {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "validation_failed" => Ok(Self::ValidationFailed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}
