/// Explicit verification result, replacing the source's exception cascade
/// (REDESIGN FLAGS: `{Ok, NotFound, Ambiguous, Mismatch, Structural}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    /// No matching row of the named entity (`"InstanceUsage"`, `"InstanceDelete"`, `"InstanceReconcile"`).
    NotFound(String),
    /// More than one matching row of the named entity.
    Ambiguous(String),
    Mismatch { field: String, expected: String, actual: String },
    /// A structural precondition failed (e.g. an unexplained delete).
    Structural(String),
}

impl VerifyOutcome {
    pub fn mismatch(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        VerifyOutcome::Mismatch { field: field.into(), expected: expected.into(), actual: actual.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, VerifyOutcome::Ok)
    }
}

impl std::fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyOutcome::Ok => write!(f, "ok"),
            VerifyOutcome::NotFound(what) => write!(f, "{what} not found"),
            VerifyOutcome::Ambiguous(what) => write!(f, "ambiguous {what} match"),
            VerifyOutcome::Mismatch { field, expected, actual } => {
                write!(f, "{field} mismatch: expected {expected}, got {actual}")
            }
            VerifyOutcome::Structural(msg) => write!(f, "{msg}"),
        }
    }
}
