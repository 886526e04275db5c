//! Error type shared by every fallible operation in the crate.
//!
//! Failures fall into three kinds:
//!
//! - `Configuration`: invalid ranges, bin widths, thresholds or parameter vectors
//! - `Data`: missing or malformed run data, unknown run numbers, empty run sets
//! - `Numerical`: non-finite likelihoods, singular matrices, negative degrees of freedom
//!
//! Minimizer non-convergence is *not* an error: it is carried as a status in the
//! fit result so callers can still inspect the best point found.

/// Category of a [`FitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Data,
    Numerical,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Data => "data error",
            ErrorKind::Numerical => "numerical error",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone)]
pub struct FitError {
    kind: ErrorKind,
    message: String,
}

impl FitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Numerical, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::fmt::Debug for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for FitError {}

impl From<argmin::core::Error> for FitError {
    fn from(e: argmin::core::Error) -> Self {
        FitError::numerical(format!("Minimizer failed: {e}"))
    }
}

impl From<serde_json::Error> for FitError {
    fn from(e: serde_json::Error) -> Self {
        FitError::data(format!("Invalid JSON: {e}"))
    }
}

impl From<std::io::Error> for FitError {
    fn from(e: std::io::Error) -> Self {
        FitError::data(format!("I/O failure: {e}"))
    }
}
