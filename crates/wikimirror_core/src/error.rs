use std::fmt;

/// Why a single remote lookup failed. Neither variant is retried by the
/// tool; the caller records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    NotFound { title: String },
    Transient { title: String, detail: String },
}

impl FetchError {
    pub fn not_found(title: impl Into<String>) -> Self {
        Self::NotFound {
            title: title.into(),
        }
    }

    pub fn transient(title: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Transient {
            title: title.into(),
            detail: format!("{error:#}"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { title } => write!(f, "page not found: {title}"),
            Self::Transient { title, detail } => {
                write!(f, "transient fetch error for {title}: {detail}")
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// A remote lookup made by the dependency resolver failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupFailed {
    pub source: FetchError,
}

impl fmt::Display for LookupFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote lookup failed: {}", self.source)
    }
}

impl std::error::Error for LookupFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
