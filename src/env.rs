//! Runtime environment detection.
//!
//! Set `DPI_ENV` to one of:
//! - `development` or `dev` - Development mode (local host origins allowed)
//! - (anything else or unset) - Production mode

/// Deployment environment of the embedded app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Local development.
    Development,
}

impl Environment {
    /// Detect current environment from `DPI_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_name(std::env::var("DPI_ENV").ok().as_deref())
    }

    /// Map an environment name to an [`Environment`].
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
        }
    }
}
