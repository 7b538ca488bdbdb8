use thiserror::Error;

#[derive(Error, Debug)]
pub enum LicenseError {
    // Rejected synchronously, never persisted
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    // Write-boundary conflicts (tier slots, packet limits, guild mismatches)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    // License state errors, rejected before any side effects
    #[error("License cannot be redeemed: {message}")]
    State { message: String },

    // Chat platform / notification failures
    #[error("Discord API error: {message}")]
    Collaborator { message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    // Persistence errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of a [`LicenseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Conflict,
    State,
    Collaborator,
    NotFound,
    Internal,
}

impl LicenseError {
    pub fn configuration(message: impl Into<String>) -> Self {
        LicenseError::Configuration {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        LicenseError::Conflict {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        LicenseError::State {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LicenseError::Internal {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        LicenseError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LicenseError::Configuration { .. } => ErrorKind::Configuration,
            LicenseError::Conflict { .. } => ErrorKind::Conflict,
            LicenseError::State { .. } => ErrorKind::State,
            LicenseError::Collaborator { .. } => ErrorKind::Collaborator,
            LicenseError::NotFound { .. } => ErrorKind::NotFound,
            LicenseError::StateSave { .. }
            | LicenseError::StateLoad { .. }
            | LicenseError::StateParse { .. }
            | LicenseError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<serenity::Error> for LicenseError {
    fn from(err: serenity::Error) -> Self {
        LicenseError::Collaborator {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for LicenseError {
    fn from(err: std::io::Error) -> Self {
        LicenseError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LicenseError {
    fn from(err: serde_json::Error) -> Self {
        LicenseError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LicenseError>;

use poise::serenity_prelude as serenity;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LicenseError::configuration("bad format").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(LicenseError::conflict("slot").kind(), ErrorKind::Conflict);
        assert_eq!(LicenseError::state("inactive").kind(), ErrorKind::State);
        assert_eq!(
            LicenseError::not_found("License", "abc").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_error_display() {
        let err = LicenseError::not_found("Role packet", "vip");
        assert_eq!(err.to_string(), "Role packet not found: vip");
    }
}
