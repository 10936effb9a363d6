//! Error taxonomy for the dispatch core.
//!
//! Not-found and state-conflict conditions are deliberately NOT errors:
//! store operations surface them as `Ok(false)` / `Ok(None)` so bulk
//! operations and sweeps compose without exception overhead. Only inputs
//! rejected before any write (validation), backing-store failures, and
//! payload decode problems rise to `DispatchError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl DispatchError {
    /// Validation helper for required string fields.
    pub fn required(field: &str) -> Self {
        DispatchError::Validation(format!("{field} is required"))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_message() {
        let err = DispatchError::required("recipient_id");
        assert_eq!(err.to_string(), "Validation error: recipient_id is required");
    }
}
