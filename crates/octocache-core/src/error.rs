use thiserror::Error;

/// Error taxonomy for octocache operations.
///
/// Every variant is `Clone`: a coalesced remote fetch shares one result
/// across all joined callers, failures included. Transport failures are
/// carried as rendered messages with operation and key context attached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid key: key must not be empty")]
    InvalidKey,

    #[error("key = {key}: expiration must be greater than zero")]
    InvalidExpiration { key: String },

    #[error("key = {key}: decode target must be a vacant value slot, reset the entry before reuse")]
    InvalidDecodeTarget { key: String },

    #[error("key = {key}: encode failed: {message}")]
    Encode { key: String, message: String },

    #[error("key = {key}: decode failed: {message}")]
    Decode { key: String, message: String },

    #[error("key = {key}: not found")]
    NotFound { key: String },

    #[error("remote tier {op} failed: {message}")]
    Remote { op: &'static str, message: String },

    #[error("local tier {op} failed for key {key}: {message}")]
    Local {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("pipeline execution failed: {message}")]
    Pipeline { message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new InvalidExpiration error
    pub fn invalid_expiration(key: impl Into<String>) -> Self {
        Self::InvalidExpiration { key: key.into() }
    }

    /// Create a new InvalidDecodeTarget error
    pub fn invalid_decode_target(key: impl Into<String>) -> Self {
        Self::InvalidDecodeTarget { key: key.into() }
    }

    /// Create a new Encode error
    pub fn encode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new Decode error
    pub fn decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new NotFound error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a new Remote error
    pub fn remote(op: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            op,
            message: message.into(),
        }
    }

    /// Create a new Local error
    pub fn local(op: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Local {
            op,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new Pipeline error
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error means the key was absent in both tiers.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is caller misuse (never retried).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey
                | Self::InvalidExpiration { .. }
                | Self::InvalidDecodeTarget { .. }
                | Self::Configuration(_)
        )
    }

    /// Check if this error is a tier/transport failure.
    pub fn is_tier_error(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Local { .. } | Self::Pipeline { .. }
        )
    }
}

/// Result type alias for octocache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
