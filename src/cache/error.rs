//! Cache operation error types
//!
//! A single taxonomy for everything the cache surface can report. Errors that
//! indicate caller misuse (bad key, unserializable value) are surfaced loudly;
//! errors that would make the cache unreliable for future calls are recovered
//! locally by the tier that hit them and never reach the serving path.

/// Cache operation error types with explicit recovery semantics
#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Malformed cache key rejected at call time
    InvalidKey(String),
    /// Value could not be serialized for sizing or transport
    Serialization(String),
    /// Stored payload could not be decoded back into the requested type
    Deserialization(String),
    /// Distributed tier unreachable; surfaced only from backend-management APIs
    RemoteUnavailable(String),
    /// Caller-supplied fetch function failed during cache-aside population
    Fetch(String),
    /// Invalid configuration rejected at construction time
    Configuration(String),
    /// Versioned invalidation could not auto-resolve; record persisted for review
    ConflictUnresolved,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidKey(msg) => write!(f, "Invalid cache key: {}", msg),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::Deserialization(msg) => write!(f, "Deserialization error: {}", msg),
            CacheError::RemoteUnavailable(msg) => {
                write!(f, "Distributed store unavailable: {}", msg)
            }
            CacheError::Fetch(msg) => write!(f, "Fetch callback failed: {}", msg),
            CacheError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            CacheError::ConflictUnresolved => write!(f, "Cache conflict deferred for review"),
        }
    }
}

impl std::error::Error for CacheError {}

impl CacheError {
    /// Create key validation error
    #[inline(always)]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create serialization error
    #[inline(always)]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create deserialization error
    #[inline(always)]
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Create fetch callback error
    #[inline(always)]
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create configuration error
    #[inline(always)]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error indicates caller misuse rather than cache degradation
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_)
                | Self::Serialization(_)
                | Self::Deserialization(_)
                | Self::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}
