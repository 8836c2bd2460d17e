use thiserror::Error;

/// Errors that may occur when using this crate
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CryptError {
    /// A hash string could not be parsed. This normally occurs when a hash is improperly
    /// formatted (wrong separators, non-numeric or zero-padded cost fields, wrong-length salt
    /// or checksum).
    #[error("CryptError: Malformed hash: {0}")]
    MalformedHash(String),

    /// A setting was outside of the bounds a handler declares and could not be corrected
    #[error("CryptError: Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    /// The secret contains content the handler refuses to hash, such as a NUL byte
    #[error("CryptError: Forbidden secret content: {0}")]
    ForbiddenSecretContent(&'static str),

    /// No handler is known by the given name
    #[error("CryptError: Unknown algorithm: {0:?}")]
    UnknownAlgorithm(String),

    /// A lookup needed a default scheme, but the policy configures none
    #[error("CryptError: No schemes configured")]
    NoSchemesConfigured,

    /// Backend negotiation for a handler is exhausted
    #[error("CryptError: No backend available for {handler}: {reason}")]
    NoBackendAvailable {
        /// Name of the handler whose backends were tried
        handler: &'static str,
        /// Why the last selection attempt failed
        reason: String,
    },

    /// The active backend returned output that does not fit the handler's format. This is
    /// always fatal and is never retried.
    #[error("CryptError: Backend contract violation in {backend}: {detail}")]
    BackendContractViolation {
        /// Name of the offending backend
        backend: &'static str,
        /// What was wrong with its output
        detail: String,
    },

    /// A backend exhibits a bug that would let a forged or different secret verify
    #[error("CryptError: Backend {backend} has a security defect: {detail}")]
    BackendSecurityDefect {
        /// Name of the offending backend
        backend: &'static str,
        /// Which bug was detected
        detail: String,
    },

    /// A policy key does not follow the `[category.]name.option` grammar or is not allowed
    #[error("CryptError: Invalid policy key {key:?}: {reason}")]
    InvalidPolicyKey {
        /// The key as it was supplied
        key: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// A policy value could not be interpreted or refers to something that does not exist
    #[error("CryptError: Invalid policy value for {key:?}: {reason}")]
    InvalidPolicyValue {
        /// The key the value belongs to
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A policy source (INI text or file) could not be read
    #[error("CryptError: Failed to load policy source: {0}")]
    ConfigSource(String),

    /// A handler name does not match `[a-z0-9_]+` or uses a reserved word
    #[error("CryptError: Invalid handler name {0:?}")]
    InvalidHandlerName(String),

    /// A different handler is already registered under the name
    #[error("CryptError: Handler already registered for name {0:?}")]
    DuplicateHandler(String),

    /// None of the configured handlers recognized the hash
    #[error("CryptError: Hash could not be identified")]
    UnidentifiedHash,
}

/// Shorthand used throughout the crate
pub type Result<T> = std::result::Result<T, CryptError>;

impl CryptError {
    pub(crate) fn malformed(handler: &str, msg: &str) -> Self {
        CryptError::MalformedHash(format!("{}: {}", handler, msg))
    }

    pub(crate) fn unsupported(handler: &str, msg: impl AsRef<str>) -> Self {
        CryptError::UnsupportedParameter(format!("{}: {}", handler, msg.as_ref()))
    }
}
