//! Error handling for SVO construction
//!
//! Capacity exhaustion is not an error: a rebuild that runs out of node, brick or fragment
//! slots completes with truncated coverage and reports the drops through `BuildStats`.

/// Main error type for the construction pipeline
#[derive(Debug, thiserror::Error)]
pub enum SvoError {
    // Configuration Errors
    #[error("Invalid config: {field} = {value} ({reason})")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    // Scene Errors
    #[error("Shadow map has {found} texels, expected {expected}")]
    ShadowMapSize { expected: usize, found: usize },

    #[error("Light injection requires a light and a shadow map")]
    MissingLight,

    // Schedule Errors
    #[error("Pass '{pass}' cannot run: {reason}")]
    PassUnsupported { pass: String, reason: String },

    #[error("Indirect slot {slot} out of range")]
    IndirectSlotOutOfRange { slot: usize },

    // GPU Errors
    #[error("GPU adapter not found")]
    AdapterNotFound,

    #[error("GPU device request failed: {0}")]
    DeviceRequest(String),

    #[error("GPU buffer too large: {label} needs {size} bytes, limit {limit}")]
    BufferTooLarge { label: String, size: u64, limit: u64 },

    #[error("GPU readback of {buffer} failed: {error}")]
    Readback { buffer: String, error: String },

    #[error("Shader compilation failed for {shader}: {error}")]
    ShaderCompilation { shader: String, error: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the construction pipeline
pub type SvoResult<T> = Result<T, SvoError>;

impl SvoError {
    /// Shorthand for configuration validation failures
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        SvoError::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for SvoError {
    fn from(error: toml::de::Error) -> Self {
        SvoError::ConfigParse(error.to_string())
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_svo<F>(self, f: F) -> SvoResult<T>
    where
        F: FnOnce() -> SvoError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_svo<F>(self, f: F) -> SvoResult<T>
    where
        F: FnOnce() -> SvoError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to foreign errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> SvoResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, msg: &str) -> SvoResult<T> {
        self.map_err(|e| SvoError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }
}
