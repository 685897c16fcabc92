//! Error types for the adapter core.

/// Result type for adapter core operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur in adapter core operations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A configuration field is missing or invalid.
    #[error("invalid configuration: {key}: {detail}")]
    Config {
        /// The configuration key that failed validation.
        key: String,
        /// What was wrong with it.
        detail: String,
    },

    /// The configuration schema version is outside the supported range.
    #[error("unsupported configuration version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// The version declared by the config file.
        found: String,
        /// The version requirement the adapter supports.
        supported: String,
    },

    /// No volume dimension covers the aggregated usage value.
    #[error("no matching dimension for volume billing: {metric}={value}")]
    NoMatchingVolumeDimension {
        /// The metric being mapped.
        metric: String,
        /// The aggregated usage value.
        value: u64,
    },

    /// The application reported per-dimension usage for a volume metric.
    #[error("metric '{metric}' reported per-dimension usage but is configured for volume billing")]
    VolumeUsageNotScalar {
        /// The metric being mapped.
        metric: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
