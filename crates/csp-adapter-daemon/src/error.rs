//! Fatal error classification and process exit codes.

use csp_adapter_core::AdapterError;

/// Errors that terminate the adapter process.
///
/// Everything else is absorbed into the cycle's error ledger and surfaced
/// through csp-config; the next tick starts fresh.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// The configuration is unusable. Exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// CSP access could not be verified at boot. Exit code 2.
    #[error("CSP access failure: {0}")]
    CspAccess(String),

    /// An unexpected runtime failure. Exit code 3.
    #[error("fatal runtime error: {0}")]
    Runtime(String),
}

impl FatalError {
    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::CspAccess(_) => 2,
            Self::Runtime(_) => 3,
        }
    }
}

impl From<AdapterError> for FatalError {
    fn from(err: AdapterError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_process_contract() {
        assert_eq!(FatalError::Config("bad".into()).exit_code(), 1);
        assert_eq!(FatalError::CspAccess("denied".into()).exit_code(), 2);
        assert_eq!(FatalError::Runtime("boom".into()).exit_code(), 3);
    }
}
