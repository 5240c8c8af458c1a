//! Error types for the allowlist pipeline

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the allowlist components.
///
/// Every variant carries only a short, owned description so the error can be
/// cloned and handed to all requesters of a coalesced regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Address text is malformed or fails its checksum
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Balance map cannot be turned into a tree
    #[error("Invalid entitlement: {0}")]
    InvalidEntitlement(String),

    /// Amount does not fit the on-chain integer width
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// A required request parameter is absent
    #[error("Invalid parameters: missing {0}")]
    InvalidParameters(&'static str),

    /// Signer could not be recovered from the signature
    #[error("Signature recovery failed: {0}")]
    SignatureRecoveryFailed(String),

    /// Recovered signer is not in the admin set
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Signed timestamp falls outside the accepted window
    #[error("Stale timestamp: {0}")]
    StaleTimestamp(String),

    /// An upload carried no file content
    #[error("No file uploaded")]
    MissingFile,

    /// Requested snapshot or entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reading or writing persisted state failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl Error {
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    pub fn storage<E: std::fmt::Display>(context: &str, err: E) -> Self {
        Self::StorageUnavailable(format!("{context}: {err}"))
    }

    /// HTTP status used when this error crosses the request boundary.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::MissingFile => 203,
            Self::InvalidParameters(_)
            | Self::SignatureRecoveryFailed(_)
            | Self::NotAuthorized(_)
            | Self::StaleTimestamp(_) => 500,
            Self::InvalidAddress(_)
            | Self::InvalidEntitlement(_)
            | Self::AmountOverflow(_)
            | Self::StorageUnavailable(_) => 400,
        }
    }

    /// Short message for the request boundary. Internal detail stays in logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Not Found",
            Self::MissingFile => "No files were uploaded.",
            Self::InvalidParameters(_) => "Invalid Parameters",
            Self::SignatureRecoveryFailed(_) | Self::NotAuthorized(_) | Self::StaleTimestamp(_) => {
                "Invalid Administrator"
            }
            _ => "Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::not_found("root").status(), 203);
        assert_eq!(Error::MissingFile.status(), 203);
        assert_eq!(Error::InvalidParameters("signData").status(), 500);
        assert_eq!(Error::NotAuthorized("0x1".into()).status(), 500);
        assert_eq!(Error::storage("read", "disk gone").status(), 400);
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = Error::SignatureRecoveryFailed("bad v byte 99".into());
        assert_eq!(err.public_message(), "Invalid Administrator");
        assert!(!err.public_message().contains("99"));
    }
}
