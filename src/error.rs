//! Fatal error taxonomy for the ISO pipeline.
//!
//! Every stage returns one of these. Nothing is retried: the caller logs the
//! message, the scratch directory is released, and the process exits with
//! [`Error::exit_code`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which verification step rejected the source ISO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStep {
    /// The distributor key could not be fetched into the keyring.
    Keyring,
    /// The manifest signature did not validate against the keyring.
    Signature,
    /// The ISO digest is not listed in the manifest.
    Digest,
}

impl VerifyStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStep::Keyring => "keyring",
            VerifyStep::Signature => "signature",
            VerifyStep::Digest => "digest",
        }
    }
}

impl fmt::Display for VerifyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("verification failed ({step}): {reason}")]
    VerificationFailed { step: VerifyStep, reason: String },

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("boot configuration {} was not patched: {reason}", path.display())]
    PatchNotApplied { path: PathBuf, reason: String },

    #[error("repackaging failed: {0}")]
    RepackagingFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn verification(step: VerifyStep, reason: impl Into<String>) -> Self {
        Error::VerificationFailed {
            step,
            reason: reason.into(),
        }
    }

    pub fn download(url: &str, err: &anyhow::Error) -> Self {
        Error::DownloadFailed {
            url: url.to_string(),
            reason: format!("{:#}", err),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
