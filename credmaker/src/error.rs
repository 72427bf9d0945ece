use credmaker_ctap::StatusCode;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome delivered to the caller's completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MakeCredentialStatus {
    /// A credential was created and its response validated
    Success,
    /// The authenticator's response could not be accepted
    AuthenticatorResponseInvalid,
    /// The user touched an authenticator that already holds an excluded credential
    UserConsentButCredentialExcluded,
    /// The user declined on the authenticator
    UserConsentDenied,
    /// The selected authenticator went away while PIN/UV was in progress
    AuthenticatorRemovedDuringPinEntry,
    /// Too many wrong PINs since power-up
    SoftPinBlock,
    /// PIN permanently blocked
    HardPinBlock,
    AuthenticatorMissingResidentKeys,
    AuthenticatorMissingUserVerification,
    AuthenticatorMissingLargeBlob,
    NoCommonAlgorithms,
    /// No room left for a discoverable credential
    StorageFull,
    /// Built-in user verification is locked and there is no PIN to fall back on
    InternalUvLocked,
    /// The OS-provided authenticator refused the request
    PlatformNotAllowed,
    /// The OS-provided authenticator reported an excluded credential
    PlatformInvalidState,
}

impl MakeCredentialStatus {
    /// Map a device response code to a caller-facing status
    ///
    /// Codes with no meaning at this level return `None`.
    pub fn from_device_response(code: StatusCode) -> Option<Self> {
        match code {
            StatusCode::Success => Some(Self::Success),
            StatusCode::CredentialExcluded => Some(Self::UserConsentButCredentialExcluded),
            // PinAuthInvalid from a device that was asked for internal UV means
            // the user was not verified.
            StatusCode::OperationDenied | StatusCode::PinAuthInvalid => {
                Some(Self::UserConsentDenied)
            }
            StatusCode::KeyStoreFull => Some(Self::StorageFull),
            _ => None,
        }
    }

    /// Map a failure reported by an OS-provided authenticator
    pub fn from_platform_error(code: StatusCode) -> Self {
        match code {
            StatusCode::CredentialExcluded => Self::PlatformInvalidState,
            _ => Self::PlatformNotAllowed,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for MakeCredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::AuthenticatorResponseInvalid => write!(f, "Authenticator response invalid"),
            Self::UserConsentButCredentialExcluded => {
                write!(f, "Credential excluded after user consent")
            }
            Self::UserConsentDenied => write!(f, "User consent denied"),
            Self::AuthenticatorRemovedDuringPinEntry => {
                write!(f, "Authenticator removed during PIN entry")
            }
            Self::SoftPinBlock => write!(f, "PIN temporarily blocked"),
            Self::HardPinBlock => write!(f, "PIN blocked"),
            Self::AuthenticatorMissingResidentKeys => {
                write!(f, "Authenticator lacks discoverable credential support")
            }
            Self::AuthenticatorMissingUserVerification => {
                write!(f, "Authenticator cannot verify the user")
            }
            Self::AuthenticatorMissingLargeBlob => write!(f, "Authenticator lacks large blob support"),
            Self::NoCommonAlgorithms => write!(f, "No common public key algorithm"),
            Self::StorageFull => write!(f, "Authenticator storage full"),
            Self::InternalUvLocked => write!(f, "Built-in user verification locked"),
            Self::PlatformNotAllowed => write!(f, "Platform authenticator refused the request"),
            Self::PlatformInvalidState => write!(f, "Platform authenticator holds an excluded credential"),
        }
    }
}

/// Errors raised while building requests or checking responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("client data hash must be 32 bytes")]
    InvalidClientDataHash,

    #[error("PIN/UV token has an invalid length for its protocol")]
    InvalidPinUvToken,

    #[error("RP ID hash does not match the relying party")]
    RpIdHashMismatch,

    #[error("unexpected extension output: {0}")]
    UnexpectedExtension(String),

    #[error("malformed {0} extension output")]
    InvalidExtensionOutput(&'static str),

    #[error("credProtect level {0} outside the accepted range")]
    CredProtectOutOfRange(i128),

    #[error("enterprise attestation returned but not requested")]
    UnrequestedEnterpriseAttestation,

    #[error("large blob key missing from response")]
    MissingLargeBlobKey,

    #[error("Android client data mismatch: {0}")]
    AndroidClientData(String),

    #[error("CTAP error: {0}")]
    Ctap(#[from] StatusCode),
}

/// Result type alias for credmaker operations
pub type Result<T> = std::result::Result<T, Error>;
