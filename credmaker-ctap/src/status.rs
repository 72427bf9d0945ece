//! CTAP2 status codes
//!
//! Every authenticator response starts with a one-byte status. The values are
//! listed in the "Status codes" section of the CTAP specification.

use thiserror::Error;

/// CTAP2 device response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u8)]
pub enum StatusCode {
    #[error("success")]
    Success = 0x00,
    #[error("invalid command")]
    InvalidCommand = 0x01,
    #[error("invalid parameter")]
    InvalidParameter = 0x02,
    #[error("invalid length")]
    InvalidLength = 0x03,
    #[error("invalid message sequencing")]
    InvalidSeq = 0x04,
    #[error("message timed out")]
    Timeout = 0x05,
    #[error("channel busy")]
    ChannelBusy = 0x06,
    #[error("command requires channel lock")]
    LockRequired = 0x0A,
    #[error("invalid channel")]
    InvalidChannel = 0x0B,
    #[error("unexpected CBOR type")]
    CborUnexpectedType = 0x11,
    #[error("invalid CBOR")]
    InvalidCbor = 0x12,
    #[error("missing parameter")]
    MissingParameter = 0x14,
    #[error("limit exceeded")]
    LimitExceeded = 0x15,
    #[error("fingerprint database full")]
    FpDatabaseFull = 0x17,
    #[error("large blob storage full")]
    LargeBlobStorageFull = 0x18,
    #[error("credential excluded")]
    CredentialExcluded = 0x19,
    #[error("processing")]
    Processing = 0x21,
    #[error("invalid credential")]
    InvalidCredential = 0x22,
    #[error("user action pending")]
    UserActionPending = 0x23,
    #[error("operation pending")]
    OperationPending = 0x24,
    #[error("no operations")]
    NoOperations = 0x25,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm = 0x26,
    #[error("operation denied")]
    OperationDenied = 0x27,
    #[error("key store full")]
    KeyStoreFull = 0x28,
    #[error("unsupported option")]
    UnsupportedOption = 0x2B,
    #[error("invalid option")]
    InvalidOption = 0x2C,
    #[error("keepalive cancel")]
    KeepAliveCancel = 0x2D,
    #[error("no credentials")]
    NoCredentials = 0x2E,
    #[error("user action timeout")]
    UserActionTimeout = 0x2F,
    #[error("not allowed")]
    NotAllowed = 0x30,
    #[error("PIN invalid")]
    PinInvalid = 0x31,
    #[error("PIN blocked")]
    PinBlocked = 0x32,
    #[error("PIN auth invalid")]
    PinAuthInvalid = 0x33,
    #[error("PIN auth blocked")]
    PinAuthBlocked = 0x34,
    #[error("PIN not set")]
    PinNotSet = 0x35,
    #[error("PIN/UV auth token required")]
    PinRequired = 0x36,
    #[error("PIN policy violation")]
    PinPolicyViolation = 0x37,
    #[error("request too large")]
    RequestTooLarge = 0x39,
    #[error("action timeout")]
    ActionTimeout = 0x3A,
    #[error("user presence required")]
    UpRequired = 0x3B,
    #[error("user verification blocked")]
    UvBlocked = 0x3C,
    #[error("integrity failure")]
    IntegrityFailure = 0x3D,
    #[error("invalid subcommand")]
    InvalidSubcommand = 0x3E,
    #[error("user verification invalid")]
    UvInvalid = 0x3F,
    #[error("unauthorized permission")]
    UnauthorizedPermission = 0x40,
    #[error("unspecified error")]
    Other = 0x7F,
}

impl StatusCode {
    /// Get the status as its wire byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire byte to a status code
    ///
    /// Bytes that are not defined by CTAP2 collapse to `Other`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x04 => Self::InvalidSeq,
            0x05 => Self::Timeout,
            0x06 => Self::ChannelBusy,
            0x0A => Self::LockRequired,
            0x0B => Self::InvalidChannel,
            0x11 => Self::CborUnexpectedType,
            0x12 => Self::InvalidCbor,
            0x14 => Self::MissingParameter,
            0x15 => Self::LimitExceeded,
            0x17 => Self::FpDatabaseFull,
            0x18 => Self::LargeBlobStorageFull,
            0x19 => Self::CredentialExcluded,
            0x21 => Self::Processing,
            0x22 => Self::InvalidCredential,
            0x23 => Self::UserActionPending,
            0x24 => Self::OperationPending,
            0x25 => Self::NoOperations,
            0x26 => Self::UnsupportedAlgorithm,
            0x27 => Self::OperationDenied,
            0x28 => Self::KeyStoreFull,
            0x2B => Self::UnsupportedOption,
            0x2C => Self::InvalidOption,
            0x2D => Self::KeepAliveCancel,
            0x2E => Self::NoCredentials,
            0x2F => Self::UserActionTimeout,
            0x30 => Self::NotAllowed,
            0x31 => Self::PinInvalid,
            0x32 => Self::PinBlocked,
            0x33 => Self::PinAuthInvalid,
            0x34 => Self::PinAuthBlocked,
            0x35 => Self::PinNotSet,
            0x36 => Self::PinRequired,
            0x37 => Self::PinPolicyViolation,
            0x39 => Self::RequestTooLarge,
            0x3A => Self::ActionTimeout,
            0x3B => Self::UpRequired,
            0x3C => Self::UvBlocked,
            0x3D => Self::IntegrityFailure,
            0x3E => Self::InvalidSubcommand,
            0x3F => Self::UvInvalid,
            0x40 => Self::UnauthorizedPermission,
            _ => Self::Other,
        }
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

/// Result type for protocol-level operations
pub type Result<T> = std::result::Result<T, StatusCode>;
