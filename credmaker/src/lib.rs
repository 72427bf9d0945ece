//! FIDO2 MakeCredential request orchestration
//!
//! [`MakeCredentialRequestHandler`] takes one credential-creation request and
//! races it across every authenticator discovery reports. It tailors the
//! request to each authenticator's capabilities, decides when a touch, a PIN
//! or built-in user verification is needed, optionally enrolls a fingerprint,
//! validates the response and reports exactly one [`MakeCredentialStatus`].
//!
//! The wire-level vocabulary lives in [`credmaker_ctap`].

#![warn(unused_extern_crates)]

pub mod authenticator;
pub mod bio;
pub mod error;
pub mod filter;
pub mod handler;
pub mod observer;
pub mod options;
pub mod pin_uv;
pub mod request;
pub mod validate;

// Re-export main types at root level for convenience
pub use authenticator::{
    Authenticator, AuthenticatorId, AuthenticatorKind, BioEnrollSample, Completion, DeviceReply,
};
pub use error::{Error, MakeCredentialStatus, Result};
pub use handler::{
    Clock, CompletionCallback, Event, MakeCredentialRequestHandler, State, SystemClock,
};
pub use observer::{CollectPinOptions, Observer, PinCollectionReason, PinEntryError};
pub use options::{
    CredProtectRequest, HandlerConfig, LargeBlobSupport, MakeCredentialOptions,
    ResidentKeyRequirement, UserVerificationRequirement,
};
pub use pin_uv::{Permissions, PinUvDisposition, PinUvToken};
pub use request::{
    AndroidClientDataExtensionInput, ClientDataHash, CredentialCreationRequest, PinUvAuth,
    PinUvAuthProtocol,
};
