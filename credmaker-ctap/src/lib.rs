//! CTAP2 protocol vocabulary used by the credmaker orchestrator
//!
//! This crate holds the pieces of the Client to Authenticator Protocol that the
//! orchestrator reasons about: status codes, credential parameter types, the
//! capability report decoded from `authenticatorGetInfo` and the decoded
//! `authenticatorMakeCredential` response.
//!
//! Implements the relevant parts of the FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html>

pub mod cbor;
pub mod extensions;
pub mod get_info;
pub mod make_credential;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use get_info::{
    AuthenticatorInfo, AuthenticatorSupportedOptions, BioEnrollmentAvailability,
    ClientPinAvailability, UserVerificationAvailability,
};
pub use make_credential::{AttestedCredentialData, AuthenticatorData, MakeCredentialResponse};
pub use status::{Result, StatusCode};
pub use types::{
    AttestationConveyancePreference, AuthenticatorAttachment, AuthenticatorTransport,
    CoseAlgorithm, CredProtect, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RelyingParty, User,
};
