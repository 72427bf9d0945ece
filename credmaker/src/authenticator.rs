//! Authenticator capability interface
//!
//! Discovery owns the concrete authenticators and hands them to the handler as
//! `Arc<dyn Authenticator>`. Every operation is non-blocking: the
//! implementation starts the device exchange and later reports the outcome
//! through the [`Completion`] it was given, from any thread.

use crate::handler::Event;
use crate::pin_uv::{Permissions, PinUvToken};
use crate::request::CredentialCreationRequest;

use credmaker_ctap::{
    extensions, AuthenticatorInfo, AuthenticatorTransport, MakeCredentialResponse, StatusCode,
};

use std::fmt;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

/// Stable identity of a discovered authenticator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthenticatorId(String);

impl AuthenticatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthenticatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthenticatorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What sits behind an authenticator handle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticatorKind {
    /// A CTAP2 device the handler talks to directly
    #[default]
    Device,
    /// An OS credential API that runs its own UI and PIN handling
    OsProxy,
}

/// One step of biometric enrollment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BioEnrollSample {
    /// Template being enrolled
    pub template_id: Vec<u8>,
    /// Samples still needed to finish the template
    pub remaining_samples: u8,
}

/// One-shot reply handle for an asynchronous operation
///
/// Calling [`complete`](Self::complete) turns the value into a handler event
/// and queues it. A handler that is already gone simply never sees it.
pub struct Completion<T> {
    tx: Sender<Event>,
    make: Box<dyn FnOnce(T) -> Event + Send>,
}

impl<T> Completion<T> {
    pub(crate) fn new(tx: Sender<Event>, make: impl FnOnce(T) -> Event + Send + 'static) -> Self {
        Self {
            tx,
            make: Box::new(make),
        }
    }

    pub fn complete(self, value: T) {
        let event = (self.make)(value);
        if self.tx.send(event).is_err() {
            tracing::trace!("completion dropped, handler gone");
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Reply type for operations answered with a CTAP status on failure
pub type DeviceReply<T> = Completion<std::result::Result<T, StatusCode>>;

/// A candidate authenticator
///
/// The `supports_*` defaults read the capability report; with no report the
/// authenticator is assumed capable.
pub trait Authenticator: Send + Sync {
    fn id(&self) -> &AuthenticatorId;

    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::Device
    }

    /// Decoded getInfo response, if one is available
    fn info(&self) -> Option<&AuthenticatorInfo>;

    fn transport(&self) -> Option<AuthenticatorTransport>;

    fn supports_cred_protect_extension(&self) -> bool {
        self.info()
            .map_or(true, |info| info.supports_extension(extensions::CRED_PROTECT))
    }

    fn supports_hmac_secret_extension(&self) -> bool {
        self.info()
            .map_or(true, |info| info.supports_extension(extensions::HMAC_SECRET))
    }

    fn supports_enterprise_attestation(&self) -> bool {
        self.info()
            .map_or(true, |info| info.options.enterprise_attestation.is_some())
    }

    fn supports_large_blob(&self) -> bool {
        self.info().map_or(true, |info| info.options.supports_large_blobs)
    }

    /// Blink and wait for a touch
    fn get_touch(&self, done: Completion<()>);

    fn make_credential(
        &self,
        request: CredentialCreationRequest,
        done: DeviceReply<MakeCredentialResponse>,
    );

    fn get_pin_retries(&self, done: DeviceReply<u8>);

    fn get_uv_retries(&self, done: DeviceReply<u8>);

    fn get_pin_token(
        &self,
        pin: &str,
        permissions: Permissions,
        rp_id: &str,
        done: DeviceReply<PinUvToken>,
    );

    fn get_uv_token(&self, permissions: Permissions, rp_id: &str, done: DeviceReply<PinUvToken>);

    fn set_pin(&self, pin: &str, done: DeviceReply<()>);

    /// Capture one enrollment sample; `template_id` is `None` for the first
    fn bio_enroll(
        &self,
        token: &PinUvToken,
        template_id: Option<Vec<u8>>,
        done: DeviceReply<BioEnrollSample>,
    );

    /// Abort whatever the authenticator is doing
    fn cancel(&self);
}

