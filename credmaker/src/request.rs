//! Credential creation request types

use crate::error::{Error, Result};
use crate::options::{CredProtectRequest, UserVerificationRequirement};

use credmaker_ctap::{
    AttestationConveyancePreference, AuthenticatorAttachment, CoseAlgorithm,
    PublicKeyCredentialDescriptor, PublicKeyCredentialParameters, RelyingParty, User,
};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A validated client data hash (must be exactly 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDataHash([u8; 32]);

impl ClientDataHash {
    /// Create a new ClientDataHash from a 32-byte array
    ///
    /// # Example
    ///
    /// ```
    /// # use credmaker::ClientDataHash;
    /// let client_data_hash = ClientDataHash::new([0u8; 32]);
    /// ```
    pub fn new(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// Create a ClientDataHash from a slice
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidClientDataHash` if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let hash: [u8; 32] = slice.try_into().map_err(|_| Error::InvalidClientDataHash)?;
        Ok(Self(hash))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ClientDataHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ClientDataHash {
    fn from(hash: [u8; 32]) -> Self {
        Self::new(hash)
    }
}

/// PIN/UV authentication protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PinUvAuthProtocol {
    /// PIN/UV protocol version 1
    V1 = 1,
    /// PIN/UV protocol version 2
    V2 = 2,
}

impl PinUvAuthProtocol {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }
}

/// Bundle of PIN/UV authentication parameter and protocol version
///
/// Keeps the auth parameter and the protocol that produced it paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinUvAuth {
    param: Vec<u8>,
    protocol: PinUvAuthProtocol,
}

impl PinUvAuth {
    pub fn new(param: Vec<u8>, protocol: PinUvAuthProtocol) -> Self {
        Self { param, protocol }
    }

    pub fn param(&self) -> &[u8] {
        &self.param
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }
}

/// Input for the googleAndroidClientData extension
///
/// The authenticator echoes back the client data JSON it built from these
/// values; [`verify`](Self::verify) checks that echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidClientDataExtensionInput {
    /// Always "webauthn.create" for credential creation
    pub client_data_type: String,
    pub origin: String,
    pub challenge: Vec<u8>,
    pub android_package_name: String,
}

impl AndroidClientDataExtensionInput {
    pub fn new(
        origin: impl Into<String>,
        challenge: Vec<u8>,
        android_package_name: impl Into<String>,
    ) -> Self {
        Self {
            client_data_type: "webauthn.create".to_string(),
            origin: origin.into(),
            challenge,
            android_package_name: android_package_name.into(),
        }
    }

    /// Check that `json` is exactly the client data this input describes
    pub fn verify(&self, json: &str) -> Result<()> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::AndroidClientData(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::AndroidClientData("not a JSON object".into()))?;

        let challenge = URL_SAFE_NO_PAD.encode(&self.challenge);
        let expected = [
            ("type", self.client_data_type.as_str()),
            ("challenge", challenge.as_str()),
            ("origin", self.origin.as_str()),
            ("androidPackageName", self.android_package_name.as_str()),
        ];

        if object.len() != expected.len() {
            return Err(Error::AndroidClientData(format!(
                "expected {} members, found {}",
                expected.len(),
                object.len()
            )));
        }
        for (key, want) in expected {
            match object.get(key).and_then(serde_json::Value::as_str) {
                Some(got) if got == want => {}
                Some(_) => return Err(Error::AndroidClientData(format!("{key} mismatch"))),
                None => return Err(Error::AndroidClientData(format!("{key} missing"))),
            }
        }
        Ok(())
    }
}

/// authenticatorMakeCredential request
///
/// The handler keeps one base copy and clones it for every authenticator,
/// filling in the attachment, `resident_key`, `user_verification`,
/// credProtect and PIN/UV fields on the clone only.
///
/// # Example
///
/// ```
/// # use credmaker::{ClientDataHash, CredentialCreationRequest};
/// # use credmaker_ctap::{RelyingParty, User};
/// let user = User { id: vec![1, 2, 3, 4], name: Some("alice".into()), display_name: None };
/// let request = CredentialCreationRequest::new(
///     ClientDataHash::new([0u8; 32]),
///     RelyingParty::new("example.com"),
///     user,
/// )
/// .with_hmac_secret(true);
/// assert!(request.hmac_secret);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCreationRequest {
    pub client_data_hash: ClientDataHash,
    pub rp: RelyingParty,
    pub user: User,
    /// Acceptable algorithms, most preferred first
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub exclude_list: Vec<PublicKeyCredentialDescriptor>,
    pub attestation: AttestationConveyancePreference,
    pub hmac_secret: bool,
    pub large_blob_key: bool,
    pub cred_blob: Option<Vec<u8>>,
    pub min_pin_length: bool,
    pub android_client_data: Option<AndroidClientDataExtensionInput>,

    pub authenticator_attachment: AuthenticatorAttachment,
    pub resident_key: bool,
    pub user_verification: UserVerificationRequirement,
    pub cred_protect: Option<CredProtectRequest>,
    pub pin_uv_auth: Option<PinUvAuth>,
}

impl CredentialCreationRequest {
    /// Create a request accepting ES256 only
    pub fn new(client_data_hash: ClientDataHash, rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            pub_key_cred_params: vec![CoseAlgorithm::ES256.into()],
            exclude_list: Vec::new(),
            attestation: AttestationConveyancePreference::None,
            hmac_secret: false,
            large_blob_key: false,
            cred_blob: None,
            min_pin_length: false,
            android_client_data: None,
            authenticator_attachment: AuthenticatorAttachment::Any,
            resident_key: false,
            user_verification: UserVerificationRequirement::Discouraged,
            cred_protect: None,
            pin_uv_auth: None,
        }
    }

    pub fn with_algorithms(mut self, algorithms: Vec<PublicKeyCredentialParameters>) -> Self {
        self.pub_key_cred_params = algorithms;
        self
    }

    pub fn with_exclude_list(mut self, exclude_list: Vec<PublicKeyCredentialDescriptor>) -> Self {
        self.exclude_list = exclude_list;
        self
    }

    pub fn with_attestation(mut self, attestation: AttestationConveyancePreference) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn with_hmac_secret(mut self, enabled: bool) -> Self {
        self.hmac_secret = enabled;
        self
    }

    pub fn with_cred_blob(mut self, blob: Vec<u8>) -> Self {
        self.cred_blob = Some(blob);
        self
    }

    pub fn with_min_pin_length(mut self, enabled: bool) -> Self {
        self.min_pin_length = enabled;
        self
    }

    pub fn with_android_client_data(mut self, input: AndroidClientDataExtensionInput) -> Self {
        self.android_client_data = Some(input);
        self
    }
}
