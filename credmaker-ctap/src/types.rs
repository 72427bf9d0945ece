//! Credential creation parameter types
//!
//! WebAuthn/CTAP2 structures shared by requests and capability reports.

use serde::{Deserialize, Serialize};

/// COSE algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CoseAlgorithm {
    /// ECDSA with SHA-256 on P-256
    ES256 = -7,
    /// EdDSA (Ed25519)
    EdDSA = -8,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256 = -257,
}

impl CoseAlgorithm {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Relying party entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    /// RP ID (a registrable domain)
    pub id: String,
    /// Human-readable RP name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// User entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User handle (max 64 bytes)
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// One acceptable credential type/algorithm pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    /// COSE algorithm identifier
    pub alg: i32,
}

impl From<CoseAlgorithm> for PublicKeyCredentialParameters {
    fn from(alg: CoseAlgorithm) -> Self {
        Self { alg: alg.as_i32() }
    }
}

/// Identifies an existing credential (exclude lists)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    pub id: Vec<u8>,
    #[serde(default)]
    pub transports: Vec<AuthenticatorTransport>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            transports: Vec::new(),
        }
    }
}

/// Transport an authenticator is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    Hybrid,
    Internal,
}

impl AuthenticatorTransport {
    /// Parse the transport names used in getInfo and WebAuthn
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "usb" => Some(Self::Usb),
            "nfc" => Some(Self::Nfc),
            "ble" => Some(Self::Ble),
            "hybrid" | "cable" => Some(Self::Hybrid),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Nfc => "nfc",
            Self::Ble => "ble",
            Self::Hybrid => "hybrid",
            Self::Internal => "internal",
        }
    }
}

/// Where the authenticator lives relative to the client
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    #[default]
    Any,
    Platform,
    CrossPlatform,
}

/// Credential protection level (credProtect extension)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum CredProtect {
    /// userVerificationOptional
    UvOptional = 1,
    /// userVerificationOptionalWithCredentialIDList
    UvOptionalWithCredentialIdList = 2,
    /// userVerificationRequired
    UvRequired = 3,
}

impl CredProtect {
    /// Highest level defined by CTAP2
    pub const MAX: CredProtect = CredProtect::UvRequired;

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UvOptional),
            2 => Some(Self::UvOptionalWithCredentialIdList),
            3 => Some(Self::UvRequired),
            _ => None,
        }
    }
}

/// Attestation conveyance preference, including the enterprise variants
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationConveyancePreference {
    #[default]
    None,
    Indirect,
    Direct,
    EnterpriseIfRpListedOnAuthenticator,
    EnterpriseApprovedByBrowser,
}

impl AttestationConveyancePreference {
    pub fn is_enterprise(self) -> bool {
        matches!(
            self,
            Self::EnterpriseIfRpListedOnAuthenticator | Self::EnterpriseApprovedByBrowser
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cred_protect_ordering() {
        assert!(CredProtect::UvOptional < CredProtect::UvRequired);
        assert_eq!(CredProtect::from_u8(2), Some(CredProtect::UvOptionalWithCredentialIdList));
        assert_eq!(CredProtect::from_u8(4), None);
        assert_eq!(CredProtect::MAX.as_u8(), 3);
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(AuthenticatorTransport::from_name("cable"), Some(AuthenticatorTransport::Hybrid));
        assert_eq!(AuthenticatorTransport::from_name("usb").map(|t| t.as_str()), Some("usb"));
        assert_eq!(AuthenticatorTransport::from_name("smoke-signal"), None);
    }
}
