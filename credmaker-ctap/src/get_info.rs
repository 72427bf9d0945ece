//! authenticatorGetInfo capability report
//!
//! Decodes the getInfo response into the capability report the orchestrator
//! filters on:
//! - Supported versions and extensions
//! - AAGUID
//! - Options (rk, uv, clientPin, bioEnroll, ...)
//! - PIN/UV protocols
//! - Supported algorithms and transports
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#authenticatorGetInfo>

use crate::cbor::{self, MapBuilder, MapParser};
use crate::status::{Result, StatusCode};
use crate::types::AuthenticatorTransport;

use ciborium::Value;

/// GetInfo response keys
mod keys {
    pub const VERSIONS: i32 = 0x01;
    pub const EXTENSIONS: i32 = 0x02;
    pub const AAGUID: i32 = 0x03;
    pub const OPTIONS: i32 = 0x04;
    pub const MAX_MSG_SIZE: i32 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: i32 = 0x06;
    pub const TRANSPORTS: i32 = 0x09;
    pub const ALGORITHMS: i32 = 0x0A;
    pub const MIN_PIN_LENGTH: i32 = 0x0D;
    pub const FIRMWARE_VERSION: i32 = 0x0E;
    pub const REMAINING_DISCOVERABLE_CREDENTIALS: i32 = 0x14;
}

/// Option map keys
mod option_keys {
    pub const PLAT: &str = "plat";
    pub const RK: &str = "rk";
    pub const UP: &str = "up";
    pub const UV: &str = "uv";
    pub const CLIENT_PIN: &str = "clientPin";
    pub const PIN_UV_AUTH_TOKEN: &str = "pinUvAuthToken";
    pub const BIO_ENROLL: &str = "bioEnroll";
    pub const BIO_ENROLL_PREVIEW: &str = "userVerificationMgmtPreview";
    pub const LARGE_BLOBS: &str = "largeBlobs";
    pub const EP: &str = "ep";
    pub const ALWAYS_UV: &str = "alwaysUv";
    pub const CRED_MGMT: &str = "credMgmt";
}

/// Built-in user verification (biometrics, on-device PIN pad)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UserVerificationAvailability {
    #[default]
    NotSupported,
    SupportedButNotConfigured,
    SupportedAndConfigured,
}

/// Client PIN support
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClientPinAvailability {
    #[default]
    NotSupported,
    SupportedButPinNotSet,
    SupportedAndPinSet,
}

/// Biometric enrollment support
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BioEnrollmentAvailability {
    #[default]
    NotSupported,
    SupportedButUnprovisioned,
    SupportedAndProvisioned,
}

// getInfo encodes all three as tri-states: absent = not supported,
// false = supported but not set up, true = set up.
macro_rules! tri_state {
    ($ty:ty, $none:ident, $off:ident, $on:ident) => {
        impl $ty {
            pub fn from_option(value: Option<bool>) -> Self {
                match value {
                    None => Self::$none,
                    Some(false) => Self::$off,
                    Some(true) => Self::$on,
                }
            }

            pub fn as_option(self) -> Option<bool> {
                match self {
                    Self::$none => None,
                    Self::$off => Some(false),
                    Self::$on => Some(true),
                }
            }
        }
    };
}

tri_state!(
    UserVerificationAvailability,
    NotSupported,
    SupportedButNotConfigured,
    SupportedAndConfigured
);
tri_state!(
    ClientPinAvailability,
    NotSupported,
    SupportedButPinNotSet,
    SupportedAndPinSet
);
tri_state!(
    BioEnrollmentAvailability,
    NotSupported,
    SupportedButUnprovisioned,
    SupportedAndProvisioned
);

/// Options section of the capability report
///
/// # Example
///
/// ```rust
/// use credmaker_ctap::{AuthenticatorSupportedOptions, ClientPinAvailability};
///
/// let opts = AuthenticatorSupportedOptions::new()
///     .with_resident_keys(true)
///     .with_client_pin(Some(true));
/// assert_eq!(opts.client_pin_availability, ClientPinAvailability::SupportedAndPinSet);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorSupportedOptions {
    /// Attached to the client platform (cannot be removed)
    pub is_platform_device: bool,
    /// Discoverable credential support
    pub supports_resident_key: bool,
    pub supports_user_presence: bool,
    pub user_verification_availability: UserVerificationAvailability,
    pub client_pin_availability: ClientPinAvailability,
    /// getPinUvAuthTokenUsing{Pin,Uv}WithPermissions support
    pub supports_pin_uv_auth_token: bool,
    pub bio_enrollment_availability: BioEnrollmentAvailability,
    pub supports_large_blobs: bool,
    /// Enterprise attestation: None = not supported, Some(enabled)
    pub enterprise_attestation: Option<bool>,
    pub always_uv: bool,
    pub supports_credential_management: bool,
}

impl Default for AuthenticatorSupportedOptions {
    fn default() -> Self {
        Self {
            is_platform_device: false,
            supports_resident_key: false,
            supports_user_presence: true,
            user_verification_availability: UserVerificationAvailability::NotSupported,
            client_pin_availability: ClientPinAvailability::NotSupported,
            supports_pin_uv_auth_token: false,
            bio_enrollment_availability: BioEnrollmentAvailability::NotSupported,
            supports_large_blobs: false,
            enterprise_attestation: None,
            always_uv: false,
            supports_credential_management: false,
        }
    }
}

impl AuthenticatorSupportedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform_device(mut self, is_platform: bool) -> Self {
        self.is_platform_device = is_platform;
        self
    }

    pub fn with_resident_keys(mut self, enabled: bool) -> Self {
        self.supports_resident_key = enabled;
        self
    }

    /// Set built-in user verification
    /// - `None`: Not capable of user verification
    /// - `Some(false)`: Capable but not yet configured
    /// - `Some(true)`: Capable and configured
    pub fn with_user_verification(mut self, state: Option<bool>) -> Self {
        self.user_verification_availability = UserVerificationAvailability::from_option(state);
        self
    }

    /// Set client PIN capability
    /// - `None`: Not capable of client PIN
    /// - `Some(false)`: Capable but PIN not set
    /// - `Some(true)`: Capable and PIN is set
    pub fn with_client_pin(mut self, state: Option<bool>) -> Self {
        self.client_pin_availability = ClientPinAvailability::from_option(state);
        self
    }

    pub fn with_pin_uv_auth_token(mut self, supported: bool) -> Self {
        self.supports_pin_uv_auth_token = supported;
        self
    }

    /// Set biometric enrollment: `Some(false)` means supported but nothing enrolled
    pub fn with_bio_enrollment(mut self, state: Option<bool>) -> Self {
        self.bio_enrollment_availability = BioEnrollmentAvailability::from_option(state);
        self
    }

    pub fn with_large_blobs(mut self, supported: bool) -> Self {
        self.supports_large_blobs = supported;
        self
    }

    pub fn with_enterprise_attestation(mut self, state: Option<bool>) -> Self {
        self.enterprise_attestation = state;
        self
    }

    pub fn with_always_uv(mut self, enabled: bool) -> Self {
        self.always_uv = enabled;
        self
    }

    fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::text_map(value)?;
        let flag = |key: &str| -> Result<Option<bool>> {
            match map.get(key) {
                None => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(_) => Err(StatusCode::CborUnexpectedType),
            }
        };

        let bio = flag(option_keys::BIO_ENROLL)?.or(flag(option_keys::BIO_ENROLL_PREVIEW)?);
        Ok(Self {
            is_platform_device: flag(option_keys::PLAT)?.unwrap_or(false),
            supports_resident_key: flag(option_keys::RK)?.unwrap_or(false),
            supports_user_presence: flag(option_keys::UP)?.unwrap_or(true),
            user_verification_availability: UserVerificationAvailability::from_option(flag(
                option_keys::UV,
            )?),
            client_pin_availability: ClientPinAvailability::from_option(flag(
                option_keys::CLIENT_PIN,
            )?),
            supports_pin_uv_auth_token: flag(option_keys::PIN_UV_AUTH_TOKEN)?.unwrap_or(false),
            bio_enrollment_availability: BioEnrollmentAvailability::from_option(bio),
            supports_large_blobs: flag(option_keys::LARGE_BLOBS)?.unwrap_or(false),
            enterprise_attestation: flag(option_keys::EP)?,
            always_uv: flag(option_keys::ALWAYS_UV)?.unwrap_or(false),
            supports_credential_management: flag(option_keys::CRED_MGMT)?.unwrap_or(false),
        })
    }

    fn to_value(&self) -> Value {
        let mut entries = vec![
            (option_keys::PLAT, Some(self.is_platform_device)),
            (option_keys::RK, Some(self.supports_resident_key)),
            (option_keys::UP, Some(self.supports_user_presence)),
            (option_keys::UV, self.user_verification_availability.as_option()),
            (option_keys::CLIENT_PIN, self.client_pin_availability.as_option()),
            (option_keys::BIO_ENROLL, self.bio_enrollment_availability.as_option()),
            (option_keys::EP, self.enterprise_attestation),
        ];
        if self.supports_pin_uv_auth_token {
            entries.push((option_keys::PIN_UV_AUTH_TOKEN, Some(true)));
        }
        if self.supports_large_blobs {
            entries.push((option_keys::LARGE_BLOBS, Some(true)));
        }
        if self.always_uv {
            entries.push((option_keys::ALWAYS_UV, Some(true)));
        }
        if self.supports_credential_management {
            entries.push((option_keys::CRED_MGMT, Some(true)));
        }

        Value::Map(
            entries
                .into_iter()
                .filter_map(|(k, v)| v.map(|b| (Value::Text(k.to_string()), Value::Bool(b))))
                .collect(),
        )
    }
}

/// Decoded authenticatorGetInfo response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    pub options: AuthenticatorSupportedOptions,
    pub max_msg_size: Option<u32>,
    pub pin_uv_auth_protocols: Vec<u8>,
    pub transports: Vec<AuthenticatorTransport>,
    /// `None` when the authenticator does not list algorithms (ES256 implied)
    pub algorithms: Option<Vec<i32>>,
    pub min_pin_length: Option<u32>,
    pub firmware_version: Option<u64>,
    pub remaining_discoverable_credentials: Option<u32>,
}

impl Default for AuthenticatorInfo {
    fn default() -> Self {
        Self {
            versions: vec!["FIDO_2_0".to_string(), "FIDO_2_1".to_string()],
            extensions: Vec::new(),
            aaguid: [0u8; 16],
            options: AuthenticatorSupportedOptions::default(),
            max_msg_size: None,
            pin_uv_auth_protocols: vec![2, 1],
            transports: Vec::new(),
            algorithms: None,
            min_pin_length: None,
            firmware_version: None,
            remaining_discoverable_credentials: None,
        }
    }
}

impl AuthenticatorInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: AuthenticatorSupportedOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<i32>) -> Self {
        self.algorithms = Some(algorithms);
        self
    }

    pub fn with_transports(mut self, transports: Vec<AuthenticatorTransport>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_min_pin_length(mut self, length: u32) -> Self {
        self.min_pin_length = Some(length);
        self
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    /// Decode a getInfo response body (status byte already stripped)
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let aaguid_bytes = parser.get_bytes(keys::AAGUID)?;
        let aaguid: [u8; 16] = aaguid_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StatusCode::InvalidLength)?;

        let options = match parser.raw(keys::OPTIONS) {
            Some(value) => AuthenticatorSupportedOptions::from_value(value)?,
            None => AuthenticatorSupportedOptions::default(),
        };

        let transports = parser
            .get_opt::<Vec<String>>(keys::TRANSPORTS)?
            .unwrap_or_default()
            .iter()
            .filter_map(|name| AuthenticatorTransport::from_name(name))
            .collect();

        let algorithms = parser.raw(keys::ALGORITHMS).map(parse_algorithms).transpose()?;

        Ok(Self {
            versions: parser.get(keys::VERSIONS)?,
            extensions: parser.get_opt(keys::EXTENSIONS)?.unwrap_or_default(),
            aaguid,
            options,
            max_msg_size: parser.get_opt(keys::MAX_MSG_SIZE)?,
            pin_uv_auth_protocols: parser.get_opt(keys::PIN_UV_AUTH_PROTOCOLS)?.unwrap_or_default(),
            transports,
            algorithms,
            min_pin_length: parser.get_opt(keys::MIN_PIN_LENGTH)?,
            firmware_version: parser.get_opt(keys::FIRMWARE_VERSION)?,
            remaining_discoverable_credentials: parser
                .get_opt(keys::REMAINING_DISCOVERABLE_CREDENTIALS)?,
        })
    }

    /// Encode as a getInfo response body
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut builder = MapBuilder::new().insert(keys::VERSIONS, &self.versions)?;
        if !self.extensions.is_empty() {
            builder = builder.insert(keys::EXTENSIONS, &self.extensions)?;
        }
        builder = builder
            .insert_bytes(keys::AAGUID, &self.aaguid)?
            .insert_value(keys::OPTIONS, self.options.to_value())
            .insert_opt(keys::MAX_MSG_SIZE, self.max_msg_size)?
            .insert(keys::PIN_UV_AUTH_PROTOCOLS, &self.pin_uv_auth_protocols)?;

        if !self.transports.is_empty() {
            let names: Vec<&str> = self.transports.iter().map(|t| t.as_str()).collect();
            builder = builder.insert(keys::TRANSPORTS, names)?;
        }
        if let Some(algorithms) = &self.algorithms {
            let entries = algorithms
                .iter()
                .map(|&alg| {
                    Value::Map(vec![
                        (Value::Text("alg".into()), Value::Integer(alg.into())),
                        (Value::Text("type".into()), Value::Text("public-key".into())),
                    ])
                })
                .collect();
            builder = builder.insert_value(keys::ALGORITHMS, Value::Array(entries));
        }

        builder
            .insert_opt(keys::MIN_PIN_LENGTH, self.min_pin_length)?
            .insert_opt(keys::FIRMWARE_VERSION, self.firmware_version)?
            .insert_opt(
                keys::REMAINING_DISCOVERABLE_CREDENTIALS,
                self.remaining_discoverable_credentials,
            )?
            .build()
    }
}

/// Keep only "public-key" entries; other credential types are irrelevant here
fn parse_algorithms(value: &Value) -> Result<Vec<i32>> {
    let entries = value.as_array().ok_or(StatusCode::CborUnexpectedType)?;
    let mut algorithms = Vec::with_capacity(entries.len());
    for entry in entries {
        let map = cbor::text_map(entry)?;
        if map.get("type").and_then(Value::as_text) != Some("public-key") {
            continue;
        }
        let alg = map
            .get("alg")
            .and_then(Value::as_integer)
            .and_then(|i| i32::try_from(i).ok())
            .ok_or(StatusCode::CborUnexpectedType)?;
        algorithms.push(alg);
    }
    Ok(algorithms)
}
