//! PIN and user verification negotiation
//!
//! Decides how the selected authenticator will verify the user, which
//! permissions the PIN/UV token needs, and computes `pinUvAuthParam` from a
//! token once one is obtained.

use crate::authenticator::{Authenticator, AuthenticatorKind};
use crate::error::{Error, Result};
use crate::options::UserVerificationRequirement;
use crate::request::{ClientDataHash, CredentialCreationRequest, PinUvAuth, PinUvAuthProtocol};

use credmaker_ctap::{
    AuthenticatorInfo, BioEnrollmentAvailability, ClientPinAvailability,
    UserVerificationAvailability,
};

use std::fmt;
use std::ops::BitOr;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Minimum PIN length when the authenticator does not report one
pub const DEFAULT_MIN_PIN_LENGTH: u32 = 4;

/// How the user will be verified for one authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinUvDisposition {
    /// Send the request without asking for verification
    NoUv,
    /// Let the authenticator verify internally
    InternalUv,
    /// Internal verification, with PIN entry if the authenticator rejects it
    InternalUvWithPinFallback,
    /// Collect the existing PIN and get a token with it
    UsePin,
    /// Have the user set a PIN first
    SetPin,
    /// Get a token through built-in verification
    UseUvToken,
    /// The requirement cannot be met by this authenticator
    Unsatisfiable,
}

/// Work out the disposition for a specialized request
pub fn disposition(
    request: &CredentialCreationRequest,
    authenticator: &dyn Authenticator,
    can_collect_pin: bool,
) -> PinUvDisposition {
    if authenticator.kind() == AuthenticatorKind::OsProxy {
        return PinUvDisposition::NoUv;
    }
    let Some(info) = authenticator.info() else {
        return PinUvDisposition::NoUv;
    };
    let options = &info.options;

    let pin_supported = options.client_pin_availability != ClientPinAvailability::NotSupported;
    let pin_set = options.client_pin_availability == ClientPinAvailability::SupportedAndPinSet;
    let uv_configured = options.user_verification_availability
        == UserVerificationAvailability::SupportedAndConfigured;

    // CTAP2.0 authenticators demand verification once a PIN is set.
    let requirement = if pin_set || options.always_uv {
        UserVerificationRequirement::Required
    } else {
        request.user_verification
    };

    if requirement == UserVerificationRequirement::Discouraged {
        return PinUvDisposition::NoUv;
    }

    let can_use_pin = pin_set && can_collect_pin;
    if !uv_configured && !can_use_pin {
        return match requirement {
            UserVerificationRequirement::Required if pin_supported && can_collect_pin && !pin_set => {
                PinUvDisposition::SetPin
            }
            UserVerificationRequirement::Required => PinUvDisposition::Unsatisfiable,
            _ => PinUvDisposition::NoUv,
        };
    }

    if uv_configured && options.supports_pin_uv_auth_token {
        PinUvDisposition::UseUvToken
    } else if uv_configured && can_use_pin {
        PinUvDisposition::InternalUvWithPinFallback
    } else if uv_configured {
        PinUvDisposition::InternalUv
    } else {
        PinUvDisposition::UsePin
    }
}

/// Whether PIN entry is still possible once internal UV is locked
pub fn can_fall_back_to_pin(info: Option<&AuthenticatorInfo>, can_collect_pin: bool) -> bool {
    can_collect_pin
        && info.is_some_and(|info| {
            info.options.client_pin_availability == ClientPinAvailability::SupportedAndPinSet
        })
}

/// PIN/UV token permission bitmap (mc=1, ga=2, cm=4, be=8, lbw=16, acfg=32)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub const MAKE_CREDENTIAL: Self = Self(0x01);
    pub const GET_ASSERTION: Self = Self(0x02);
    pub const CREDENTIAL_MANAGEMENT: Self = Self(0x04);
    pub const BIO_ENROLLMENT: Self = Self(0x08);
    pub const LARGE_BLOB_WRITE: Self = Self(0x10);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Permissions to request for a MakeCredential token
///
/// GetAssertion is needed to probe the exclude list; BioEnrollment when the
/// token will also be used to enroll a first fingerprint.
pub fn token_permissions(
    request: &CredentialCreationRequest,
    info: Option<&AuthenticatorInfo>,
) -> Permissions {
    let mut permissions = Permissions::MAKE_CREDENTIAL;
    if !request.exclude_list.is_empty() {
        permissions = permissions | Permissions::GET_ASSERTION;
    }
    if needs_bio_enrollment(info) {
        permissions = permissions | Permissions::BIO_ENROLLMENT;
    }
    permissions
}

pub(crate) fn needs_bio_enrollment(info: Option<&AuthenticatorInfo>) -> bool {
    info.is_some_and(|info| {
        info.options.bio_enrollment_availability
            == BioEnrollmentAvailability::SupportedButUnprovisioned
    })
}

pub(crate) fn min_pin_length(info: Option<&AuthenticatorInfo>) -> u32 {
    info.and_then(|info| info.min_pin_length)
        .unwrap_or(DEFAULT_MIN_PIN_LENGTH)
}

/// Short-lived PIN/UV auth token
///
/// Scoped to one request, cleared from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PinUvToken {
    token: Vec<u8>,
    #[zeroize(skip)]
    protocol: PinUvAuthProtocol,
}

impl PinUvToken {
    /// Wrap a decrypted token
    ///
    /// Protocol 1 tokens are a non-empty multiple of 16 bytes, protocol 2
    /// tokens exactly 32.
    pub fn new(token: Vec<u8>, protocol: PinUvAuthProtocol) -> Result<Self> {
        let valid = match protocol {
            PinUvAuthProtocol::V1 => !token.is_empty() && token.len() % 16 == 0,
            PinUvAuthProtocol::V2 => token.len() == 32,
        };
        if !valid {
            return Err(Error::InvalidPinUvToken);
        }
        Ok(Self { token, protocol })
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.token
    }

    /// Compute pinUvAuthParam over the client data hash
    ///
    /// Protocol 1 keeps the first 16 bytes of HMAC-SHA-256, protocol 2 all 32.
    pub fn pin_auth(&self, client_data_hash: &ClientDataHash) -> Result<PinUvAuth> {
        let mut mac =
            HmacSha256::new_from_slice(&self.token).map_err(|_| Error::InvalidPinUvToken)?;
        mac.update(client_data_hash.as_slice());
        let digest = mac.finalize().into_bytes();

        let param = match self.protocol {
            PinUvAuthProtocol::V1 => digest[..16].to_vec(),
            PinUvAuthProtocol::V2 => digest.to_vec(),
        };
        Ok(PinUvAuth::new(param, self.protocol))
    }
}

impl fmt::Debug for PinUvToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinUvToken")
            .field("protocol", &self.protocol)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::{BioEnrollSample, Completion, DeviceReply};
    use crate::request::CredentialCreationRequest;

    use credmaker_ctap::{
        AuthenticatorSupportedOptions, AuthenticatorTransport, MakeCredentialResponse,
        PublicKeyCredentialDescriptor, RelyingParty, User,
    };

    use crate::authenticator::AuthenticatorId;

    struct InfoOnly {
        id: AuthenticatorId,
        info: Option<AuthenticatorInfo>,
        kind: AuthenticatorKind,
    }

    impl InfoOnly {
        fn with(options: AuthenticatorSupportedOptions) -> Self {
            Self {
                id: AuthenticatorId::new("dev"),
                info: Some(AuthenticatorInfo::new().with_options(options)),
                kind: AuthenticatorKind::Device,
            }
        }
    }

    impl Authenticator for InfoOnly {
        fn id(&self) -> &AuthenticatorId {
            &self.id
        }
        fn kind(&self) -> AuthenticatorKind {
            self.kind
        }
        fn info(&self) -> Option<&AuthenticatorInfo> {
            self.info.as_ref()
        }
        fn transport(&self) -> Option<AuthenticatorTransport> {
            Some(AuthenticatorTransport::Usb)
        }
        fn get_touch(&self, _done: Completion<()>) {}
        fn make_credential(
            &self,
            _request: CredentialCreationRequest,
            _done: DeviceReply<MakeCredentialResponse>,
        ) {
        }
        fn get_pin_retries(&self, _done: DeviceReply<u8>) {}
        fn get_uv_retries(&self, _done: DeviceReply<u8>) {}
        fn get_pin_token(
            &self,
            _pin: &str,
            _permissions: Permissions,
            _rp_id: &str,
            _done: DeviceReply<PinUvToken>,
        ) {
        }
        fn get_uv_token(&self, _p: Permissions, _rp_id: &str, _done: DeviceReply<PinUvToken>) {}
        fn set_pin(&self, _pin: &str, _done: DeviceReply<()>) {}
        fn bio_enroll(
            &self,
            _token: &PinUvToken,
            _template_id: Option<Vec<u8>>,
            _done: DeviceReply<BioEnrollSample>,
        ) {
        }
        fn cancel(&self) {}
    }

    fn request(uv: UserVerificationRequirement) -> CredentialCreationRequest {
        let user = User {
            id: vec![1],
            name: None,
            display_name: None,
        };
        let mut request = CredentialCreationRequest::new(
            ClientDataHash::new([7u8; 32]),
            RelyingParty::new("example.com"),
            user,
        );
        request.user_verification = uv;
        request
    }

    #[test]
    fn test_no_report_means_no_uv() {
        let auth = InfoOnly {
            id: AuthenticatorId::new("proxy"),
            info: None,
            kind: AuthenticatorKind::Device,
        };
        assert_eq!(
            disposition(&request(UserVerificationRequirement::Required), &auth, true),
            PinUvDisposition::NoUv
        );
    }

    #[test]
    fn test_pin_set_forces_verification() {
        let auth = InfoOnly::with(AuthenticatorSupportedOptions::new().with_client_pin(Some(true)));
        let req = request(UserVerificationRequirement::Discouraged);
        assert_eq!(disposition(&req, &auth, true), PinUvDisposition::UsePin);
        assert_eq!(disposition(&req, &auth, false), PinUvDisposition::Unsatisfiable);
    }

    #[test]
    fn test_set_pin_when_required_and_unset() {
        let auth = InfoOnly::with(AuthenticatorSupportedOptions::new().with_client_pin(Some(false)));
        assert_eq!(
            disposition(&request(UserVerificationRequirement::Required), &auth, true),
            PinUvDisposition::SetPin
        );
        assert_eq!(
            disposition(&request(UserVerificationRequirement::Preferred), &auth, true),
            PinUvDisposition::NoUv
        );
    }

    #[test]
    fn test_internal_uv_dispositions() {
        let uv_only = InfoOnly::with(AuthenticatorSupportedOptions::new().with_user_verification(Some(true)));
        let req = request(UserVerificationRequirement::Preferred);
        assert_eq!(disposition(&req, &uv_only, true), PinUvDisposition::InternalUv);

        let uv_and_pin = InfoOnly::with(
            AuthenticatorSupportedOptions::new()
                .with_user_verification(Some(true))
                .with_client_pin(Some(true)),
        );
        assert_eq!(
            disposition(&req, &uv_and_pin, true),
            PinUvDisposition::InternalUvWithPinFallback
        );

        let uv_token = InfoOnly::with(
            AuthenticatorSupportedOptions::new()
                .with_user_verification(Some(true))
                .with_pin_uv_auth_token(true),
        );
        assert_eq!(disposition(&req, &uv_token, true), PinUvDisposition::UseUvToken);
    }

    #[test]
    fn test_always_uv_without_any_method() {
        let auth = InfoOnly::with(AuthenticatorSupportedOptions::new().with_always_uv(true));
        assert_eq!(
            disposition(&request(UserVerificationRequirement::Discouraged), &auth, true),
            PinUvDisposition::Unsatisfiable
        );
    }

    #[test]
    fn test_token_permissions() {
        let mut req = request(UserVerificationRequirement::Required);
        assert_eq!(token_permissions(&req, None), Permissions::MAKE_CREDENTIAL);

        req.exclude_list = vec![PublicKeyCredentialDescriptor::new(vec![1, 2])];
        let info = AuthenticatorInfo::new().with_options(
            AuthenticatorSupportedOptions::new().with_bio_enrollment(Some(false)),
        );
        let permissions = token_permissions(&req, Some(&info));
        assert_eq!(permissions.bits(), 0x0B);
        assert!(permissions.contains(Permissions::BIO_ENROLLMENT));
    }

    #[test]
    fn test_pin_auth_truncation() {
        let hash = ClientDataHash::new([1u8; 32]);
        let v1 = PinUvToken::new(vec![9u8; 16], PinUvAuthProtocol::V1).unwrap();
        let v2 = PinUvToken::new(vec![9u8; 32], PinUvAuthProtocol::V2).unwrap();

        let auth_v1 = v1.pin_auth(&hash).unwrap();
        let auth_v2 = v2.pin_auth(&hash).unwrap();
        assert_eq!(auth_v1.param().len(), 16);
        assert_eq!(auth_v2.param().len(), 32);
        assert_eq!(auth_v2.protocol(), PinUvAuthProtocol::V2);
    }

    #[test]
    fn test_token_length_checked() {
        assert_eq!(
            PinUvToken::new(vec![0u8; 16], PinUvAuthProtocol::V2).unwrap_err(),
            Error::InvalidPinUvToken
        );
        assert_eq!(
            PinUvToken::new(Vec::new(), PinUvAuthProtocol::V1).unwrap_err(),
            Error::InvalidPinUvToken
        );
        let token = PinUvToken::new(vec![0xAA; 32], PinUvAuthProtocol::V2).unwrap();
        assert!(!format!("{token:?}").contains("170"));
    }
}
