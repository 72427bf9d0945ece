//! Caller policy for a credential creation
//!
//! These settings never go on the wire as-is. The handler folds them into the
//! request it specializes for each authenticator.

use credmaker_ctap::{AuthenticatorAttachment, CredProtect};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a discoverable credential should be created
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResidentKeyRequirement {
    #[default]
    Discouraged,
    Preferred,
    Required,
}

/// How strongly user verification is wanted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserVerificationRequirement {
    Discouraged,
    #[default]
    Preferred,
    Required,
}

/// Large blob storage wanted for the new credential
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LargeBlobSupport {
    #[default]
    NotRequested,
    Preferred,
    Required,
}

/// Requested credProtect level
///
/// With `enforce` set, authenticators that cannot apply the level are
/// ineligible instead of silently creating a weaker credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredProtectRequest {
    pub level: CredProtect,
    pub enforce: bool,
}

/// Per-request caller policy
///
/// # Example
///
/// ```rust
/// use credmaker::{MakeCredentialOptions, ResidentKeyRequirement, UserVerificationRequirement};
/// use credmaker_ctap::{AuthenticatorAttachment, CredProtect};
///
/// let options = MakeCredentialOptions::new()
///     .with_attachment(AuthenticatorAttachment::CrossPlatform)
///     .with_resident_key(ResidentKeyRequirement::Preferred)
///     .with_user_verification(UserVerificationRequirement::Required)
///     .with_cred_protect(CredProtect::UvRequired, true);
/// assert!(options.cred_protect.unwrap().enforce);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeCredentialOptions {
    pub authenticator_attachment: AuthenticatorAttachment,
    pub resident_key: ResidentKeyRequirement,
    pub user_verification: UserVerificationRequirement,
    pub cred_protect: Option<CredProtectRequest>,
    pub large_blob_support: LargeBlobSupport,
    /// Start PIN/UV without a first touch when only one authenticator is present
    pub allow_skipping_pin_touch: bool,
}

impl MakeCredentialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attachment(mut self, attachment: AuthenticatorAttachment) -> Self {
        self.authenticator_attachment = attachment;
        self
    }

    pub fn with_resident_key(mut self, requirement: ResidentKeyRequirement) -> Self {
        self.resident_key = requirement;
        self
    }

    pub fn with_user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.user_verification = requirement;
        self
    }

    pub fn with_cred_protect(mut self, level: CredProtect, enforce: bool) -> Self {
        self.cred_protect = Some(CredProtectRequest { level, enforce });
        self
    }

    pub fn with_large_blob_support(mut self, support: LargeBlobSupport) -> Self {
        self.large_blob_support = support;
        self
    }

    pub fn with_allow_skipping_pin_touch(mut self, allow: bool) -> Self {
        self.allow_skipping_pin_touch = allow;
        self
    }
}

/// Handler tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// PIN/UV rejections faster than this are taken to mean internal UV is
    /// locked rather than failed, and an extra touch is collected first.
    #[serde(with = "duration_millis")]
    pub min_expected_response_time: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            min_expected_response_time: Duration::from_millis(300),
        }
    }
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_expected_response_time(mut self, duration: Duration) -> Self {
        self.min_expected_response_time = duration;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MakeCredentialOptions::default();
        assert_eq!(options.authenticator_attachment, AuthenticatorAttachment::Any);
        assert_eq!(options.resident_key, ResidentKeyRequirement::Discouraged);
        assert_eq!(options.user_verification, UserVerificationRequirement::Preferred);
        assert!(options.cred_protect.is_none());
        assert!(!options.allow_skipping_pin_touch);

        assert_eq!(
            HandlerConfig::default().min_expected_response_time,
            Duration::from_millis(300)
        );
    }

    #[test]
    fn test_options_from_json() {
        let options: MakeCredentialOptions = serde_json::from_str(
            r#"{"resident_key": "preferred", "authenticator_attachment": "cross-platform",
                "large_blob_support": "required"}"#,
        )
        .unwrap();
        assert_eq!(options.resident_key, ResidentKeyRequirement::Preferred);
        assert_eq!(options.authenticator_attachment, AuthenticatorAttachment::CrossPlatform);
        assert_eq!(options.large_blob_support, LargeBlobSupport::Required);
        assert_eq!(options.user_verification, UserVerificationRequirement::Preferred);

        let config: HandlerConfig =
            serde_json::from_str(r#"{"min_expected_response_time": 150}"#).unwrap();
        assert_eq!(config.min_expected_response_time, Duration::from_millis(150));
    }
}
