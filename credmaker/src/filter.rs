//! Per-authenticator eligibility and request specialization

use crate::authenticator::Authenticator;
use crate::error::MakeCredentialStatus;
use crate::options::{
    LargeBlobSupport, MakeCredentialOptions, ResidentKeyRequirement, UserVerificationRequirement,
};
use crate::pin_uv::{self, PinUvDisposition};
use crate::request::CredentialCreationRequest;

use credmaker_ctap::{
    extensions, AttestationConveyancePreference, AuthenticatorAttachment,
    UserVerificationAvailability,
};

/// Pre-touch check: can this authenticator be asked at all?
///
/// Only a known capability report can rule an authenticator out here.
pub fn pre_touch_accepts(options: &MakeCredentialOptions, authenticator: &dyn Authenticator) -> bool {
    let Some(info) = authenticator.info() else {
        return true;
    };
    match options.authenticator_attachment {
        AuthenticatorAttachment::Any => true,
        AuthenticatorAttachment::Platform => info.options.is_platform_device,
        AuthenticatorAttachment::CrossPlatform => !info.options.is_platform_device,
    }
}

/// Clone the base request and fit it to one authenticator
pub fn specialize(
    base: &CredentialCreationRequest,
    options: &MakeCredentialOptions,
    authenticator: &dyn Authenticator,
    can_collect_pin: bool,
) -> CredentialCreationRequest {
    let info = authenticator.info();
    let mut request = base.clone();

    request.authenticator_attachment = options.authenticator_attachment;

    request.resident_key = match options.resident_key {
        ResidentKeyRequirement::Required => true,
        // Only worth it when the user can be verified to later use the credential.
        ResidentKeyRequirement::Preferred => info.map_or(true, |info| {
            info.options.supports_resident_key
                && (can_collect_pin
                    || info.options.user_verification_availability
                        == UserVerificationAvailability::SupportedAndConfigured)
        }),
        ResidentKeyRequirement::Discouraged => false,
    };

    request.user_verification = options.user_verification;
    if request.resident_key && request.user_verification == UserVerificationRequirement::Discouraged
    {
        request.user_verification = UserVerificationRequirement::Preferred;
    }

    request.cred_protect = options
        .cred_protect
        .filter(|_| authenticator.supports_cred_protect_extension());

    request.hmac_secret &= authenticator.supports_hmac_secret_extension();
    request.large_blob_key = options.large_blob_support != LargeBlobSupport::NotRequested
        && authenticator.supports_large_blob();

    if let Some(info) = info {
        if !info.supports_extension(extensions::CRED_BLOB) {
            request.cred_blob = None;
        }
        if !info.supports_extension(extensions::MIN_PIN_LENGTH) {
            request.min_pin_length = false;
        }
    }

    if request.attestation.is_enterprise() && !authenticator.supports_enterprise_attestation() {
        request.attestation = AttestationConveyancePreference::Direct;
    }

    request
}

/// Post-touch check on a specialized request
///
/// Returns the status to report if this authenticator cannot satisfy it.
pub fn post_touch_mismatch(
    request: &CredentialCreationRequest,
    options: &MakeCredentialOptions,
    authenticator: &dyn Authenticator,
    can_collect_pin: bool,
) -> Option<MakeCredentialStatus> {
    if options.cred_protect.is_some_and(|cp| cp.enforce)
        && !authenticator.supports_cred_protect_extension()
    {
        return Some(MakeCredentialStatus::AuthenticatorMissingResidentKeys);
    }

    let info = authenticator.info()?;

    if options.resident_key == ResidentKeyRequirement::Required
        && !info.options.supports_resident_key
    {
        return Some(MakeCredentialStatus::AuthenticatorMissingResidentKeys);
    }

    if pin_uv::disposition(request, authenticator, can_collect_pin)
        == PinUvDisposition::Unsatisfiable
    {
        return Some(MakeCredentialStatus::AuthenticatorMissingUserVerification);
    }

    if options.large_blob_support == LargeBlobSupport::Required && !info.options.supports_large_blobs
    {
        return Some(MakeCredentialStatus::AuthenticatorMissingLargeBlob);
    }

    if let Some(supported) = &info.algorithms {
        let common = request
            .pub_key_cred_params
            .iter()
            .any(|param| supported.contains(&param.alg));
        if !common {
            return Some(MakeCredentialStatus::NoCommonAlgorithms);
        }
    }

    None
}
