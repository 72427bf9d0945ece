//! Checks applied to a successful MakeCredential response before it is
//! handed to the caller.

use crate::authenticator::Authenticator;
use crate::error::{Error, Result};
use crate::request::CredentialCreationRequest;

use credmaker_ctap::{extensions, CredProtect, MakeCredentialResponse};

use ciborium::Value;
use sha2::{Digest, Sha256};

/// Validate `response` against the specialized request that produced it
pub fn validate_response(
    request: &CredentialCreationRequest,
    authenticator: &dyn Authenticator,
    response: &MakeCredentialResponse,
) -> Result<()> {
    let rp_id_hash: [u8; 32] = Sha256::digest(request.rp.id.as_bytes()).into();
    if response.authenticator_data.rp_id_hash != rp_id_hash {
        return Err(Error::RpIdHashMismatch);
    }

    if let Some(outputs) = &response.authenticator_data.extensions {
        for (name, value) in outputs {
            validate_extension(request, authenticator, name, value)?;
        }
    }

    if response.enterprise_attestation && !request.attestation.is_enterprise() {
        return Err(Error::UnrequestedEnterpriseAttestation);
    }

    if request.large_blob_key && response.large_blob_key.is_none() {
        return Err(Error::MissingLargeBlobKey);
    }

    Ok(())
}

fn validate_extension(
    request: &CredentialCreationRequest,
    authenticator: &dyn Authenticator,
    name: &str,
    value: &Value,
) -> Result<()> {
    match name {
        extensions::CRED_PROTECT => {
            let level = value
                .as_integer()
                .map(i128::from)
                .ok_or(Error::InvalidExtensionOutput(extensions::CRED_PROTECT))?;
            if !authenticator.supports_cred_protect_extension() {
                return Err(Error::UnexpectedExtension(name.to_string()));
            }
            let floor = request
                .cred_protect
                .map_or(CredProtect::UvOptional, |cp| cp.level);
            if level < i128::from(floor.as_u8()) || level > i128::from(CredProtect::MAX.as_u8()) {
                return Err(Error::CredProtectOutOfRange(level));
            }
        }
        extensions::HMAC_SECRET => {
            if !value.is_bool() {
                return Err(Error::InvalidExtensionOutput(extensions::HMAC_SECRET));
            }
            if !request.hmac_secret {
                return Err(Error::UnexpectedExtension(name.to_string()));
            }
        }
        extensions::CRED_BLOB => {
            if !value.is_bool() {
                return Err(Error::InvalidExtensionOutput(extensions::CRED_BLOB));
            }
            if request.cred_blob.is_none() {
                return Err(Error::UnexpectedExtension(name.to_string()));
            }
        }
        extensions::MIN_PIN_LENGTH => {
            let unsigned = value
                .as_integer()
                .is_some_and(|i| i128::from(i) >= 0);
            if !unsigned {
                return Err(Error::InvalidExtensionOutput(extensions::MIN_PIN_LENGTH));
            }
            if !request.min_pin_length {
                return Err(Error::UnexpectedExtension(name.to_string()));
            }
        }
        extensions::ANDROID_CLIENT_DATA => {
            let json = match value {
                Value::Text(text) => text.as_str(),
                Value::Bytes(bytes) => std::str::from_utf8(bytes)
                    .map_err(|_| Error::InvalidExtensionOutput(extensions::ANDROID_CLIENT_DATA))?,
                _ => return Err(Error::InvalidExtensionOutput(extensions::ANDROID_CLIENT_DATA)),
            };
            let input = request
                .android_client_data
                .as_ref()
                .ok_or_else(|| Error::UnexpectedExtension(name.to_string()))?;
            input.verify(json)?;
        }
        _ => return Err(Error::UnexpectedExtension(name.to_string())),
    }
    Ok(())
}
