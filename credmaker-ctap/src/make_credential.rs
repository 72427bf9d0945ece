//! authenticatorMakeCredential response decoding
//!
//! The response map carries the attestation format, the raw authenticator data
//! and the attestation statement, plus the optional `epAtt` and `largeBlobKey`
//! members. The authenticator data is parsed far enough to expose the RP ID
//! hash, flags, attested credential and the extension output map.

use crate::cbor::{self, MapBuilder, MapParser};
use crate::status::{Result, StatusCode};
use crate::types::AuthenticatorTransport;

use std::collections::BTreeMap;
use std::io::Cursor;

use ciborium::Value;

/// MakeCredential response keys
mod keys {
    pub const FMT: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const ATT_STMT: i32 = 0x03;
    pub const EP_ATT: i32 = 0x04;
    pub const LARGE_BLOB_KEY: i32 = 0x05;
}

/// Authenticator data flag bits
pub mod flags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const BACKUP_ELIGIBLE: u8 = 0x08;
    pub const BACKED_UP: u8 = 0x10;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;
}

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

/// Credential created by the authenticator
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key, left undecoded
    pub public_key: Value,
}

/// Parsed authenticator data
///
/// Layout: rpIdHash (32) | flags (1) | signCount (4) | attestedCredentialData? | extensions?
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// Extension outputs keyed by identifier; `None` when the ED flag is clear
    pub extensions: Option<BTreeMap<String, Value>>,
}

impl AuthenticatorData {
    /// Create authenticator data with UP set and no optional sections
    pub fn new(rp_id_hash: [u8; 32]) -> Self {
        Self {
            rp_id_hash,
            flags: flags::USER_PRESENT,
            sign_count: 0,
            attested_credential_data: None,
            extensions: None,
        }
    }

    pub fn with_attested_credential(mut self, credential: AttestedCredentialData) -> Self {
        self.flags |= flags::ATTESTED_CREDENTIAL_DATA;
        self.attested_credential_data = Some(credential);
        self
    }

    /// Add an extension output, setting the ED flag
    pub fn with_extension(mut self, name: &str, value: Value) -> Self {
        self.flags |= flags::EXTENSION_DATA;
        self.extensions
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), value);
        self
    }

    pub fn user_present(&self) -> bool {
        self.flags & flags::USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & flags::USER_VERIFIED != 0
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(StatusCode::InvalidLength);
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..RP_ID_HASH_LEN]);
        let flag_byte = data[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let mut cursor = Cursor::new(&data[HEADER_LEN..]);

        let attested_credential_data = if flag_byte & flags::ATTESTED_CREDENTIAL_DATA != 0 {
            Some(read_attested_credential(&mut cursor)?)
        } else {
            None
        };

        let extensions = if flag_byte & flags::EXTENSION_DATA != 0 {
            let value: Value =
                ciborium::from_reader(&mut cursor).map_err(|_| StatusCode::InvalidCbor)?;
            Some(cbor::text_map(&value)?)
        } else {
            None
        };

        if cursor.position() as usize != cursor.get_ref().len() {
            return Err(StatusCode::InvalidLength);
        }

        Ok(Self {
            rp_id_hash,
            flags: flag_byte,
            sign_count,
            attested_credential_data,
            extensions,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());

        if let Some(credential) = &self.attested_credential_data {
            let id_len =
                u16::try_from(credential.credential_id.len()).map_err(|_| StatusCode::InvalidLength)?;
            out.extend_from_slice(&credential.aaguid);
            out.extend_from_slice(&id_len.to_be_bytes());
            out.extend_from_slice(&credential.credential_id);
            ciborium::into_writer(&credential.public_key, &mut out)
                .map_err(|_| StatusCode::InvalidCbor)?;
        }

        if let Some(extensions) = &self.extensions {
            let map = Value::Map(
                extensions
                    .iter()
                    .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                    .collect(),
            );
            ciborium::into_writer(&map, &mut out).map_err(|_| StatusCode::InvalidCbor)?;
        }

        Ok(out)
    }
}

fn read_attested_credential(cursor: &mut Cursor<&[u8]>) -> Result<AttestedCredentialData> {
    let rest = &cursor.get_ref()[cursor.position() as usize..];
    if rest.len() < 18 {
        return Err(StatusCode::InvalidLength);
    }

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&rest[..16]);
    let id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
    let credential_id = rest
        .get(18..18 + id_len)
        .ok_or(StatusCode::InvalidLength)?
        .to_vec();

    cursor.set_position(cursor.position() + 18 + id_len as u64);
    let public_key: Value = ciborium::from_reader(&mut *cursor).map_err(|_| StatusCode::InvalidCbor)?;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        public_key,
    })
}

/// Decoded authenticatorMakeCredential response
#[derive(Debug, Clone, PartialEq)]
pub struct MakeCredentialResponse {
    /// Attestation statement format identifier ("packed", "none", ...)
    pub format: String,
    pub authenticator_data: AuthenticatorData,
    pub attestation_statement: Value,
    /// `epAtt`: the authenticator returned an enterprise attestation
    pub enterprise_attestation: bool,
    pub large_blob_key: Option<Vec<u8>>,
    /// Filled in by the transport layer, never by decoding
    pub transport_used: Option<AuthenticatorTransport>,
}

impl MakeCredentialResponse {
    /// Response with "none" attestation
    pub fn new(authenticator_data: AuthenticatorData) -> Self {
        Self {
            format: "none".to_string(),
            authenticator_data,
            attestation_statement: Value::Map(Vec::new()),
            enterprise_attestation: false,
            large_blob_key: None,
            transport_used: None,
        }
    }

    pub fn with_enterprise_attestation(mut self, returned: bool) -> Self {
        self.enterprise_attestation = returned;
        self
    }

    pub fn with_large_blob_key(mut self, key: Vec<u8>) -> Self {
        self.large_blob_key = Some(key);
        self
    }

    /// Extension output by identifier
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.authenticator_data.extensions.as_ref()?.get(name)
    }

    /// Decode a MakeCredential response body (status byte already stripped)
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let auth_data_bytes = parser.get_bytes(keys::AUTH_DATA)?;
        let attestation_statement = parser
            .raw(keys::ATT_STMT)
            .cloned()
            .ok_or(StatusCode::MissingParameter)?;
        if !attestation_statement.is_map() {
            return Err(StatusCode::CborUnexpectedType);
        }

        Ok(Self {
            format: parser.get(keys::FMT)?,
            authenticator_data: AuthenticatorData::from_bytes(&auth_data_bytes)?,
            attestation_statement,
            enterprise_attestation: parser.get_opt(keys::EP_ATT)?.unwrap_or(false),
            large_blob_key: parser.get_bytes_opt(keys::LARGE_BLOB_KEY)?,
            transport_used: None,
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut builder = MapBuilder::new()
            .insert(keys::FMT, &self.format)?
            .insert_bytes(keys::AUTH_DATA, &self.authenticator_data.to_bytes()?)?
            .insert_value(keys::ATT_STMT, self.attestation_statement.clone());
        if self.enterprise_attestation {
            builder = builder.insert(keys::EP_ATT, true)?;
        }
        if let Some(key) = &self.large_blob_key {
            builder = builder.insert_bytes(keys::LARGE_BLOB_KEY, key)?;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cose_key() -> Value {
        Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![0x11; 32])),
            (Value::Integer((-3).into()), Value::Bytes(vec![0x22; 32])),
        ])
    }

    #[test]
    fn test_decode_full_response() {
        let auth_data = AuthenticatorData::new([0xAB; 32])
            .with_attested_credential(AttestedCredentialData {
                aaguid: [3u8; 16],
                credential_id: vec![9, 8, 7, 6],
                public_key: cose_key(),
            })
            .with_extension("credProtect", Value::Integer(2.into()))
            .with_extension("hmac-secret", Value::Bool(true));
        let response = MakeCredentialResponse::new(auth_data)
            .with_enterprise_attestation(true)
            .with_large_blob_key(vec![5u8; 32]);

        let decoded = MakeCredentialResponse::from_cbor(&response.to_cbor().unwrap()).unwrap();

        assert_eq!(decoded.authenticator_data.rp_id_hash, [0xAB; 32]);
        assert_eq!(decoded.extension("credProtect"), Some(&Value::Integer(2.into())));
        assert_eq!(decoded.extension("hmac-secret"), Some(&Value::Bool(true)));
        assert!(decoded.enterprise_attestation);
        assert_eq!(decoded.large_blob_key, Some(vec![5u8; 32]));
        let credential = decoded.authenticator_data.attested_credential_data.unwrap();
        assert_eq!(credential.credential_id, vec![9, 8, 7, 6]);
        assert_eq!(credential.public_key, cose_key());
    }

    #[test]
    fn test_auth_data_without_optional_sections() {
        let mut raw = vec![0x42; 32];
        raw.push(flags::USER_PRESENT | flags::USER_VERIFIED);
        raw.extend_from_slice(&7u32.to_be_bytes());

        let parsed = AuthenticatorData::from_bytes(&raw).unwrap();
        assert!(parsed.user_present());
        assert!(parsed.user_verified());
        assert_eq!(parsed.sign_count, 7);
        assert!(parsed.extensions.is_none());
        assert!(parsed.attested_credential_data.is_none());
    }

    #[test]
    fn test_auth_data_rejects_trailing_bytes() {
        let mut raw = AuthenticatorData::new([1; 32]).to_bytes().unwrap();
        raw.push(0x00);
        assert_eq!(AuthenticatorData::from_bytes(&raw).unwrap_err(), StatusCode::InvalidLength);
    }

    #[test]
    fn test_auth_data_truncated() {
        assert_eq!(
            AuthenticatorData::from_bytes(&[0u8; 20]).unwrap_err(),
            StatusCode::InvalidLength
        );

        let mut raw = vec![0u8; 32];
        raw.push(flags::ATTESTED_CREDENTIAL_DATA);
        raw.extend_from_slice(&[0, 0, 0, 1]);
        raw.extend_from_slice(&[0u8; 16]);
        raw.extend_from_slice(&[0x00, 0x40]);
        raw.extend_from_slice(&[1u8; 10]);
        assert_eq!(AuthenticatorData::from_bytes(&raw).unwrap_err(), StatusCode::InvalidLength);
    }

    #[test]
    fn test_missing_auth_data() {
        let data = MapBuilder::new()
            .insert(keys::FMT, "packed")
            .unwrap()
            .insert_value(keys::ATT_STMT, Value::Map(Vec::new()))
            .build()
            .unwrap();
        assert_eq!(
            MakeCredentialResponse::from_cbor(&data).unwrap_err(),
            StatusCode::MissingParameter
        );
    }
}
