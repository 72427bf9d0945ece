//! Extension identifiers used in MakeCredential requests and responses

pub const CRED_PROTECT: &str = "credProtect";
pub const HMAC_SECRET: &str = "hmac-secret";
pub const CRED_BLOB: &str = "credBlob";
pub const MIN_PIN_LENGTH: &str = "minPinLength";
pub const LARGE_BLOB_KEY: &str = "largeBlobKey";
pub const ANDROID_CLIENT_DATA: &str = "googleAndroidClientData";
