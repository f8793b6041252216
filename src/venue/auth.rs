use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::Sha256;

use super::VenueError;

pub const HEADER_KEY: &str = "KALSHI-ACCESS-KEY";
pub const HEADER_SIGNATURE: &str = "KALSHI-ACCESS-SIGNATURE";
pub const HEADER_TIMESTAMP: &str = "KALSHI-ACCESS-TIMESTAMP";

/// Signs venue requests: RSA-PSS over SHA-256 of "<timestamp><METHOD><path>",
/// delivered via three headers. The path excludes any query string.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl RequestSigner {
    /// Accepts PKCS#1 ("BEGIN RSA PRIVATE KEY") or PKCS#8 ("BEGIN PRIVATE
    /// KEY") PEM text.
    pub fn from_pem(key_id: &str, pem: &str) -> Result<Self, VenueError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| VenueError::Auth(format!("unreadable private key: {}", e)))?;
        Ok(Self {
            key_id: key_id.to_string(),
            signing_key: SigningKey::new(key),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signature for one request. `path` must start at "/trade-api/...".
    pub fn sign(&self, timestamp_ms: i64, method: &str, path: &str) -> String {
        let message = format!("{}{}{}", timestamp_ms, method, path);
        let signature = self
            .signing_key
            .sign_with_rng(&mut rand::rngs::OsRng, message.as_bytes());
        BASE64.encode(signature.to_bytes())
    }

    /// The three auth headers for one request.
    pub fn headers(&self, method: &str, path: &str) -> [(&'static str, String); 3] {
        let ts = chrono::Utc::now().timestamp_millis();
        [
            (HEADER_KEY, self.key_id.clone()),
            (HEADER_SIGNATURE, self.sign(ts, method, path)),
            (HEADER_TIMESTAMP, ts.to_string()),
        ]
    }
}
