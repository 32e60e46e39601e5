use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_PREFIX: &str = "sk-";
const API_KEY_BYTES: usize = 16;
const ALGORITHM: &str = "HS256";

/// Claims carried by a session token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Principal id the token was issued for.
    pub subject: String,
    /// Absolute expiry in seconds since epoch. None = never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Issues and validates session tokens and API keys.
///
/// Session tokens are three base64url segments `header.payload.signature`,
/// signed with HMAC-SHA256 under the server secret. API keys are opaque
/// lookup secrets with no embedded structure.
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length")
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Produces a signed token for the principal. With a ttl, the token
    /// carries an absolute expiry claim.
    pub fn issue(&self, principal_id: &str, ttl: Option<Duration>) -> Result<String> {
        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let claims = TokenClaims {
            subject: principal_id.to_string(),
            exp: ttl.map(|d| (Utc::now() + d).timestamp()),
        };

        let encode = |value: &[u8]| URL_SAFE_NO_PAD.encode(value);
        let header_json =
            serde_json::to_vec(&header).map_err(|e| Error::Config(e.to_string()))?;
        let payload_json =
            serde_json::to_vec(&claims).map_err(|e| Error::Config(e.to_string()))?;

        let signing_input = format!("{}.{}", encode(&header_json), encode(&payload_json));
        let signature = encode(&self.sign(signing_input.as_bytes()));
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verifies signature and expiry and returns the claims. Signature
    /// comparison is constant-time.
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidTokenFormat);
        }

        let header_json = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|_| Error::InvalidTokenFormat)?;
        let header: TokenHeader =
            serde_json::from_slice(&header_json).map_err(|_| Error::InvalidTokenFormat)?;
        if header.alg != ALGORITHM {
            return Err(Error::InvalidTokenFormat);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| Error::InvalidTokenFormat)?;

        let signing_input_len = parts[0].len() + 1 + parts[1].len();
        let mut mac = self.mac();
        mac.update(token[..signing_input_len].as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::Unauthorized("invalid signature".to_string()))?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| Error::InvalidTokenFormat)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload_json).map_err(|_| Error::InvalidTokenFormat)?;

        if let Some(exp) = claims.exp {
            if exp <= Utc::now().timestamp() {
                return Err(Error::TokenExpired);
            }
        }

        Ok(claims)
    }

    /// Generates an opaque API key: `sk-` followed by 32 lowercase hex chars.
    #[must_use]
    pub fn issue_api_key(&self) -> String {
        let mut bytes = [0u8; API_KEY_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
    }

    /// Verifies the HMAC signature of an out-of-band payload (license and
    /// webhook style messages). The signature is standard base64. Any error
    /// during verification reads as a verification failure.
    #[must_use]
    pub fn verify_signed_payload(&self, payload: &str, signature: &str) -> bool {
        let Ok(signature) = STANDARD.decode(signature) else {
            return false;
        };

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}
