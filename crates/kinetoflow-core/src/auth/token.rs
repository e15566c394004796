//! HS256 bearer tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::models::{Role, User};

type HmacSha256 = Hmac<Sha256>;

/// Token errors.
#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Token issued by {0}")]
    WrongIssuer(String),

    #[error("Token expired")]
    Expired,

    #[error("Signing key rejected: {0}")]
    Key(String),

    #[error("Claims encoding failed: {0}")]
    Encoding(String),
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's email
    pub sub: String,
    pub user_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Issues and verifies bearer tokens with a shared secret.
pub struct TokenSigner {
    secret: Vec<u8>,
    issuer: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Issue a token for `user`, valid from `now` for the configured TTL.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user.email.clone(),
            user_id: user.id.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let claims_json =
            serde_json::to_vec(claims).map_err(|e| TokenError::Encoding(e.to_string()))?;

        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.mac(&message)?.finalize().into_bytes();

        Ok(format!("{}.{}", message, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify signature, issuer and expiry; return the claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        self.mac(&format!("{}.{}", header, claims))?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let header: Header = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(TokenError::Malformed)?;
        if header.alg != "HS256" {
            return Err(TokenError::Malformed);
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(claims)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(TokenError::Malformed)?;

        if claims.iss != self.issuer {
            return Err(TokenError::WrongIssuer(claims.iss));
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, message: &str) -> Result<HmacSha256, TokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::Key(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(mac)
    }
}
