//! Gateway auth tokens — HS256 envelopes binding a client to a gateway
//!
//! A token carries `{sub: client_id, gw: gateway_id}` signed with the shared
//! secret. The gateway verifies the signature and that the audience matches
//! its own id; everything else (issuance services, rotation) is out of scope.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{LakeSyncError, Result};

/// Claims carried by a gateway auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Client id
    pub sub: String,
    /// Gateway id the token is scoped to
    pub gw: String,
    pub iat: usize,
    pub exp: usize,
}

/// Sign a token for `client_id` scoped to `gateway_id`
pub fn sign_token(
    secret: &str,
    client_id: &str,
    gateway_id: &str,
    ttl_hours: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: client_id.to_string(),
        gw: gateway_id.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(ttl_hours)).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Verify a token's signature and gateway audience; returns the client id
pub fn verify_token(secret: &str, token: &str, gateway_id: &str) -> Result<String> {
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| LakeSyncError::AuthFailed(e.to_string()))?;

    if data.claims.gw != gateway_id {
        return Err(LakeSyncError::AuthFailed(format!(
            "token audience '{}' does not match gateway '{gateway_id}'",
            data.claims.gw
        )));
    }
    Ok(data.claims.sub)
}
