//! OAuth state codec
//!
//! The state parameter does two jobs. It is the CSRF token correlating the
//! login redirect with the callback, and it carries caller parameters through
//! Discord, which echoes only `state` back. The raw state is a random token
//! kept in the session; the encoded state is an HS256 JWT of the caller's
//! parameters signed with the raw state, so only the session that started the
//! flow can verify it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::{SESSION_ENCODED_STATE, SESSION_RAW_STATE};
use crate::error::{Error, Result};
use crate::session::Session;

/// Caller parameters carried through the state parameter.
pub type StateParams = Map<String, Value>;

/// Generate a cryptographically random token.
///
/// 24 random bytes encoded as URL-safe base64 without padding: 32 characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Return the session's raw state, generating and storing one if absent.
///
/// Reuses an existing raw state so a retried login within the same session
/// still verifies against the callback of an earlier attempt.
pub fn generate_state(session: &mut dyn Session) -> String {
    if let Some(existing) = session.get_str(SESSION_RAW_STATE) {
        return existing.to_owned();
    }
    let raw = generate_token();
    session.set(SESSION_RAW_STATE, Value::String(raw.clone()));
    debug!("generated raw OAuth state");
    raw
}

/// Sign `params` with `raw_state` as the HMAC key.
pub fn encode(raw_state: &str, params: &StateParams) -> Result<String> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        params,
        &EncodingKey::from_secret(raw_state.as_bytes()),
    )
    .map_err(|e| Error::Configuration(format!("state parameters are not encodable: {e}")))
}

/// Verify an encoded state against `raw_state` and return the embedded params.
///
/// Registered claims (`exp`, `aud`, ...) are not interpreted: the params are
/// opaque caller data and must round-trip exactly.
pub fn decode(encoded_state: &str, raw_state: &str) -> Result<StateParams> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    jsonwebtoken::decode::<StateParams>(
        encoded_state,
        &DecodingKey::from_secret(raw_state.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| Error::InvalidState(e.to_string()))
}

/// Verify an inbound callback state against the session.
///
/// The session must hold the raw state and the encoded state issued by the
/// last login redirect, and the inbound value must be that encoded state.
/// Does not consume the encoded state; the callback handler does that once
/// the grant completed.
pub fn verify(session: &dyn Session, inbound_state: &str) -> Result<StateParams> {
    let raw_state = session
        .get_str(SESSION_RAW_STATE)
        .ok_or_else(|| Error::InvalidState("no authorization pending in this session".into()))?;
    let issued = session.get_str(SESSION_ENCODED_STATE).ok_or_else(|| {
        Error::InvalidState("state already consumed or never issued".into())
    })?;
    if issued != inbound_state {
        return Err(Error::InvalidState(
            "state does not match the one issued to this session".into(),
        ));
    }
    decode(inbound_state, raw_state)
}
