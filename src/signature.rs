//! HMAC-SHA256 request signatures.
//!
//! Signatures travel as `sha256=<hex digest>` (the `X-Signature-256` header of
//! the webhook source). Verification never says *why* it failed: a missing
//! header, bad hex and a wrong digest are indistinguishable to the caller.

use crate::{ConnectorError, ConnectorResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "x-signature-256";

const PREFIX: &str = "sha256=";

fn mac_for(secret: &[u8]) -> ConnectorResult<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| ConnectorError::config(format!("invalid signing secret: {}", e)))
}

/// Sign `body` with `secret`, producing `sha256=<hex>`
pub fn sign(secret: &[u8], body: &[u8]) -> ConnectorResult<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Check `header` against the HMAC-SHA256 of `body`
///
/// The `sha256=` prefix is optional. The digest comparison is constant-time.
pub fn verify(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let digest = header.trim().strip_prefix(PREFIX).unwrap_or(header.trim());
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
