//! GitHub `x-hub-signature-256` handling.
//!
//! Push webhooks sign the raw request body with HMAC-SHA256 under a shared
//! secret and deliver the digest as `sha256=<hex>`. Verification recomputes
//! the digest over the exact bytes received and compares in constant time.

use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the signature on push deliveries.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Algorithm tag prefixing the hex digest in the header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the raw HMAC-SHA256 digest for the payload under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("invalid HMAC key: {e}"))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Render a digest as a header value (`sha256=<hex>`).
pub fn format_signature(digest: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hex::encode(digest))
}

fn parse_signature(signature: &str) -> Result<Vec<u8>> {
    let value = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| anyhow!("missing {SIGNATURE_PREFIX} tag"))?;
    hex::decode(value).map_err(|e| anyhow!("invalid signature hex: {e}"))
}

/// Verifies a push webhook signature. Returns `true` when the payload matches
/// the provided header value.
///
/// The digest comparison goes through `subtle::ConstantTimeEq`, so a
/// mismatch in the first byte costs the same as one in the last.
pub fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> Result<bool> {
    let provided = parse_signature(signature)?;
    let expected = compute_signature(secret, body)?;
    Ok(provided.len() == expected.len() && provided.ct_eq(&expected).into())
}
