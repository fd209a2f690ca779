//! Signature verification for both inbound event streams, using HMAC-SHA1.
//!
//! Two schemes share the same MAC but differ in key and header format:
//!
//! - The provider webhook signs with a single static secret and sends
//!   `X-Hub-Signature: sha1=<hex>`.
//! - The worker callback signs with the target repository's rotating secret
//!   and sends `HookTest-Secure-X: <hex>` (no prefix).
//!
//! Verification is the first step in request processing; invalid signatures
//! are rejected before parsing. Comparison is constant-time via the HMAC
//! library's `verify_slice`.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Parses a provider signature header (e.g., "sha1=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// Never panics.
///
/// # Examples
///
/// ```
/// use doc_hook::webhooks::signature::parse_provider_header;
///
/// // Valid header
/// assert!(parse_provider_header("sha1=abcd1234").is_some());
///
/// // Invalid: missing prefix
/// assert!(parse_provider_header("abcd1234").is_none());
///
/// // Invalid: wrong algorithm
/// assert!(parse_provider_header("sha256=abcd1234").is_none());
///
/// // Invalid: bad hex
/// assert!(parse_provider_header("sha1=xyz").is_none());
/// ```
pub fn parse_provider_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha1=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA1 signature of a payload using the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a provider-style header value (`sha1=<hex>`).
pub fn format_provider_header(signature: &[u8]) -> String {
    format!("sha1={}", hex::encode(signature))
}

/// Formats a signature as a worker-style header value (bare hex).
pub fn format_worker_header(signature: &[u8]) -> String {
    hex::encode(signature)
}

/// Verifies a provider webhook signature against the payload and the static
/// webhook secret.
///
/// The header value must be of the form `sha1=<hex>`. Returns `true` only for
/// a valid signature; malformed headers return `false` rather than erroring.
///
/// # Examples
///
/// ```
/// use doc_hook::webhooks::signature::{
///     compute_signature, format_provider_header, verify_provider_signature,
/// };
///
/// let secret = b"webhook-secret";
/// let header = format_provider_header(&compute_signature(b"payload", secret));
///
/// assert!(verify_provider_signature(b"payload", &header, secret));
/// assert!(!verify_provider_signature(b"tampered", &header, secret));
/// ```
pub fn verify_provider_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected = match parse_provider_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };
    verify_raw(payload, &expected, secret)
}

/// Verifies a worker callback signature against the payload and the
/// repository's rotating secret.
///
/// The header value is bare hex with no algorithm prefix.
pub fn verify_worker_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected = match hex::decode(signature_header) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    verify_raw(payload, &expected, secret)
}

fn verify_raw(payload: &[u8], expected: &[u8], secret: &[u8]) -> bool {
    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    // Constant-time comparison via the HMAC library
    mac.verify_slice(expected).is_ok()
}
