use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of webhook signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Authentic,
    Rejected,
}

/// Verify that a webhook body was signed by the channel secret.
///
/// LINE sends `base64(HMAC-SHA256(channel_secret, raw_body))` in the
/// x-line-signature header. The comparison is byte-for-byte against the
/// header value; a missing header is always rejected.
pub fn verify(secret: &str, body: &[u8], header: Option<&str>) -> SignatureCheck {
    let Some(signature) = header else {
        return SignatureCheck::Rejected;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return SignatureCheck::Rejected,
    };
    mac.update(body);
    let expected = BASE64.encode(mac.finalize().into_bytes());

    if expected.as_bytes() == signature.as_bytes() {
        SignatureCheck::Authentic
    } else {
        SignatureCheck::Rejected
    }
}

/// Compute the signature for a body, as the platform would.
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}
