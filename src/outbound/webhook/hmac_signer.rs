use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Random bytes in a generated endpoint secret.
pub const GENERATED_SECRET_BYTES: usize = 32;

/// HMAC-SHA256 signer keyed by an endpoint's shared secret.
///
/// The signature covers the exact bytes that go on the wire, so the receiver
/// can recompute it from the raw request body.
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
        };
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the signature and compare it in constant time.
    pub fn verify(&self, payload: &[u8], claimed_signature: &str) -> bool {
        let expected = self.sign(payload);
        let claimed = claimed_signature.trim().to_ascii_lowercase();
        expected.as_bytes().ct_eq(claimed.as_bytes()).into()
    }
}

/// Sign `payload` with `secret`.
pub fn sign(payload: &[u8], secret: &str) -> String {
    HmacSigner::new(secret).sign(payload)
}

/// Check `claimed_signature` (bare hex digest) against `payload` and `secret`.
pub fn verify(payload: &[u8], claimed_signature: &str, secret: &str) -> bool {
    HmacSigner::new(secret).verify(payload, claimed_signature)
}

/// Header value in the prefixed `sha256=<hex>` form.
pub fn format_signature_header(signature: &str) -> String {
    format!("{SIGNATURE_PREFIX}{signature}")
}

/// Verify the raw value of an inbound signature header.
///
/// Accepts both `sha256=<hex>` and a bare hex digest.
pub fn verify_signature_header(payload: &[u8], header: &str, secret: &str) -> bool {
    match parse_signature_header(header) {
        Ok(signature) => verify(payload, &signature, secret),
        Err(_) => false,
    }
}

/// Fresh endpoint secret: 32 bytes from the OS CSPRNG, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Extract the hex digest from a signature header value.
pub fn parse_signature_header(header: &str) -> Result<String, String> {
    let header = header.trim();
    let digest = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);

    if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("Invalid signature header format: {header}"));
    }
    Ok(digest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_then_verify_header() {
        let payload = br#"{"event":"customer.created"}"#;
        let header = format_signature_header(&sign(payload, "whsec_test_secret_key_12345"));

        assert!(header.starts_with("sha256="));
        assert!(verify_signature_header(payload, &header, "whsec_test_secret_key_12345"));
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();

        assert_eq!(a.len(), GENERATED_SECRET_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    const SECRET: &str = "whsec_test_secret_key_12345";

    #[test]
    fn test_sign_and_verify() {
        let payload = br#"{"event":"document.created","data":{},"timestamp":"2024-02-10T14:10:00Z"}"#;
        let signature = sign(payload, SECRET);
        assert!(verify(payload, &signature, SECRET));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let first = sign(b"payload", SECRET);
        let second = sign(b"payload", SECRET);
        assert_eq!(first, second);
    }

    #[test]
    fn test_signature_is_lowercase_hex() {
        let signature = sign(b"test", SECRET);
        assert_eq!(signature.len(), 64);
        assert!(
            signature
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_single_byte_change_in_payload_fails() {
        let payload = br#"{"amount":100}"#.to_vec();
        let signature = sign(&payload, SECRET);

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, &signature, SECRET), "byte {i} flipped");
        }
    }

    #[test]
    fn test_single_byte_change_in_secret_fails() {
        let payload = b"payload";
        let signature = sign(payload, SECRET);

        let mut secret = SECRET.as_bytes().to_vec();
        secret[0] ^= 0x01;
        let secret = String::from_utf8(secret).expect("ascii secret");

        assert!(!verify(payload, &signature, &secret));
    }

    #[test]
    fn test_verify_rejects_truncated_signature() {
        let signature = sign(b"payload", SECRET);
        assert!(!verify(b"payload", &signature[..32], SECRET));
        assert!(!verify(b"payload", "", SECRET));
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        let signature = sign(b"payload", SECRET).to_uppercase();
        assert!(verify(b"payload", &signature, SECRET));
    }

    #[test]
    fn test_parse_signature_header() -> Result<(), String> {
        assert_eq!(parse_signature_header("sha256=abcdef123456")?, "abcdef123456");
        assert_eq!(parse_signature_header("abcdef123456")?, "abcdef123456");
        Ok(())
    }

    #[test]
    fn test_parse_invalid_signature_header() {
        assert!(parse_signature_header("md5=abcdef123456").is_err());
        assert!(parse_signature_header("sha256=").is_err());
    }

    #[test]
    fn test_verify_signature_header() {
        let payload = b"inbound body";
        let header = format!("sha256={}", sign(payload, SECRET));

        assert!(verify_signature_header(payload, &header, SECRET));
        assert!(verify_signature_header(payload, &sign(payload, SECRET), SECRET));
        assert!(!verify_signature_header(payload, &header, "other-secret"));
        assert!(!verify_signature_header(payload, "garbage", SECRET));
    }
}
