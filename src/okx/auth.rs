// =============================================================================
// OKX request signing — HMAC-SHA256, base64-encoded, with passphrase
// =============================================================================
//
// OKX signs `timestamp + method + requestPath + body` (body empty for GET)
// with the account secret, base64-encodes the digest, and sends it alongside
// the API key and passphrase as `OK-ACCESS-*` headers. The timestamp must be
// an ISO-8601 string with millisecond precision, not a UNIX epoch integer —
// a detail easy to get wrong coming from Binance-style signing.
// =============================================================================

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Holds the three credential pieces needed to sign and label a request.
/// Never implements `Debug`/`Display` with real values — see the redacting
/// impl on [`crate::okx::client::OkxClient`].
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// ISO-8601 millisecond timestamp, e.g. `2026-07-28T10:15:30.123Z`.
    pub fn timestamp_now() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    /// Base64(HMAC-SHA256(secret, timestamp + method + request_path + body)).
    pub fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> String {
        let prehash = format!("{timestamp}{method}{request_path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(prehash.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Build the full `OK-ACCESS-*` header set for one request, plus the
    /// demo-trading flag header when `demo` is true.
    pub fn headers(&self, method: &str, request_path: &str, body: &str, demo: bool) -> HeaderMap {
        let timestamp = Self::timestamp_now();
        let signature = self.sign(&timestamp, method, request_path, body);

        let mut headers = HeaderMap::new();
        headers.insert(
            "OK-ACCESS-KEY",
            HeaderValue::from_str(&self.api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "OK-ACCESS-SIGN",
            HeaderValue::from_str(&signature).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "OK-ACCESS-TIMESTAMP",
            HeaderValue::from_str(&timestamp).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "OK-ACCESS-PASSPHRASE",
            HeaderValue::from_str(&self.passphrase).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        if demo {
            headers.insert(
                HeaderName::from_static("x-simulated-trading"),
                HeaderValue::from_static("1"),
            );
        }
        headers
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_fixed_inputs() {
        let creds = Credentials::new("key", "secret", "phrase");
        let a = creds.sign("2026-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        let b = creds.sign("2026-01-01T00:00:00.000Z", "GET", "/api/v5/account/balance", "");
        assert_eq!(a, b);
    }

    #[test]
    fn sign_changes_with_body() {
        let creds = Credentials::new("key", "secret", "phrase");
        let a = creds.sign("2026-01-01T00:00:00.000Z", "POST", "/api/v5/trade/order", "{}");
        let b = creds.sign("2026-01-01T00:00:00.000Z", "POST", "/api/v5/trade/order", "{\"a\":1}");
        assert_ne!(a, b);
    }

    #[test]
    fn debug_redacts_all_fields() {
        let creds = Credentials::new("mykey", "mysecret", "myphrase");
        let text = format!("{creds:?}");
        assert!(!text.contains("mykey"));
        assert!(!text.contains("mysecret"));
        assert!(!text.contains("myphrase"));
    }
}
