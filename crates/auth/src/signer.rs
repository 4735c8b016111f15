//! HMAC-SHA256 request signing for the BitMEX API.
//!
//! The signed message is `VERB + path[?query] + expires + body`, where the
//! body is compact JSON (no whitespace) or empty when there is none.

use crate::credentials::ApiCredentials;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request signer for authenticated BitMEX calls.
pub struct RequestSigner<'a> {
    credentials: &'a ApiCredentials,
}

impl<'a> RequestSigner<'a> {
    /// Create a new request signer with the given credentials.
    pub fn new(credentials: &'a ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Sign a raw message and return the lowercase hex HMAC-SHA256.
    pub fn sign(&self, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign a REST or handshake request.
    ///
    /// # Arguments
    /// * `verb` - HTTP verb, uppercased before signing
    /// * `path` - Path relative to the host, e.g. `/api/v1/order`
    /// * `query` - Optional query string without the leading `?`
    /// * `expires` - Unix expiry in seconds, shared with the `api-expires` header
    /// * `body` - Compact JSON body, if any
    pub fn sign_request(
        &self,
        verb: &str,
        path: &str,
        query: Option<&str>,
        expires: i64,
        body: Option<&str>,
    ) -> String {
        self.sign(&signature_payload(verb, path, query, expires, body))
    }

    /// Arguments for the websocket `authKeyExpires` operation.
    ///
    /// Signs `GET/realtime{expires}` exactly as the exchange expects.
    pub fn websocket_auth(&self, expires: i64) -> (String, i64, String) {
        let signature = self.sign_request("GET", "/realtime", None, expires, None);
        (self.credentials.api_key().to_string(), expires, signature)
    }
}

/// Build the exact byte sequence that gets signed.
pub fn signature_payload(
    verb: &str,
    path: &str,
    query: Option<&str>,
    expires: i64,
    body: Option<&str>,
) -> String {
    let mut message = verb.to_uppercase();
    message.push_str(path);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        message.push('?');
        message.push_str(q);
    }
    message.push_str(&expires.to_string());
    message.push_str(body.unwrap_or(""));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC_SECRET: &str = "chNOOS4KvNXR_Xq4k4c9qsfoKWvnDecLATCRlcBwyKDYnWgO";

    fn doc_credentials() -> ApiCredentials {
        ApiCredentials::new("LAqUlngMIQkIUjXMUreyu3qn".into(), DOC_SECRET.into())
    }

    #[test]
    fn test_sign_get_known_vector() {
        // Published example from the exchange's API key documentation
        let creds = doc_credentials();
        let signer = RequestSigner::new(&creds);

        let signature = signer.sign_request("GET", "/api/v1/instrument", None, 1518064236, None);

        assert_eq!(
            signature,
            "c7682d435d0cfe87c16098df34ef2eb5a549d4c5a3c2b1f0f77b8af73423bf00"
        );
    }

    #[test]
    fn test_sign_post_with_body_known_vector() {
        let creds = doc_credentials();
        let signer = RequestSigner::new(&creds);

        let body = r#"{"symbol":"XBTM15","price":219.0,"clOrdID":"mm_bitmex_1a/oemUeQ4CAJZgP3fjHsA","orderQty":98}"#;
        let signature = signer.sign_request("POST", "/api/v1/order", None, 1518064238, Some(body));

        assert_eq!(
            signature,
            "1749cd2ccae4aa49048ae09f0b95110cee706e0944e6a14ad0b3a8cb45bd336b"
        );
    }

    #[test]
    fn test_realtime_handshake_golden() {
        let creds = doc_credentials();
        let signer = RequestSigner::new(&creds);

        let (key, expires, signature) = signer.websocket_auth(1700000000);

        assert_eq!(key, "LAqUlngMIQkIUjXMUreyu3qn");
        assert_eq!(expires, 1700000000);
        assert_eq!(
            signature,
            "c6fdcdab9c196d1b3663a85c1f82709fc6a9a348d61962f06bc25f273d2ecee3"
        );
    }

    #[test]
    fn test_payload_uppercases_verb_and_appends_query() {
        let payload = signature_payload("get", "/api/v1/order", Some("symbol=XBTUSD"), 10, None);
        assert_eq!(payload, "GET/api/v1/order?symbol=XBTUSD10");
    }

    #[test]
    fn test_payload_skips_empty_query() {
        let payload = signature_payload("DELETE", "/api/v1/order", Some(""), 10, Some("{}"));
        assert_eq!(payload, "DELETE/api/v1/order10{}");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let creds = ApiCredentials::new("key".into(), "secret".into());
        let signer = RequestSigner::new(&creds);

        assert_eq!(signer.sign("abc"), signer.sign("abc"));
        assert_ne!(signer.sign("abc"), signer.sign("abd"));
    }
}
