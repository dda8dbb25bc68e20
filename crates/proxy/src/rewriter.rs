//! The location-response rewriter: the only write-path in the core.
//!
//! Downgrades subsequent traffic from HTTPS to HTTP by textually replacing the scheme inside
//! a single decrypted response body, then re-encoding it bit-for-bit compatible with the
//! wire format except for that substitution.

const MARKER: &str = "server_url_list";

/// Applies the `https:` -> `http:` (and `HTTPS:` -> `HTTP:`) substitution to a decoded
/// location-service response body.
///
/// Returns `None` if `plaintext` does not contain the marker substring, meaning the caller
/// MUST forward the original response unmodified (§8 invariant 6: idempotence on non-match).
/// Returns `Some(rewritten)` otherwise, still as UTF-8 plaintext; the caller is responsible
/// for re-encoding (deflate -> encrypt -> base64) and updating `Content-Length`.
pub fn rewrite_location_plaintext(plaintext: &str) -> Option<String> {
    if !plaintext.contains(MARKER) {
        return None;
    }
    Some(plaintext.replace("https:", "http:").replace("HTTPS:", "HTTP:"))
}

/// Re-encodes `rewritten` plaintext back into the wire format (deflate -> encrypt -> base64),
/// the write-path counterpart to [`swarpf_codec::decode_payload`].
pub fn encode_rewritten(rewritten: &str) -> Result<Vec<u8>, swarpf_codec::CodecError> {
    swarpf_codec::encode_payload(rewritten.as_bytes(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_non_matching_body_untouched() {
        assert_eq!(rewrite_location_plaintext(r#"{"ret_code":0}"#), None);
    }

    #[test]
    fn rewrites_both_cases_of_the_scheme() {
        let input = r#"{"server_url_list":["https://a.example","HTTPS://b.example"]}"#;
        let rewritten = rewrite_location_plaintext(input).expect("should match");
        assert_eq!(
            rewritten,
            r#"{"server_url_list":["http://a.example","HTTP://b.example"]}"#
        );
    }

    #[test]
    fn preserves_everything_else() {
        let input = r#"{"server_url_list":["https://a.example"],"other":"no scheme here"}"#;
        let rewritten = rewrite_location_plaintext(input).expect("should match");
        assert!(rewritten.contains("http://a.example"));
        assert!(rewritten.contains(r#""other":"no scheme here""#));
    }

    #[test]
    fn encode_rewritten_round_trips_through_the_codec() {
        let input = r#"{"server_url_list":["https://a.example"]}"#;
        let rewritten = rewrite_location_plaintext(input).expect("should match");
        let encoded = encode_rewritten(&rewritten).expect("encode");
        let decoded = swarpf_codec::decode_payload(&encoded, true).expect("decode");
        assert_eq!(decoded, rewritten.into_bytes());
    }
}
