//! Link token issuance and verification.
//!
//! Wire format: `base64url(header) "." base64url(payload) "." base64url(mac)`,
//! unpadded. The header is fixed; the payload is the JSON form of
//! [`LinkClaims`]; the MAC is HMAC-SHA256 over the first two encoded
//! segments joined by a dot.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use satchel_core::config::MIN_LINK_SECRET_LEN;
use satchel_core::{LinkClaims, LinkPurpose};
use sha2::Sha256;
use std::fmt;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// The only header this service emits or accepts.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"SCL"}"#;

/// A freshly minted token and the claims it carries.
#[derive(Clone, Debug)]
pub struct IssuedLink {
    pub token: String,
    pub claims: LinkClaims,
}

/// Issues and verifies link tokens with a server-held secret.
#[derive(Clone)]
pub struct LinkSigner {
    mac: HmacSha256,
    header_segment: String,
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSigner").finish_non_exhaustive()
    }
}

impl LinkSigner {
    /// Create a signer. Secrets shorter than 32 bytes are rejected.
    pub fn new(secret: impl AsRef<[u8]>) -> SignerResult<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_LINK_SECRET_LEN {
            return Err(SignerError::WeakSecret {
                min: MIN_LINK_SECRET_LEN,
            });
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| SignerError::WeakSecret {
            min: MIN_LINK_SECRET_LEN,
        })?;
        Ok(Self {
            mac,
            header_segment: URL_SAFE_NO_PAD.encode(HEADER_JSON),
        })
    }

    /// Issue a token valid for `ttl_secs` from now.
    pub fn issue(
        &self,
        resource: impl Into<String>,
        purpose: LinkPurpose,
        ttl_secs: u64,
    ) -> SignerResult<IssuedLink> {
        self.issue_at(
            resource,
            purpose,
            ttl_secs,
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    /// Issue a token valid for `ttl_secs` from `now` (Unix seconds).
    pub fn issue_at(
        &self,
        resource: impl Into<String>,
        purpose: LinkPurpose,
        ttl_secs: u64,
        now: i64,
    ) -> SignerResult<IssuedLink> {
        if ttl_secs == 0 {
            return Err(SignerError::InvalidTtl("ttl must be > 0".to_string()));
        }
        let exp = i64::try_from(ttl_secs)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| SignerError::InvalidTtl(format!("ttl {ttl_secs} overflows expiry")))?;

        let claims = LinkClaims {
            resource: resource.into(),
            purpose,
            exp,
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| SignerError::Malformed(format!("cannot encode claims: {e}")))?;

        let signing_input = format!("{}.{}", self.header_segment, URL_SAFE_NO_PAD.encode(payload));
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        Ok(IssuedLink {
            token: format!("{signing_input}.{signature}"),
            claims,
        })
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> SignerResult<LinkClaims> {
        self.verify_at(token, OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Verify a token against `now` (Unix seconds).
    ///
    /// Checks run in a fixed order and the first failure is reported:
    ///
    /// 1. structure: three non-empty segments and the expected header
    ///    ([`SignerError::Malformed`]);
    /// 2. signature over `header.payload` ([`SignerError::InvalidSignature`]);
    /// 3. claims decoding ([`SignerError::Malformed`]);
    /// 4. expiry ([`SignerError::Expired`]).
    ///
    /// Expiry is only reported for tokens this signer issued, so a forged
    /// token that is also past its `exp` yields `InvalidSignature`. A token
    /// whose `exp` equals `now` is already expired.
    pub fn verify_at(&self, token: &str, now: i64) -> SignerResult<LinkClaims> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(SignerError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(SignerError::Malformed("empty segment".to_string()));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|e| SignerError::Malformed(format!("header: {e}")))?;
        if header_bytes != HEADER_JSON.as_bytes() {
            return Err(SignerError::Malformed("unsupported header".to_string()));
        }
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| SignerError::Malformed(format!("payload: {e}")))?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignerError::InvalidSignature)?;
        let mut mac = self.mac.clone();
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignerError::InvalidSignature)?;

        let claims: LinkClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|e| SignerError::Malformed(format!("claims: {e}")))?;

        if claims.exp <= now {
            return Err(SignerError::Expired { exp: claims.exp });
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::PERMANENT_LINK_TTL_SECS;

    const SECRET: &str = "0123456789abcdef0123456789abcdef-test";
    const NOW: i64 = 1_700_000_000;

    fn signer() -> LinkSigner {
        LinkSigner::new(SECRET).unwrap()
    }

    #[test]
    fn test_issue_then_verify_returns_same_claims() {
        let signer = signer();
        for (resource, purpose, ttl) in [
            ("files/alice/1-abcdefgh-a.txt", LinkPurpose::FileDownload, 1),
            ("groups/x/1-abcdefgh-b", LinkPurpose::FileDownload, 3600),
            (
                "7d3f0a52-4b43-4c39-9d8d-7c1c0d0c5d55",
                LinkPurpose::GroupDownload,
                86_400,
            ),
            ("files/a/ünïcode", LinkPurpose::FileDownload, PERMANENT_LINK_TTL_SECS),
        ] {
            let issued = signer.issue_at(resource, purpose, ttl, NOW).unwrap();
            let claims = signer.verify_at(&issued.token, NOW).unwrap();
            assert_eq!(claims, issued.claims);
            assert_eq!(claims.resource, resource);
            assert_eq!(claims.purpose, purpose);
            assert_eq!(claims.exp, NOW + ttl as i64);
        }
    }

    #[test]
    fn test_token_is_url_safe_without_padding() {
        let issued = signer()
            .issue_at("files/a/b?c=d&e", LinkPurpose::FileDownload, 60, NOW)
            .unwrap();
        assert_eq!(issued.token.split('.').count(), 3);
        assert!(
            issued
                .token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        );
    }

    #[test]
    fn test_every_signature_bit_flip_is_rejected() {
        let signer = signer();
        let issued = signer
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 60, NOW)
            .unwrap();
        let (signing_input, sig) = issued.token.rsplit_once('.').unwrap();
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig).unwrap();

        for bit in 0..sig_bytes.len() * 8 {
            let mut tampered = sig_bytes.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(&tampered));
            assert_eq!(
                signer.verify_at(&token, NOW),
                Err(SignerError::InvalidSignature),
                "bit {bit} flip was accepted"
            );
        }
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let signer = signer();
        let issued = signer
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 60, NOW)
            .unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();
        let forged = LinkClaims {
            resource: "files/bob/k".to_string(),
            ..issued.claims.clone()
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let token = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(
            signer.verify_at(&token, NOW),
            Err(SignerError::InvalidSignature)
        );
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let issued = signer()
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 60, NOW)
            .unwrap();
        let other = LinkSigner::new("another-secret-another-secret-another").unwrap();
        assert_eq!(
            other.verify_at(&issued.token, NOW),
            Err(SignerError::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_token_with_valid_signature() {
        let signer = signer();
        let issued = signer
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 10, NOW - 100)
            .unwrap();
        assert_eq!(
            signer.verify_at(&issued.token, NOW),
            Err(SignerError::Expired { exp: NOW - 90 })
        );
    }

    #[test]
    fn test_forged_expired_token_reports_bad_signature() {
        let issued = signer()
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 10, NOW - 100)
            .unwrap();
        let other = LinkSigner::new("another-secret-another-secret-another").unwrap();
        assert_eq!(
            other.verify_at(&issued.token, NOW),
            Err(SignerError::InvalidSignature)
        );
    }

    #[test]
    fn test_expiry_boundary_fails_closed() {
        let signer = signer();
        let issued = signer
            .issue_at("files/alice/k", LinkPurpose::FileDownload, 30, NOW)
            .unwrap();
        assert!(signer.verify_at(&issued.token, NOW + 29).is_ok());
        assert_eq!(
            signer.verify_at(&issued.token, NOW + 30),
            Err(SignerError::Expired { exp: NOW + 30 })
        );
    }

    #[test]
    fn test_permanent_ttl_does_not_overflow() {
        let issued = signer()
            .issue_at("g", LinkPurpose::GroupDownload, PERMANENT_LINK_TTL_SECS, NOW)
            .unwrap();
        assert!(issued.claims.exp > NOW + 3_000_000_000);
    }

    #[test]
    fn test_invalid_ttls() {
        let signer = signer();
        assert!(matches!(
            signer.issue_at("k", LinkPurpose::FileDownload, 0, NOW),
            Err(SignerError::InvalidTtl(_))
        ));
        assert!(matches!(
            signer.issue_at("k", LinkPurpose::FileDownload, u64::MAX, NOW),
            Err(SignerError::InvalidTtl(_))
        ));
        assert!(matches!(
            signer.issue_at("k", LinkPurpose::FileDownload, i64::MAX as u64, NOW),
            Err(SignerError::InvalidTtl(_))
        ));
    }

    #[test]
    fn test_malformed_structures() {
        let signer = signer();
        for token in ["", "abc", "a.b", "a.b.c.d", "..", "a..c", "!!.b.c"] {
            assert!(
                matches!(signer.verify_at(token, NOW), Err(SignerError::Malformed(_))),
                "{token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_foreign_header_is_malformed() {
        let signer = signer();
        let issued = signer
            .issue_at("k", LinkPurpose::FileDownload, 60, NOW)
            .unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"SCL"}"#);
        let token = format!("{header}.{}.{}", parts[1], parts[2]);
        assert!(matches!(
            signer.verify_at(&token, NOW),
            Err(SignerError::Malformed(_))
        ));
    }

    #[test]
    fn test_signed_unknown_purpose_is_malformed() {
        let signer = signer();
        let header = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let payload =
            URL_SAFE_NO_PAD.encode(r#"{"ref":"files/a/b","purpose":"file-upload","exp":4102444800}"#);
        let input = format!("{header}.{payload}");
        let sig = URL_SAFE_NO_PAD.encode(signer.sign(input.as_bytes()));
        assert!(matches!(
            signer.verify_at(&format!("{input}.{sig}"), NOW),
            Err(SignerError::Malformed(_))
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            LinkSigner::new("too-short").unwrap_err(),
            SignerError::WeakSecret { min: 32 }
        );
    }
}
