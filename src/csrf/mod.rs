//! Anti-forgery tokens bound to a session.
//!
//! A token is `hex(nonce) || hex(mac)` where the MAC covers a domain tag, the
//! session binding and the nonce. Every issue picks a fresh nonce, and any
//! token minted for a binding keeps verifying for that binding.

use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const DOMAIN_TAG: &[u8] = b"csrf";

/// Header clients echo the token back in
pub const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Clone)]
pub struct CsrfIssuer {
    mac: HmacSha256,
}

impl CsrfIssuer {
    pub fn new(secret_key: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret_key.as_bytes())?,
        })
    }

    /// Binding for a session token. Requests without a session bind to the
    /// empty string.
    pub fn binding_for(session_token: Option<&str>) -> String {
        match session_token {
            Some(token) => hex::encode(Sha256::digest(token.as_bytes())),
            None => String::new(),
        }
    }

    pub fn issue(&self, binding: &str) -> String {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let tag = self.sign(binding, &nonce).finalize().into_bytes();
        format!("{}{}", hex::encode(nonce), hex::encode(tag))
    }

    pub fn verify(&self, binding: &str, token: &str) -> bool {
        if token.len() != 2 * (NONCE_LEN + MAC_LEN) || !token.is_ascii() {
            return false;
        }
        let (nonce_hex, mac_hex) = token.split_at(2 * NONCE_LEN);

        let (nonce, expected) = match (hex::decode(nonce_hex), hex::decode(mac_hex)) {
            (Ok(nonce), Ok(mac)) => (nonce, mac),
            _ => return false,
        };

        // Constant-time comparison
        self.sign(binding, &nonce).verify_slice(&expected).is_ok()
    }

    fn sign(&self, binding: &str, nonce: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(DOMAIN_TAG);
        mac.update(binding.as_bytes());
        mac.update(nonce);
        mac
    }
}

impl std::fmt::Debug for CsrfIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfIssuer").finish_non_exhaustive()
    }
}
