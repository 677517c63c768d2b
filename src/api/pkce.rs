// PKCE helpers for the S256 challenge method, used when the flow runs
// without a client secret.
use base64::{engine::general_purpose, Engine as _};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

pub fn code_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(96)
        .map(char::from)
        .collect()
}

pub fn challenge_s256(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_url_safe_and_deterministic() {
        let v = code_verifier();
        assert_eq!(v.len(), 96);
        let c1 = challenge_s256(&v);
        let c2 = challenge_s256(&v);
        assert_eq!(c1, c2);
        // base64url without padding, 32-byte digest -> 43 chars
        assert_eq!(c1.len(), 43);
        assert!(!c1.contains('='));
        assert!(!c1.contains('+'));
        assert!(!c1.contains('/'));
    }
}
