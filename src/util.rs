use rand::{distributions::Alphanumeric, Rng};

/// Generate a cryptographically random URL-safe string, used for the
/// anti-CSRF `state` parameter and PKCE verifiers.
pub fn random_url_safe(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
