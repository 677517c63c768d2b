use thiserror::Error;

/// Transport-level failure from the Spotify Web API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context} failed: {status} => {body}")]
    Status {
        context: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Failures of the authorization lifecycle. Everything here is surfaced to
/// the caller; only persisted-state decode failures at startup are
/// recovered locally (logged, start unauthenticated).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or invalid configuration: {0}")]
    Config(&'static str),

    /// Redirect URL had an unexpected scheme or shape. Shown to users as a
    /// generic "could not handle redirect".
    #[error("could not handle the redirect URL")]
    InvalidRedirect,

    /// Anti-CSRF check failed. Deliberately carries no detail.
    #[error("couldn't authorize with your account")]
    StateMismatch,

    /// The user explicitly declined the authorization request.
    #[error("you denied the authorization request")]
    AccessDenied,

    /// The authorization server reported an error other than a denial.
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(#[source] ApiError),

    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(#[source] ApiError),

    #[error("profile lookup failed: {0}")]
    ProfileFailed(#[source] ApiError),

    #[error("not authorized")]
    NotAuthorized,

    #[error("no account with id '{0}'")]
    AccountNotFound(String),

    #[error("credential store error: {0}")]
    Store(anyhow::Error),
}

/// Failures of the duplicate scan/removal cycle.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("couldn't check for duplicates: {0}")]
    Scan(#[source] ApiError),

    /// A removal batch failed. `batches_applied` counts the batches fully
    /// applied before the failure; no further batches were sent.
    #[error("couldn't remove duplicates ({batches_applied} batch(es) applied): {source}")]
    Removal {
        batches_applied: usize,
        #[source]
        source: ApiError,
    },

    #[error("a deduplication is already running")]
    Busy,

    #[error(transparent)]
    Auth(#[from] AuthError),
}
