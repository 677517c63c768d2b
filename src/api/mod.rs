pub mod mock;
pub mod pkce;
pub mod spotify;

use crate::error::ApiError;
use crate::models::{Page, TokenSet, UriPositions, UserProfile};

/// The minimal set of Web API operations the session manager and the
/// deduplicator need. Implementations: spotify::SpotifyWebApi and
/// mock::MockApi.
///
/// Bearer tokens are passed in explicitly; the session manager owns the
/// token lifecycle and refreshes before calling, so implementations do not
/// retry on 401 themselves.
#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Exchange an authorization code for tokens. `verifier` is the PKCE
    /// code verifier when the flow runs without a client secret.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<TokenSet, ApiError>;

    /// Obtain a fresh access token. The returned set carries the rotated
    /// refresh token when the server issued one, else the one passed in.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, ApiError>;

    /// Profile of the user the token belongs to.
    async fn current_user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    /// The playlist's current snapshot id.
    async fn playlist_snapshot_id(
        &self,
        access_token: &str,
        playlist_id: &str,
    ) -> Result<String, ApiError>;

    /// One page of playlist entries starting at `offset`.
    async fn playlist_items_page(
        &self,
        access_token: &str,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page, ApiError>;

    /// Remove specific occurrences (uri + positions) from a playlist.
    /// Positions are evaluated against `snapshot_id`, so batches computed
    /// from one scan stay valid across sequential calls.
    async fn remove_playlist_items(
        &self,
        access_token: &str,
        playlist_id: &str,
        batch: &[UriPositions],
        snapshot_id: &str,
    ) -> Result<(), ApiError>;
}
