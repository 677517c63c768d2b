use super::SpotifyApi;
use crate::error::ApiError;
use crate::models::{Page, TokenSet, UriPositions, UserProfile};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::info;

/// A scriptable in-memory API used by tests and credential-less dry runs.
/// Counters record how often each operation was hit so tests can assert
/// on exact call counts.
pub struct MockApi {
    /// Pages returned by `playlist_items_page`, matched by offset.
    pub pages: Vec<Page>,
    /// Fail the page fetch at this offset with a scripted server error.
    pub fail_page_at_offset: Option<usize>,
    /// Fail the Nth removal call (zero-based) with a scripted server error.
    pub fail_removal_at_batch: Option<usize>,
    /// Fail every refresh call.
    pub fail_refresh: bool,
    /// Lifetime stamped onto issued tokens.
    pub expires_in: i64,
    /// Snapshot id reported for every playlist.
    pub snapshot: String,
    /// Profiles handed out per token exchange, in order. When exhausted, a
    /// fixed fallback profile is returned.
    pub profiles: Mutex<Vec<UserProfile>>,

    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub removal_calls: AtomicUsize,
    /// Every removal that went through: (snapshot_id, batch).
    pub removed: Mutex<Vec<(String, Vec<UriPositions>)>>,

    pub token_counter: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            fail_page_at_offset: None,
            fail_removal_at_batch: None,
            fail_refresh: false,
            expires_in: 3600,
            snapshot: "mock-snapshot-1".into(),
            profiles: Mutex::new(Vec::new()),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            removal_calls: AtomicUsize::new(0),
            removed: Mutex::new(Vec::new()),
            token_counter: AtomicUsize::new(0),
        }
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_tokens(&self) -> TokenSet {
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TokenSet {
            access_token: format!("mock-access-{}", n),
            refresh_token: format!("mock-refresh-{}", n),
            expires_at: Utc::now().timestamp() + self.expires_in,
        }
    }

    fn server_error(context: &'static str) -> ApiError {
        ApiError::Status {
            context,
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "scripted failure".into(),
        }
    }
}

#[async_trait]
impl SpotifyApi for MockApi {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        _verifier: Option<&str>,
    ) -> Result<TokenSet, ApiError> {
        info!("MockApi: exchanging code {}", code);
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.issue_tokens())
    }

    async fn refresh_tokens(&self, _refresh_token: &str) -> Result<TokenSet, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(Self::server_error("token refresh"));
        }
        Ok(self.issue_tokens())
    }

    async fn current_user_profile(&self, _access_token: &str) -> Result<UserProfile, ApiError> {
        let mut profiles = self.profiles.lock().unwrap();
        if profiles.is_empty() {
            Ok(UserProfile {
                id: "mockuser".into(),
                display_name: Some("Mock User".into()),
            })
        } else {
            Ok(profiles.remove(0))
        }
    }

    async fn playlist_snapshot_id(
        &self,
        _access_token: &str,
        _playlist_id: &str,
    ) -> Result<String, ApiError> {
        Ok(self.snapshot.clone())
    }

    async fn playlist_items_page(
        &self,
        _access_token: &str,
        _playlist_id: &str,
        offset: usize,
        _limit: usize,
    ) -> Result<Page, ApiError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_page_at_offset == Some(offset) {
            return Err(Self::server_error("list playlist items"));
        }
        Ok(self
            .pages
            .iter()
            .find(|p| p.offset == offset)
            .cloned()
            .unwrap_or(Page {
                items: Vec::new(),
                offset,
                total: self.pages.iter().map(|p| p.items.len()).sum(),
            }))
    }

    async fn remove_playlist_items(
        &self,
        _access_token: &str,
        playlist_id: &str,
        batch: &[UriPositions],
        snapshot_id: &str,
    ) -> Result<(), ApiError> {
        let idx = self.removal_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_removal_at_batch == Some(idx) {
            return Err(Self::server_error("remove playlist items"));
        }
        info!(
            "MockApi: removing {} uris from {} (batch {})",
            batch.len(),
            playlist_id,
            idx
        );
        self.removed
            .lock()
            .unwrap()
            .push((snapshot_id.to_string(), batch.to_vec()));
        Ok(())
    }
}
