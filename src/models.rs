use serde::{Deserialize, Serialize};

/// One complete set of OAuth tokens. A credential either has all three
/// fields or none of them, which is why they live together in one struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

impl TokenSet {
    /// Seconds until expiry; negative once expired.
    pub fn seconds_until_expiry(&self) -> i64 {
        self.expires_at - chrono::Utc::now().timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub scopes: Vec<String>,
    #[serde(default)]
    pub tokens: Option<TokenSet>,
}

/// A Spotify user together with the credential that authenticates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub display_name: Option<String>,
    pub credential: Credential,
}

/// The persisted account collection: all known accounts plus which one is
/// currently active. `current`, when set, names an existing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSet {
    pub accounts: Vec<Account>,
    pub current: Option<String>,
}

impl AccountSet {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.user_id == user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.user_id == user_id)
    }

    /// Insert or replace the account with the same user id.
    pub fn upsert(&mut self, account: Account) {
        match self.get_mut(&account.user_id) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    /// Remove an account; clears the current pointer if it referenced it.
    pub fn remove(&mut self, user_id: &str) {
        self.accounts.retain(|a| a.user_id != user_id);
        if self.current.as_deref() == Some(user_id) {
            self.current = None;
        }
    }

    pub fn current_account(&self) -> Option<&Account> {
        self.current.as_deref().and_then(|id| self.get(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Track,
    Episode,
}

/// A playlist entry as seen during a duplicate scan. `by` is the first
/// listed artist for tracks and the parent show for episodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub uri: Option<String>,
    pub kind: ItemKind,
    pub name: String,
    pub by: Option<String>,
    pub duration_ms: Option<u64>,
    pub is_local: bool,
}

/// One page of playlist entries. Entries the remote could not resolve come
/// back as `None` but still occupy a playlist position, so the slot is kept.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Option<PlaylistEntry>>,
    pub offset: usize,
    pub total: usize,
}

/// A later occurrence of an already-seen item, by absolute playlist
/// position (counted across pages, against the scan-time snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub uri: String,
    pub position: usize,
}

/// One uri with every position it should be removed at, as the removal
/// endpoint wants it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UriPositions {
    pub uri: String,
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalSummary {
    pub removed: usize,
    pub batches_applied: usize,
}
