use crate::api::{pkce, spotify, SpotifyApi};
use crate::config::Config;
use crate::error::AuthError;
use crate::models::{Account, AccountSet, Credential, TokenSet};
use crate::store::{CredentialStore, ACCOUNTS_KEY};
use crate::util;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

const STATE_LEN: usize = 64;

/// Owns the OAuth authorization-code lifecycle for a collection of
/// accounts: building authorization URLs, consuming redirects, persisting
/// and restoring credentials, auto-refreshing access tokens, switching
/// between accounts and deauthorizing.
///
/// Every mutation is serialized through one lock, so persistence writes and
/// in-memory state can never diverge, and a deauthorize can never interleave
/// with a refresh on the same credential.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    client_id: String,
    redirect_uri: Url,
    scopes: Vec<String>,
    refresh_margin_secs: i64,
    use_pkce: bool,
    api: Arc<dyn SpotifyApi>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<SessionState>,
}

struct SessionState {
    accounts: AccountSet,
    pending: Option<PendingAuthorization>,
    refresh_task: Option<JoinHandle<()>>,
    /// Bumped by deauthorize; a fired timer re-checks it under the lock and
    /// discards itself when stale.
    epoch: u64,
}

/// The single-use half of an in-flight authorization round trip.
struct PendingAuthorization {
    state: String,
    verifier: Option<String>,
}

impl SessionManager {
    /// Build a manager from configuration, restoring any persisted account
    /// collection. Missing configuration is a typed error, left to the
    /// caller to treat as fatal or not. A corrupt persisted collection is
    /// logged and treated as "no prior session".
    pub fn new(
        cfg: &Config,
        api: Arc<dyn SpotifyApi>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        if cfg.client_id.trim().is_empty() {
            return Err(AuthError::Config("client_id"));
        }
        let redirect_uri =
            Url::parse(&cfg.redirect_uri).map_err(|_| AuthError::Config("redirect_uri"))?;

        let accounts = match store.get(ACCOUNTS_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice::<AccountSet>(&bytes) {
                Ok(mut set) => {
                    // The current pointer must reference an existing entry.
                    if let Some(cur) = set.current.clone() {
                        if set.get(&cur).is_none() {
                            set.current = None;
                        }
                    }
                    info!("restored {} stored account(s)", set.accounts.len());
                    set
                }
                Err(e) => {
                    warn!("could not decode stored accounts, starting unauthenticated: {}", e);
                    AccountSet::default()
                }
            },
            Ok(None) => AccountSet::default(),
            Err(e) => {
                warn!("could not read stored accounts, starting unauthenticated: {}", e);
                AccountSet::default()
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                client_id: cfg.client_id.clone(),
                redirect_uri,
                scopes: cfg.scopes.clone(),
                refresh_margin_secs: cfg.token_refresh_margin_secs,
                use_pkce: cfg.client_secret.trim().is_empty(),
                api,
                store,
                state: Mutex::new(SessionState {
                    accounts,
                    pending: None,
                    refresh_task: None,
                    epoch: 0,
                }),
            }),
        })
    }

    /// Build the authorization URL for the user to open in a browser.
    /// Generates a fresh anti-CSRF `state` value, invalidating any earlier
    /// in-flight authorization.
    pub async fn begin_authorization(&self) -> Result<Url, AuthError> {
        let state_value = util::random_url_safe(STATE_LEN);
        let verifier = self.inner.use_pkce.then(pkce::code_verifier);

        let mut url = Url::parse(&format!("{}/authorize", spotify::auth_base()))
            .map_err(|_| AuthError::Config("authorization endpoint"))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.inner.client_id)
                .append_pair("redirect_uri", self.inner.redirect_uri.as_str())
                .append_pair("state", &state_value)
                .append_pair("scope", &self.inner.scopes.join(" "))
                .append_pair("show_dialog", "true");
            if let Some(v) = &verifier {
                q.append_pair("code_challenge_method", "S256")
                    .append_pair("code_challenge", &pkce::challenge_s256(v));
            }
        }

        let mut st = self.inner.state.lock().await;
        st.pending = Some(PendingAuthorization {
            state: state_value,
            verifier,
        });
        Ok(url)
    }

    /// Consume the redirect URL the authorization server sent the user
    /// back with. Validates the callback scheme and the `state` value
    /// before touching the network; the pending state is single-use, so
    /// feeding the same redirect in twice fails the second time.
    pub async fn complete_authorization(&self, redirect: &str) -> Result<Account, AuthError> {
        let url = Url::parse(redirect).map_err(|_| AuthError::InvalidRedirect)?;
        if url.scheme() != self.inner.redirect_uri.scheme() {
            return Err(AuthError::InvalidRedirect);
        }

        let mut code = None;
        let mut state_param = None;
        let mut error_param = None;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "code" => code = Some(v.into_owned()),
                "state" => state_param = Some(v.into_owned()),
                "error" => error_param = Some(v.into_owned()),
                _ => {}
            }
        }

        let mut st = self.inner.state.lock().await;

        let matches = match &st.pending {
            Some(p) => state_param.as_deref() == Some(p.state.as_str()),
            None => false,
        };
        if !matches {
            return Err(AuthError::StateMismatch);
        }

        if let Some(err) = error_param {
            // The round trip is over either way; drop the pending state so
            // the redirect cannot be replayed.
            st.pending = None;
            return Err(if err == "access_denied" {
                AuthError::AccessDenied
            } else {
                AuthError::AuthorizationFailed(err)
            });
        }
        let Some(code) = code else {
            st.pending = None;
            return Err(AuthError::InvalidRedirect);
        };

        let pending = st.pending.take().ok_or(AuthError::StateMismatch)?;
        let tokens = self
            .inner
            .api
            .exchange_code(
                &code,
                self.inner.redirect_uri.as_str(),
                pending.verifier.as_deref(),
            )
            .await
            .map_err(AuthError::TokenExchangeFailed)?;

        let profile = self
            .inner
            .api
            .current_user_profile(&tokens.access_token)
            .await
            .map_err(AuthError::ProfileFailed)?;

        let account = Account {
            user_id: profile.id.clone(),
            display_name: profile.display_name,
            credential: Credential {
                scopes: self.inner.scopes.clone(),
                tokens: Some(tokens),
            },
        };
        st.accounts.upsert(account.clone());
        st.accounts.current = Some(profile.id);
        persist_accounts(&self.inner, &st.accounts).await?;
        schedule_refresh_locked(&self.inner, &mut st);
        info!("authorized account {}", account.user_id);
        Ok(account)
    }

    /// Refresh the current account's tokens. With `force` false this is a
    /// no-op (no network call) while the access token is still more than
    /// the safety margin away from expiry. A failed refresh leaves the
    /// existing tokens in place; they stay usable until they actually
    /// expire.
    pub async fn refresh_if_needed(&self, force: bool) -> Result<TokenSet, AuthError> {
        let mut st = self.inner.state.lock().await;
        refresh_locked(&self.inner, &mut st, force).await
    }

    /// Arm the one-shot refresh timer for the current account. Called
    /// internally after every expiry change; exposed for callers that
    /// restore a session and want it kept fresh without further calls.
    pub async fn schedule_auto_refresh(&self) {
        let mut st = self.inner.state.lock().await;
        schedule_refresh_locked(&self.inner, &mut st);
    }

    /// The current account's access token. Does not refresh; pair with
    /// `refresh_if_needed(false)` before making API calls.
    pub async fn current_access_token(&self) -> Result<String, AuthError> {
        let st = self.inner.state.lock().await;
        st.accounts
            .current_account()
            .and_then(|a| a.credential.tokens.as_ref())
            .map(|t| t.access_token.clone())
            .ok_or(AuthError::NotAuthorized)
    }

    /// Make another stored account the active one.
    pub async fn switch_account(&self, user_id: &str) -> Result<Account, AuthError> {
        let mut st = self.inner.state.lock().await;
        let account = st
            .accounts
            .get(user_id)
            .cloned()
            .ok_or_else(|| AuthError::AccountNotFound(user_id.to_string()))?;
        st.accounts.current = Some(user_id.to_string());
        persist_accounts(&self.inner, &st.accounts).await?;
        schedule_refresh_locked(&self.inner, &mut st);
        Ok(account)
    }

    /// Remove the current account's authorization: cancel the refresh
    /// timer, drop the account from the collection, clear the pointer and
    /// update persistent storage (removing the key once no accounts
    /// remain).
    pub async fn deauthorize(&self) -> Result<(), AuthError> {
        let mut st = self.inner.state.lock().await;
        if let Some(task) = st.refresh_task.take() {
            task.abort();
        }
        st.epoch += 1;
        st.pending = None;
        if let Some(current) = st.accounts.current.clone() {
            st.accounts.remove(&current);
            info!("deauthorized account {}", current);
        }
        if st.accounts.is_empty() {
            delete_persisted(&self.inner).await?;
        } else {
            persist_accounts(&self.inner, &st.accounts).await?;
        }
        Ok(())
    }

    pub async fn is_authorized(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.accounts
            .current_account()
            .map(|a| a.credential.tokens.is_some())
            .unwrap_or(false)
    }

    pub async fn accounts(&self) -> AccountSet {
        self.inner.state.lock().await.accounts.clone()
    }

    pub async fn current_account(&self) -> Option<Account> {
        self.inner.state.lock().await.accounts.current_account().cloned()
    }
}

async fn refresh_locked(
    inner: &Arc<Inner>,
    st: &mut SessionState,
    force: bool,
) -> Result<TokenSet, AuthError> {
    let account = st.accounts.current_account().ok_or(AuthError::NotAuthorized)?;
    let tokens = account
        .credential
        .tokens
        .clone()
        .ok_or(AuthError::NotAuthorized)?;
    if !force && tokens.seconds_until_expiry() > inner.refresh_margin_secs {
        return Ok(tokens);
    }
    let user_id = account.user_id.clone();

    let refreshed = inner
        .api
        .refresh_tokens(&tokens.refresh_token)
        .await
        .map_err(AuthError::TokenRefreshFailed)?;

    // Copy the new tokens back into the owning account by id lookup.
    if let Some(entry) = st.accounts.get_mut(&user_id) {
        entry.credential.tokens = Some(refreshed.clone());
    }
    persist_accounts(inner, &st.accounts).await?;
    schedule_refresh_locked(inner, st);
    Ok(refreshed)
}

fn schedule_refresh_locked(inner: &Arc<Inner>, st: &mut SessionState) {
    if let Some(task) = st.refresh_task.take() {
        task.abort();
    }
    let Some(tokens) = st
        .accounts
        .current_account()
        .and_then(|a| a.credential.tokens.as_ref())
    else {
        return;
    };
    let wait = (tokens.seconds_until_expiry() - inner.refresh_margin_secs).max(0) as u64;
    let task = auto_refresh_task(Arc::clone(inner), st.epoch, Duration::from_secs(wait));
    st.refresh_task = Some(tokio::spawn(task));
}

/// Boxed so the schedule -> fire -> refresh -> reschedule cycle does not
/// produce an infinitely recursive future type.
fn auto_refresh_task(
    inner: Arc<Inner>,
    epoch: u64,
    wait: Duration,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::time::sleep(wait).await;
        let mut st = inner.state.lock().await;
        if st.epoch != epoch {
            return;
        }
        match refresh_locked(&inner, &mut st, true).await {
            Ok(_) => info!("auto-refreshed access token"),
            Err(e) => warn!("scheduled token refresh failed: {}", e),
        }
    })
}

async fn persist_accounts(inner: &Inner, set: &AccountSet) -> Result<(), AuthError> {
    let bytes = serde_json::to_vec(set).map_err(|e| AuthError::Store(anyhow::anyhow!(e)))?;
    let store = inner.store.clone();
    tokio::task::spawn_blocking(move || store.set(ACCOUNTS_KEY, &bytes))
        .await
        .map_err(|e| AuthError::Store(anyhow::anyhow!(e)))?
        .map_err(AuthError::Store)
}

async fn delete_persisted(inner: &Inner) -> Result<(), AuthError> {
    let store = inner.store.clone();
    tokio::task::spawn_blocking(move || store.delete(ACCOUNTS_KEY))
        .await
        .map_err(|e| AuthError::Store(anyhow::anyhow!(e)))?
        .map_err(AuthError::Store)
}
