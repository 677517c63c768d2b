use super::SpotifyApi;
use crate::error::ApiError;
use crate::models::{ItemKind, Page, PlaylistEntry, TokenSet, UriPositions, UserProfile};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::json;
use std::env;

/// Default authorization endpoint base. May be overridden by the
/// SPOTIFY_AUTH_BASE env var (useful for tests).
pub fn auth_base() -> String {
    env::var("SPOTIFY_AUTH_BASE").unwrap_or_else(|_| "https://accounts.spotify.com".into())
}

/// Default Web API base, including the v1 path. May be overridden by the
/// SPOTIFY_API_BASE env var.
pub fn api_base() -> String {
    env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| "https://api.spotify.com/v1".into())
}

/// Spotify Web API client backed by reqwest. Stateless with respect to
/// tokens: the session manager passes the bearer token into every call.
pub struct SpotifyWebApi {
    client: Client,
    client_id: String,
    client_secret: Option<String>,
    auth_base: String,
    api_base: String,
}

impl SpotifyWebApi {
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self::with_bases(client_id, client_secret, auth_base(), api_base())
    }

    /// Explicit endpoint bases, for tests that run against a local mock
    /// server without touching process-global env vars.
    pub fn with_bases(
        client_id: String,
        client_secret: Option<String>,
        auth_base: String,
        api_base: String,
    ) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            auth_base,
            api_base,
        }
    }

    fn basic_auth_header(&self, secret: &str) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, secret))
        )
    }

    /// POST to the token endpoint and decode the common token response
    /// shape. `fallback_refresh` covers servers that omit the refresh
    /// token on rotation.
    async fn token_request(
        &self,
        context: &'static str,
        params: &[(&str, &str)],
        fallback_refresh: Option<&str>,
    ) -> Result<TokenSet, ApiError> {
        let url = format!("{}/api/token", self.auth_base);
        let mut req = self.client.post(&url).form(params);
        if let Some(secret) = &self.client_secret {
            req = req.header(AUTHORIZATION, self.basic_auth_header(secret));
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                context,
                status,
                body,
            });
        }
        let j: serde_json::Value = resp.json().await?;
        let access_token = j["access_token"]
            .as_str()
            .ok_or_else(|| ApiError::Decode("no access_token in token response".into()))?
            .to_string();
        let refresh_token = j["refresh_token"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| fallback_refresh.map(|s| s.to_string()))
            .ok_or_else(|| ApiError::Decode("no refresh_token in token response".into()))?;
        let expires_in = j["expires_in"].as_i64().unwrap_or(3600);
        Ok(TokenSet {
            access_token,
            refresh_token,
            expires_at: Utc::now().timestamp() + expires_in,
        })
    }

    async fn get_json(
        &self,
        context: &'static str,
        access_token: &str,
        url: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                context,
                status,
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

/// Decode one slot of the playlist items array. A null `track` means the
/// remote could not resolve the entry; the slot is kept as None because it
/// still occupies a playlist position.
fn decode_entry(item: &serde_json::Value) -> Option<PlaylistEntry> {
    let track = &item["track"];
    if track.is_null() {
        return None;
    }
    let kind = match track["type"].as_str() {
        Some("episode") => ItemKind::Episode,
        _ => ItemKind::Track,
    };
    let by = match kind {
        ItemKind::Track => track["artists"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|a| a["name"].as_str())
            .map(|s| s.to_string()),
        ItemKind::Episode => track["show"]["name"].as_str().map(|s| s.to_string()),
    };
    Some(PlaylistEntry {
        uri: track["uri"].as_str().map(|s| s.to_string()),
        kind,
        name: track["name"].as_str().unwrap_or("").to_string(),
        by,
        duration_ms: track["duration_ms"].as_u64(),
        is_local: item["is_local"].as_bool()
            .or_else(|| track["is_local"].as_bool())
            .unwrap_or(false),
    })
}

#[async_trait]
impl SpotifyApi for SpotifyWebApi {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<TokenSet, ApiError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        // PKCE exchanges authenticate with client_id + verifier instead of
        // the Basic header.
        if let Some(v) = verifier {
            params.push(("client_id", &self.client_id));
            params.push(("code_verifier", v));
        }
        self.token_request("token exchange", &params, None).await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        debug!("refreshing access token");
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if self.client_secret.is_none() {
            params.push(("client_id", &self.client_id));
        }
        self.token_request("token refresh", &params, Some(refresh_token))
            .await
    }

    async fn current_user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let url = format!("{}/me", self.api_base);
        let j = self.get_json("fetch profile", access_token, &url).await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| ApiError::Decode("no id in profile response".into()))?
            .to_string();
        Ok(UserProfile {
            id,
            display_name: j["display_name"].as_str().map(|s| s.to_string()),
        })
    }

    async fn playlist_snapshot_id(
        &self,
        access_token: &str,
        playlist_id: &str,
    ) -> Result<String, ApiError> {
        let url = format!(
            "{}/playlists/{}?fields=snapshot_id",
            self.api_base,
            urlencoding::encode(playlist_id)
        );
        let j = self.get_json("fetch playlist", access_token, &url).await?;
        j["snapshot_id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::Decode("no snapshot_id in playlist response".into()))
    }

    async fn playlist_items_page(
        &self,
        access_token: &str,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page, ApiError> {
        let url = format!(
            "{}/playlists/{}/tracks?offset={}&limit={}&additional_types=track,episode",
            self.api_base,
            urlencoding::encode(playlist_id),
            offset,
            limit
        );
        let j = self
            .get_json("list playlist items", access_token, &url)
            .await?;
        let items = j["items"]
            .as_array()
            .map(|arr| arr.iter().map(decode_entry).collect())
            .unwrap_or_default();
        let page_offset = j["offset"].as_u64().unwrap_or(offset as u64) as usize;
        let total = j["total"].as_u64().unwrap_or(0) as usize;
        debug!("received playlist page at offset {}", page_offset);
        Ok(Page {
            items,
            offset: page_offset,
            total,
        })
    }

    async fn remove_playlist_items(
        &self,
        access_token: &str,
        playlist_id: &str,
        batch: &[UriPositions],
        snapshot_id: &str,
    ) -> Result<(), ApiError> {
        let tracks: Vec<serde_json::Value> = batch
            .iter()
            .map(|b| json!({ "uri": b.uri, "positions": b.positions }))
            .collect();
        // snapshot_id pins the positions to the scan-time snapshot, which
        // is what keeps sequential batches valid after earlier removals.
        let body = json!({ "tracks": tracks, "snapshot_id": snapshot_id });
        let url = format!(
            "{}/playlists/{}/tracks",
            self.api_base,
            urlencoding::encode(playlist_id)
        );
        let resp = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("remove playlist items failed: {}", status);
            return Err(ApiError::Status {
                context: "remove playlist items",
                status,
                body,
            });
        }
        Ok(())
    }
}
