use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,
    /// Leave empty to run the PKCE variant of the authorization-code flow.
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    // path to the credential database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Tokens are refreshed this many seconds before they expire.
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_secs: i64,

    /// Upper bound on positions per removal call (the remote caps at 100).
    #[serde(default = "default_max_removal_batch")]
    pub max_removal_batch: usize,

    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8888/callback".into()
}

fn default_scopes() -> Vec<String> {
    vec![
        "playlist-read-private",
        "playlist-modify-private",
        "playlist-modify-public",
        "user-read-private",
        "user-read-email",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spotify-playlist-dedup/credentials.db")
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spotify-playlist-dedup/logs")
}

fn default_refresh_margin() -> i64 {
    120
}

fn default_max_removal_batch() -> usize {
    100
}

fn default_page_limit() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            token_refresh_margin_secs: default_refresh_margin(),
            max_removal_batch: default_max_removal_batch(),
            page_limit: default_page_limit(),
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}
