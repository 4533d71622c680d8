//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::Credentials;

pub const DEFAULT_LISTEN_PORT: u16 = 8888;
pub const DEFAULT_PLAYER: &str = "ffplay";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server_url: String,
    // Saved login, written by `login --remember`
    #[serde(default)]
    pub saved_username: String,
    #[serde(default)]
    pub saved_password: String,
    #[serde(default)]
    pub auto_login: bool,
    // Proxy
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default = "default_true")]
    pub use_proxy: bool,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    // Playback
    #[serde(default)]
    pub external_player: String,
    #[serde(default)]
    pub user_agent: String,
    // EPG day boundaries, hours from UTC; None = system time zone
    #[serde(default)]
    pub epg_time_offset: Option<f32>,
}

fn default_true() -> bool { true }
fn default_listen_port() -> u16 { DEFAULT_LISTEN_PORT }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            saved_username: String::new(),
            saved_password: String::new(),
            auto_login: false,
            proxy_url: None,
            use_proxy: true,
            listen_port: DEFAULT_LISTEN_PORT,
            external_player: String::new(),
            user_agent: String::new(),
            epg_time_offset: None,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("xtream_viewer");
        path.push("config.json");
        path
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Missing or unreadable files give the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            debug!("no config at {}, using defaults", path.display());
            return Self::default();
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring corrupt config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    /// Saved login, if `login --remember` stored a complete one.
    pub fn saved_credentials(&self) -> Option<Credentials> {
        if !self.auto_login {
            return None;
        }
        let credentials = Credentials::new(&self.server_url, &self.saved_username, &self.saved_password);
        credentials.is_complete().then_some(credentials)
    }

    pub fn remember(&mut self, credentials: &Credentials) {
        self.server_url = credentials.server_url.clone();
        self.saved_username = credentials.username.clone();
        self.saved_password = credentials.password.clone();
        self.auto_login = true;
    }

    /// Server URL is kept so the next login only needs a username and password.
    pub fn forget(&mut self) {
        self.saved_username.clear();
        self.saved_password.clear();
        self.auto_login = false;
    }

    pub fn player(&self) -> &str {
        let player = self.external_player.trim();
        if player.is_empty() {
            DEFAULT_PLAYER
        } else {
            player
        }
    }
}
