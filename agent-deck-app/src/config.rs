use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_bind_addr() -> String {
    "127.0.0.1:4022".to_string()
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

fn default_external_editor() -> String {
    std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string())
}

fn default_image_viewer() -> String {
    "xdg-open".to_string()
}

fn default_video_player() -> String {
    "mpv".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub allowlist_path: PathBuf,
    pub agents_dir: PathBuf,
    pub runner_path: PathBuf,
    pub queue_path: PathBuf,
    pub audit_log_path: PathBuf,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    #[serde(default = "default_external_editor")]
    pub external_editor: String,
    #[serde(default = "default_image_viewer")]
    pub image_viewer: String,
    #[serde(default = "default_video_player")]
    pub video_player: String,
}

impl Config {
    /// `$DECK_CONFIG` override, else `deck.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os("DECK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("deck.toml"))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.invoke_timeout_secs == 0 {
            bail!("invoke_timeout_secs must be positive");
        }
        if self.invoke_timeout_secs < 15 {
            tracing::warn!(
                timeout = self.invoke_timeout_secs,
                "invoke timeout below the recommended 15s floor"
            );
        }
        if !self.allowlist_path.is_file() {
            bail!(
                "allowlist file not found: {}",
                self.allowlist_path.display()
            );
        }
        if !self.agents_dir.is_dir() {
            bail!("agents directory not found: {}", self.agents_dir.display());
        }
        Ok(())
    }

    pub fn sample() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowlist_path: PathBuf::from("allowlist.toml"),
            agents_dir: PathBuf::from("agents"),
            runner_path: PathBuf::from("/usr/local/bin/agent-runner"),
            queue_path: PathBuf::from("state/requests.json"),
            audit_log_path: PathBuf::from("state/audit.log"),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            external_editor: default_external_editor(),
            image_viewer: default_image_viewer(),
            video_player: default_video_player(),
        }
    }
}
