use crate::allowlist::AllowlistEntry;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const PLUGIN_ENV_RELATIVE: &str = ".agent-deck/env.sh";

/// Immutable per-session view of the connecting identity. Derived once at
/// connection accept and never mutated by UI actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvironment {
    pub user: String,
    pub allowed_exec: BTreeSet<String>,
    pub is_admin: bool,
    pub home_dir: PathBuf,
    pub plugin_env_path: PathBuf,
}

impl SessionEnvironment {
    pub fn derive(entry: &AllowlistEntry) -> Self {
        let home_dir = resolve_home_dir(&entry.user);
        let plugin_env_path = home_dir.join(PLUGIN_ENV_RELATIVE);
        Self {
            user: entry.user.clone(),
            allowed_exec: entry.allowed_exec.clone(),
            is_admin: entry.is_admin,
            home_dir,
            plugin_env_path,
        }
    }

    /// No-privilege defaults for a deployment-defined guest identity.
    pub fn unprivileged(user: impl Into<String>) -> Self {
        let user = user.into();
        let home_dir = resolve_home_dir(&user);
        let plugin_env_path = home_dir.join(PLUGIN_ENV_RELATIVE);
        Self {
            user,
            allowed_exec: BTreeSet::new(),
            is_admin: false,
            home_dir,
            plugin_env_path,
        }
    }

    pub fn can_exec(&self, agent: &str) -> bool {
        self.allowed_exec.contains(agent)
    }

    /// Environment variables communicated to every process the session
    /// spawns (shell commands and agent-runner invocations).
    pub fn process_env(&self) -> Vec<(String, String)> {
        let allowed = self
            .allowed_exec
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        vec![
            ("DECK_USER".to_string(), self.user.clone()),
            ("DECK_ADMIN".to_string(), self.is_admin.to_string()),
            ("DECK_ALLOWED".to_string(), allowed),
            (
                "DECK_PLUGIN_ENV".to_string(),
                self.plugin_env_path.to_string_lossy().to_string(),
            ),
            (
                "HOME".to_string(),
                self.home_dir.to_string_lossy().to_string(),
            ),
        ]
    }
}

fn resolve_home_dir(user: &str) -> PathBuf {
    if user == "root" {
        return PathBuf::from("/root");
    }
    passwd_home_dir(user).unwrap_or_else(|| PathBuf::from(format!("/home/{user}")))
}

fn passwd_home_dir(user: &str) -> Option<PathBuf> {
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    for line in passwd.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(user) {
            continue;
        }
        // name:passwd:uid:gid:gecos:home:shell
        let home = fields.nth(4)?;
        if home.is_empty() {
            return None;
        }
        let path = Path::new(home);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
    }
    None
}
