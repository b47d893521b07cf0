use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

const KEY_TYPE: &str = "ed25519";

#[derive(Error, Debug)]
pub enum AllowlistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Duplicate user: {0}")]
    DuplicateUser(String),
    #[error("Invalid public key for user {user}: {reason}")]
    InvalidKey { user: String, reason: String },
}

/// One authorizable identity: the agents it may execute and whether it
/// holds administrator rights. `public_key` uses the authorized-key text
/// form `ed25519 <base64>`.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowlistEntry {
    pub user: String,
    pub public_key: String,
    #[serde(default)]
    pub allowed_exec: BTreeSet<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl AllowlistEntry {
    pub fn verifying_key(&self) -> Result<VerifyingKey, AllowlistError> {
        let invalid = |reason: &str| AllowlistError::InvalidKey {
            user: self.user.clone(),
            reason: reason.to_string(),
        };

        let mut parts = self.public_key.split_whitespace();
        let key_type = parts.next().ok_or_else(|| invalid("empty key field"))?;
        if key_type != KEY_TYPE {
            return Err(invalid(&format!("unsupported key type '{key_type}'")));
        }
        let encoded = parts.next().ok_or_else(|| invalid("missing key material"))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| invalid(&format!("bad base64: {e}")))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| invalid("key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(&e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct AllowlistFile {
    #[serde(default)]
    users: Vec<AllowlistEntry>,
}

/// Read-only authorization table, loaded once per listener process.
pub struct Allowlist {
    entries: HashMap<String, AllowlistEntry>,
}

impl Allowlist {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AllowlistError> {
        let content = std::fs::read_to_string(path)?;
        let file: AllowlistFile = toml::from_str(&content)?;
        Self::from_entries(file.users)
    }

    pub fn from_entries(users: Vec<AllowlistEntry>) -> Result<Self, AllowlistError> {
        let mut entries = HashMap::with_capacity(users.len());
        for entry in users {
            // Validate the key eagerly so a bad allowlist fails at startup,
            // not at first connection.
            entry.verifying_key()?;
            if entries.contains_key(&entry.user) {
                return Err(AllowlistError::DuplicateUser(entry.user));
            }
            entries.insert(entry.user.clone(), entry);
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, user: &str) -> Option<&AllowlistEntry> {
        self.entries.get(user)
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.lookup(user).map(|e| e.is_admin).unwrap_or(false)
    }

    pub fn can_exec(&self, user: &str, agent: &str) -> bool {
        self.lookup(user)
            .map(|e| e.allowed_exec.contains(agent))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use ed25519_dalek::SigningKey;

    fn key_field(seed: u8) -> String {
        let signing = SigningKey::from_bytes(&[seed; 32]);
        format!(
            "ed25519 {}",
            BASE64.encode(signing.verifying_key().as_bytes())
        )
    }

    fn entry(user: &str, seed: u8, allowed: &[&str], admin: bool) -> AllowlistEntry {
        AllowlistEntry {
            user: user.to_string(),
            public_key: key_field(seed),
            allowed_exec: allowed.iter().map(|s| s.to_string()).collect(),
            is_admin: admin,
        }
    }

    #[test]
    fn test_load_from_toml() {
        let content = format!(
            r#"
[[users]]
user = "alice"
public_key = "{}"
allowed_exec = ["deploy"]

[[users]]
user = "bob"
public_key = "{}"
is_admin = true
"#,
            key_field(1),
            key_field(2)
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.toml");
        std::fs::write(&path, content).unwrap();

        let allowlist = Allowlist::load(&path).unwrap();
        assert_eq!(allowlist.len(), 2);
        assert!(allowlist.can_exec("alice", "deploy"));
        assert!(!allowlist.can_exec("alice", "shutdown-cluster"));
        assert!(!allowlist.is_admin("alice"));
        assert!(allowlist.is_admin("bob"));
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let users = vec![entry("alice", 1, &[], false), entry("alice", 2, &[], false)];
        assert!(matches!(
            Allowlist::from_entries(users),
            Err(AllowlistError::DuplicateUser(_))
        ));
    }

    #[test]
    fn test_bad_key_rejected_at_load() {
        let mut bad = entry("mallory", 1, &[], false);
        bad.public_key = "ed25519 not-base64!!".to_string();
        assert!(matches!(
            Allowlist::from_entries(vec![bad]),
            Err(AllowlistError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_unsupported_key_type_rejected() {
        let mut bad = entry("mallory", 1, &[], false);
        bad.public_key = format!("rsa {}", BASE64.encode([0u8; 32]));
        assert!(matches!(
            Allowlist::from_entries(vec![bad]),
            Err(AllowlistError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_unknown_user_has_no_rights() {
        let allowlist = Allowlist::from_entries(vec![]).unwrap();
        assert!(allowlist.lookup("ghost").is_none());
        assert!(!allowlist.can_exec("ghost", "deploy"));
        assert!(!allowlist.is_admin("ghost"));
    }

    #[test]
    fn test_verifying_key_roundtrip() {
        let signing = SigningKey::from_bytes(&[7; 32]);
        let e = entry("carol", 7, &[], false);
        assert_eq!(e.verifying_key().unwrap(), signing.verifying_key());
    }
}
