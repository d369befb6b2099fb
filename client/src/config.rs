//! Persisted CLI configuration.
//!
//! Stored as JSON at `~/.vortex/config.json`. The tunnel core only ever
//! sees resolved values (server URL, endpoint, auth token); everything
//! here is plumbing around them, editable through the console.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// All domains that point at the relay. Primary = first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    /// Legacy single-domain form, still honored when `domains` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Shared secret sent with registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Saved static subdomains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
}

impl Config {
    /// Normalized domain list: `domains` when present, else the legacy field.
    pub fn domains(&self) -> Vec<String> {
        let from_list: Vec<String> = self
            .domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if !from_list.is_empty() {
            return from_list;
        }
        match &self.domain {
            Some(d) if !d.trim().is_empty() => vec![d.trim().to_string()],
            _ => Vec::new(),
        }
    }

    /// Primary domain, if any is configured.
    pub fn tunnel_domain(&self) -> Option<String> {
        self.domains().into_iter().next()
    }

    /// Websocket URL for the primary domain. A domain already carrying a
    /// `ws`/`wss` scheme passes through untouched.
    pub fn server_url(&self) -> Option<String> {
        let domain = self.tunnel_domain()?;
        if domain.starts_with("ws") {
            Some(domain)
        } else {
            Some(format!("wss://{}", domain))
        }
    }

    /// Apply a console merge-patch: only the fields present change.
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(domains) = patch.domains {
            self.domains = domains
                .iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty() && d.len() <= 253)
                .collect();
            self.domain = self.domains.first().cloned();
        } else if let Some(domain) = patch.domain {
            let d = domain.trim().to_string();
            if d.is_empty() {
                self.domain = None;
            } else {
                let mut list = self.domains();
                list.retain(|x| *x != d);
                list.insert(0, d.clone());
                self.domains = list;
                self.domain = Some(d);
            }
        }
        if let Some(token) = patch.auth_token {
            let t = token.trim().to_string();
            self.auth_token = if t.is_empty() { None } else { Some(t) };
        }
        if let Some(endpoints) = patch.endpoints {
            self.endpoints = endpoints
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty() && e.len() <= 63)
                .collect();
        }
    }
}

/// Console `PUT /api/config` body. Absent fields are left untouched; an
/// empty auth token clears the stored one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub domains: Option<Vec<String>>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
}

/// Default on-disk location: `~/.vortex/config.json`.
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vortex")
        .join("config.json")
}

/// Load the persisted config; a missing or unreadable file is an empty one.
pub fn load() -> Config {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

/// Persist the config, creating the directory on first save.
pub fn save(config: &Config) -> Result<()> {
    save_to(&config_path(), config)
}

pub fn save_to(path: &Path, config: &Config) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
    }
    let data = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, data)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    // The file can hold a shared secret; keep it owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(())
}
