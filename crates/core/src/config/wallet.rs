//! Owner wallet loading.
//!
//! The key comes from an environment variable when set, otherwise from a
//! JSON file holding an array of `{ "private_key": "0x..", "address": "0x.." }`
//! entries (first entry wins).

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use keeper_chain::SigningAccount;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use super::keeper::WalletSettings;

#[derive(Debug, Deserialize)]
struct WalletEntry {
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

/// Where the loaded key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletSource {
    Env(String),
    File(PathBuf),
}

/// The process-wide signing account.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub account: SigningAccount,
    pub source: WalletSource,
}

impl WalletConfig {
    pub fn address(&self) -> Address {
        self.account.address()
    }
}

/// Reads the owner wallet once at startup.
#[derive(Debug, Clone)]
pub struct WalletConfigStore {
    path: PathBuf,
    key_env: Option<String>,
}

impl WalletConfigStore {
    /// File-only store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_env: None,
        }
    }

    pub fn from_settings(settings: &WalletSettings) -> Self {
        Self {
            path: PathBuf::from(&settings.path),
            key_env: settings.private_key_env.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the signing key.
    pub fn load(&self) -> Result<WalletConfig> {
        if let Some(var) = &self.key_env {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    let account = SigningAccount::from_private_key(&key)
                        .with_context(|| format!("{} does not hold a valid private key", var))?;
                    info!(address = %account.address(), source = %var, "Wallet loaded from environment");
                    return Ok(WalletConfig {
                        account,
                        source: WalletSource::Env(var.clone()),
                    });
                }
            }
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read wallet file {}", self.path.display()))?;
        let account = parse_wallet_file(&content)
            .with_context(|| format!("Invalid wallet file {}", self.path.display()))?;

        info!(address = %account.address(), path = %self.path.display(), "Wallet loaded from file");
        Ok(WalletConfig {
            account,
            source: WalletSource::File(self.path.clone()),
        })
    }
}

fn parse_wallet_file(content: &str) -> Result<SigningAccount> {
    let entries: Vec<WalletEntry> =
        serde_json::from_str(content).context("expected a JSON array of wallet entries")?;
    let entry = match entries.into_iter().next() {
        Some(entry) => entry,
        None => bail!("wallet file has no entries"),
    };

    let key = match entry.private_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => bail!("first wallet entry has no private_key"),
    };
    let account = SigningAccount::from_private_key(&key)?;

    if let Some(declared) = entry.address.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        let declared = Address::from_str(declared)
            .with_context(|| format!("invalid address '{}'", declared))?;
        if declared != account.address() {
            bail!(
                "address {} does not match key (derives {})",
                declared,
                account.address()
            );
        }
    }

    Ok(account)
}
