use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::{Address, NetworkId};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub gateway_url: String,
    pub account: Option<String>,
    pub network_id: u64,
    pub sync_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8545".into(),
            account: None,
            network_id: 1337,
            sync_timeout_secs: 30,
        }
    }
}

/// Values accepted in `voting.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    gateway_url: Option<String>,
    account: Option<String>,
    network_id: Option<u64>,
    sync_timeout_secs: Option<u64>,
}

/// Defaults, then the config file if it exists, then environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file {}", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.gateway_url {
        settings.gateway_url = v;
    }
    if let Some(v) = file.account {
        settings.account = Some(v);
    }
    if let Some(v) = file.network_id {
        settings.network_id = v;
    }
    if let Some(v) = file.sync_timeout_secs {
        settings.sync_timeout_secs = v;
    }
    Ok(())
}

pub(crate) fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("VOTING_GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Some(v) = lookup("APP__GATEWAY_URL") {
        settings.gateway_url = v;
    }

    if let Some(v) = lookup("VOTING_ACCOUNT") {
        settings.account = Some(v);
    }
    if let Some(v) = lookup("APP__ACCOUNT") {
        settings.account = Some(v);
    }

    if let Some(v) = lookup("APP__NETWORK_ID") {
        settings.network_id = v
            .parse()
            .with_context(|| format!("APP__NETWORK_ID must be an integer, got '{v}'"))?;
    }
    if let Some(v) = lookup("APP__SYNC_TIMEOUT_SECS") {
        settings.sync_timeout_secs = v
            .parse()
            .with_context(|| format!("APP__SYNC_TIMEOUT_SECS must be an integer, got '{v}'"))?;
    }
    Ok(())
}

impl Settings {
    pub fn account(&self) -> anyhow::Result<Address> {
        let Some(raw) = self.account.as_deref() else {
            bail!("no account configured; pass --account or set VOTING_ACCOUNT");
        };
        raw.parse::<Address>()
            .with_context(|| format!("invalid account '{raw}'"))
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.network_id)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.gateway_url)
            .with_context(|| format!("invalid gateway url '{}'", self.gateway_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("gateway url must use http or https, got '{}'", url.scheme());
        }
        if self.sync_timeout_secs == 0 {
            bail!("sync timeout must be at least one second");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
