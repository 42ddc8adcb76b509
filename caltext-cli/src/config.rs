//! Configuration loading and validation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use caltext_core::time;

/// Raw configuration as read from the TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Digest credentials for the CalDAV server.
    pub username: String,
    pub password: String,
    /// CalDAV root URL.
    pub uri: String,
    /// Display name of the calendar to watch.
    pub calendar_name: String,
    /// Default IANA zone for naked local datetimes.
    pub location: String,
    /// Store directory.
    pub storage_name: String,
    /// Sync token used on cold start.
    pub first_token: String,
    /// Earliest acceptable clock instant, wall form in `location`.
    pub mintime: String,
    /// SMS gateway base URL; phone and text are appended as the `n`
    /// and `m` query parameters.
    pub sms_gateway: String,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub uri: String,
    pub calendar_name: String,
    pub zone: Tz,
    pub storage_dir: PathBuf,
    pub first_token: String,
    pub mintime: DateTime<Utc>,
    pub sms_gateway: Url,
}

/// Default config file path (~/.config/caltext/config.toml).
pub fn config_path() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("Could not determine config directory")?
        .join("caltext")
        .join("config.toml"))
}

impl Config {
    /// Load the config file.
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            anyhow::bail!(
                "Config file not found at {}\n\n\
                Create it with your CalDAV and gateway settings:\n\n\
                username = \"user\"\n\
                password = \"secret\"\n\
                uri = \"http://server:8080/baikal/html/dav.php\"\n\
                calendar_name = \"reminders\"\n\
                location = \"Europe/Moscow\"\n\
                storage_name = \"~/.local/share/caltext\"\n\
                first_token = \"http://sabre.io/ns/sync/0\"\n\
                mintime = \"20240101T000000\"\n\
                sms_gateway = \"http://gateway/send.html?u=admin&p=admin&l=2\"",
                path.display()
            );
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        Ok(config)
    }

    /// Check the fatal configuration conditions up front.
    pub fn validate(self) -> Result<Settings> {
        if self.first_token.is_empty() {
            anyhow::bail!("first_token must not be empty");
        }
        let zone = time::load_zone(&self.location)
            .with_context(|| format!("Unloadable location '{}'", self.location))?;
        let mintime = time::to_instant(&self.mintime, zone)
            .with_context(|| format!("Unparseable mintime '{}'", self.mintime))?;
        let sms_gateway = Url::parse(&self.sms_gateway)
            .with_context(|| format!("Invalid sms_gateway URL '{}'", self.sms_gateway))?;

        Ok(Settings {
            username: self.username,
            password: self.password,
            uri: self.uri,
            calendar_name: self.calendar_name,
            zone,
            storage_dir: expand_path(&self.storage_name),
            first_token: self.first_token,
            mintime,
            sms_gateway,
        })
    }
}

/// Expand ~ in paths to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
