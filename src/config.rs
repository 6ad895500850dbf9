use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// `KEY=VALUE` file with `#` comments, optional `export ` prefixes and quoted values.
#[derive(Debug, Default, Clone)]
pub struct AppConfig {
    values: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(anyhow!("Invalid config line {}: {}", idx + 1, line));
            };
            let key = key.trim();
            let mut value = value.trim().to_string();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = value[1..value.len() - 1].to_string();
            }
            values.insert(key.to_string(), value);
        }
        Ok(Self { values })
    }

    /// Loads `CONFIG_FILE` when it is set, otherwise starts empty.
    pub fn load() -> Result<Self> {
        match env::var("CONFIG_FILE") {
            Ok(path) => Self::from_file(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    /// File value first, process environment second.
    pub fn get_prop(&self, key: &str) -> Option<String> {
        self.get(key).or_else(|| env::var(key).ok())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: Option<String>,
    pub store_path: PathBuf,
    pub key_prefix: String,
    pub poll_interval: Duration,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub display_timezone: Tz,
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::from_lookup(|key| config.get_prop(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a valid number", key)),
                None => Ok(default),
            }
        };

        let display_timezone = match lookup("DISPLAY_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow!("DISPLAY_TIMEZONE is not a known zone: {}", e))?,
            None => Tz::UTC,
        };

        let poll_interval = number("POLL_INTERVAL_SECONDS", 10)?;
        if poll_interval == 0 {
            return Err(anyhow!("POLL_INTERVAL_SECONDS must be greater than zero"));
        }

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()),
            store_path: lookup("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/calendars.json")),
            key_prefix: lookup("KEY_PREFIX").unwrap_or_else(|| "calbot".to_string()),
            poll_interval: Duration::from_secs(poll_interval),
            max_concurrent_fetches: number("MAX_CONCURRENT_FETCHES", 8)?.max(1) as usize,
            fetch_timeout: Duration::from_secs(number("FETCH_TIMEOUT_SECONDS", 30)?),
            display_timezone,
        })
    }

    pub fn require_discord_token(&self) -> Result<&str> {
        self.discord_token
            .as_deref()
            .context("DISCORD_TOKEN must be set to run the bot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_exports_and_quotes() {
        let config = AppConfig::parse(
            "# bot settings\nexport DISCORD_TOKEN=\"abc\"\nKEY_PREFIX = 'ops'\n\nPOLL_INTERVAL_SECONDS=30\n",
        )
        .unwrap();
        assert_eq!(config.get("DISCORD_TOKEN"), Some("abc".to_string()));
        assert_eq!(config.get("KEY_PREFIX"), Some("ops".to_string()));
        assert_eq!(config.get("POLL_INTERVAL_SECONDS"), Some("30".to_string()));
    }

    #[test]
    fn rejects_lines_without_assignment() {
        assert!(AppConfig::parse("JUST_A_KEY").is_err());
    }

    #[test]
    fn settings_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.discord_token, None);
        assert_eq!(settings.key_prefix, "calbot");
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.max_concurrent_fetches, 8);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.display_timezone, Tz::UTC);
        assert_eq!(settings.store_path, PathBuf::from("./data/calendars.json"));
        assert!(settings.require_discord_token().is_err());
    }

    #[test]
    fn settings_reject_bad_values() {
        let bad_number = Settings::from_lookup(|key| {
            (key == "POLL_INTERVAL_SECONDS").then(|| "soon".to_string())
        });
        assert!(bad_number.is_err());

        let bad_zone = Settings::from_lookup(|key| {
            (key == "DISPLAY_TIMEZONE").then(|| "Mars/Olympus".to_string())
        });
        assert!(bad_zone.is_err());

        let zero = Settings::from_lookup(|key| {
            (key == "POLL_INTERVAL_SECONDS").then(|| "0".to_string())
        });
        assert!(zero.is_err());
    }

    #[test]
    fn settings_read_overrides() {
        let config = AppConfig::parse(
            "DISPLAY_TIMEZONE=Europe/Berlin\nMAX_CONCURRENT_FETCHES=2\nSTORE_PATH=/tmp/cal.json\n",
        )
        .unwrap();
        let settings = Settings::from_lookup(|key| config.get(key)).unwrap();
        assert_eq!(settings.display_timezone, chrono_tz::Europe::Berlin);
        assert_eq!(settings.max_concurrent_fetches, 2);
        assert_eq!(settings.store_path, PathBuf::from("/tmp/cal.json"));
    }
}
