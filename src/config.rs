use crate::service::{Dependency, Service};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PROXY_IMAGE: &str = "yarlson/zero-nginx:latest";

#[derive(Deserialize, Debug, Clone)]
pub struct Project {
    pub name: String,
    /// Public domain the proxy terminates TLS for.
    pub domain: String,
    /// Contact address used for certificate registration.
    pub email: String,
}

/// Knobs for the engine itself, not for the deployed services.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// How long old and new containers share the service alias during
    /// cutover. Bounds the overlap window, does not eliminate it.
    #[serde(with = "duration", default = "default_settle_interval")]
    pub settle_interval: Duration,
    /// Upper bound for any single remote command, image pulls included.
    #[serde(with = "duration", default = "default_command_timeout")]
    pub command_timeout: Duration,
    #[serde(default = "default_proxy_image")]
    pub proxy_image: String,
}

fn default_settle_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_proxy_image() -> String {
    DEFAULT_PROXY_IMAGE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settle_interval: default_settle_interval(),
            command_timeout: default_command_timeout(),
            proxy_image: default_proxy_image(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProjectConfig {
    pub project: Project,
    /// Named volumes, created as `<project>-<name>`.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub settings: Settings,
}

/// Reads the project file and lets `GANTRY_`-prefixed variables override it,
/// e.g. `GANTRY_SETTINGS__SETTLE_INTERVAL=2s`.
pub fn load_config(config_path: &Path) -> Result<ProjectConfig, figment::Error> {
    Figment::new()
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("GANTRY_").split("__"))
        .extract()
}

/// Serde adapter for durations written as integer seconds or as `"500ms"`,
/// `"2s"`, `"1m"`.
pub mod duration {
    use serde::{Deserialize, Deserializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (amount, unit) = text.split_at(split);
        let amount: u64 = amount
            .parse()
            .map_err(|_| format!("invalid duration `{text}`"))?;
        match unit.trim() {
            "ms" => Ok(Duration::from_millis(amount)),
            "" | "s" => Ok(Duration::from_secs(amount)),
            "m" => Ok(Duration::from_secs(amount * 60)),
            other => Err(format!("unknown duration unit `{other}` in `{text}`")),
        }
    }
}
