use crate::config::duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Label under which a container records the hash of the service definition it was created from.
pub const CONFIG_HASH_LABEL: &str = "gantry.config-hash";

fn default_port() -> u16 {
    80
}

/// Desired state of one application service.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub image: String,
    /// Port the service listens on inside the container.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// `name:/path` bindings are named volumes and get namespaced to the
    /// project; `/host:/path` bindings are used as they are.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Published ports in `host:container` form.
    #[serde(default)]
    pub forwards: Vec<String>,
    pub health_check: Option<HealthCheck>,
    /// Paths the proxy routes to this service. Not part of the content hash.
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub path: String,
    #[serde(with = "duration")]
    pub interval: Duration,
    #[serde(with = "duration")]
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Route {
    pub path: String,
    #[serde(default)]
    pub strip_prefix: bool,
}

/// Auxiliary workload such as a database. Deployed like a service but never
/// health gated and never routed.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl From<&Dependency> for Service {
    fn from(dependency: &Dependency) -> Self {
        Service {
            name: dependency.name.clone(),
            image: dependency.image.clone(),
            port: default_port(),
            env: dependency.env.clone(),
            volumes: dependency.volumes.clone(),
            forwards: Vec::new(),
            health_check: None,
            routes: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct HashedHealthCheck<'a> {
    path: &'a str,
    interval_ms: u64,
    timeout_ms: u64,
    retries: u32,
}

#[derive(Serialize)]
struct HashedFields<'a> {
    image: &'a str,
    port: u16,
    env: BTreeMap<&'a str, &'a str>,
    volumes: Vec<&'a str>,
    forwards: Vec<&'a str>,
    health_check: Option<HashedHealthCheck<'a>>,
}

impl Service {
    /// Hex encoded SHA-256 over the fields that shape the running container.
    ///
    /// Lists are sorted first, so reordering volumes or forwards in the
    /// project file does not count as a change.
    pub fn config_hash(&self) -> String {
        let mut volumes: Vec<&str> = self.volumes.iter().map(String::as_str).collect();
        volumes.sort_unstable();
        let mut forwards: Vec<&str> = self.forwards.iter().map(String::as_str).collect();
        forwards.sort_unstable();

        let fields = HashedFields {
            image: &self.image,
            port: self.port,
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            volumes,
            forwards,
            health_check: self.health_check.as_ref().map(|hc| HashedHealthCheck {
                path: &hc.path,
                interval_ms: hc.interval.as_millis() as u64,
                timeout_ms: hc.timeout.as_millis() as u64,
                retries: hc.retries,
            }),
        };
        // serializing plain structs, string maps and vectors cannot fail
        let canonical = serde_json::to_vec(&fields).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Binds a volume declaration to the project: named volumes become
/// `<project>-<name>`, paths are kept verbatim.
pub fn namespace_volume(project: &str, volume: &str) -> String {
    match volume.chars().next() {
        Some(c) if c.is_alphabetic() => format!("{project}-{volume}"),
        _ => volume.to_string(),
    }
}
