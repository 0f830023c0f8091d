use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::protocol::{CameraParams, DEFAULT_PORT};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Camera settings sent with recording / capture commands.
    #[serde(default)]
    pub camera: CameraParams,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Name of the rig to connect to, looked up in `hosts`.
    #[serde(default = "default_target")]
    pub target: String,
    /// Direct host override; takes precedence over `target`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Named rigs and their addresses.
    #[serde(default = "default_hosts")]
    pub hosts: BTreeMap<String, String>,
}

fn default_target() -> String {
    "chico".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_hosts() -> BTreeMap<String, String> {
    // Address of the rig's own access point.
    BTreeMap::from([("chico".to_string(), "10.42.0.1".to_string())])
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            host: None,
            port: default_port(),
            hosts: default_hosts(),
        }
    }
}

impl ConnectionConfig {
    /// The address to dial: explicit `host` if set, otherwise the `target`
    /// entry from `hosts`.
    pub fn resolve_host(&self) -> Result<String> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }
        self.hosts
            .get(&self.target)
            .cloned()
            .with_context(|| format!("unknown connection target {:?}", self.target))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Could not load {}: {e}; using defaults",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.port, 8000);
        assert_eq!(config.connection.target, "chico");
        assert_eq!(config.connection.resolve_host().unwrap(), "10.42.0.1");
        assert_eq!(config.camera.jpeg_quality, 85);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            host = "192.168.1.50"
            port = 8001

            [camera]
            jpeg_quality = 95
            ae_lock = true
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.resolve_host().unwrap(), "192.168.1.50");
        assert_eq!(config.connection.port, 8001);
        assert_eq!(config.camera.jpeg_quality, 95);
        assert!(config.camera.ae_lock);
        // Untouched fields keep their defaults.
        assert_eq!(config.camera.exposure_low, 10_000);
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            target = "nonesuch"
            "#,
        )
        .unwrap();
        assert!(config.connection.resolve_host().is_err());
    }

    #[test]
    fn test_extra_hosts() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            target = "backyard"

            [connection.hosts]
            backyard = "10.42.0.2"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.resolve_host().unwrap(), "10.42.0.2");
    }
}
