//! Agent and collector settings.
//!
//! Built-in defaults, overridden by an optional YAML file, overridden by
//! environment variables. Anything that does not parse is reported before
//! the process starts doing work.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    aggregate::parse_duration, exporter::ExporterConfig, store::StoreConfig, Error, Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub interval_seconds: u64,
    /// Overrides the host name reported by the OS.
    pub hostname: Option<String>,
    pub shutdown_grace_seconds: u64,
    pub collectors: CollectorFlags,
    pub exporters: Exporters,
}
impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            hostname: None,
            shutdown_grace_seconds: 5,
            collectors: CollectorFlags::default(),
            exporters: Exporters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorFlags {
    pub cpu: bool,
    pub memory: bool,
}
impl Default for CollectorFlags {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Exporters {
    pub logging: ExporterSettings,
    pub webservice: WebServiceSettings,
}
impl Default for Exporters {
    fn default() -> Self {
        Self {
            logging: ExporterSettings {
                enabled: false,
                ..ExporterSettings::default()
            },
            webservice: WebServiceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExporterSettings {
    pub enabled: bool,
    pub batching: bool,
    pub flush_interval_seconds: u64,
}
impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batching: true,
            flush_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebServiceSettings {
    pub enabled: bool,
    pub batching: bool,
    pub flush_interval_seconds: u64,
    pub server_url: String,
    pub timeout_seconds: u64,
}
impl Default for WebServiceSettings {
    fn default() -> Self {
        let exporter = ExporterSettings::default();
        Self {
            enabled: exporter.enabled,
            batching: exporter.batching,
            flush_interval_seconds: exporter.flush_interval_seconds,
            server_url: "http://localhost:8080/metrics".to_string(),
            timeout_seconds: 5,
        }
    }
}
impl WebServiceSettings {
    pub fn exporter(&self) -> ExporterSettings {
        ExporterSettings {
            enabled: self.enabled,
            batching: self.batching,
            flush_interval_seconds: self.flush_interval_seconds,
        }
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AgentConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_yaml(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("AGENT_COLLECTION_INTERVAL") {
            self.interval_seconds = parse_u64("AGENT_COLLECTION_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("AGENT_FLUSH_INTERVAL") {
            let secs = parse_u64("AGENT_FLUSH_INTERVAL", &v)?;
            self.exporters.logging.flush_interval_seconds = secs;
            self.exporters.webservice.flush_interval_seconds = secs;
        }
        if let Some(v) = lookup("AGENT_BATCHING_ENABLED") {
            let batching = parse_bool("AGENT_BATCHING_ENABLED", &v)?;
            self.exporters.logging.batching = batching;
            self.exporters.webservice.batching = batching;
        }
        if let Some(v) = lookup("AGENT_SERVER_URL") {
            self.exporters.webservice.server_url = v;
        }
        if let Some(v) = lookup("AGENT_WEBSERVICE_ENABLED") {
            self.exporters.webservice.enabled = parse_bool("AGENT_WEBSERVICE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("AGENT_LOGGING_ENABLED") {
            self.exporters.logging.enabled = parse_bool("AGENT_LOGGING_ENABLED", &v)?;
        }
        if let Some(v) = lookup("AGENT_HOSTNAME") {
            self.hostname = Some(v).filter(|v| !v.is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(Error::config("interval_seconds", "must be greater than zero"));
        }
        for flush_interval in [
            self.exporters.logging.flush_interval_seconds,
            self.exporters.webservice.flush_interval_seconds,
        ] {
            if flush_interval == 0 {
                return Err(Error::config(
                    "flush_interval_seconds",
                    "must be greater than zero",
                ));
            }
        }
        let web = &self.exporters.webservice;
        if web.enabled {
            let url = web.server_url.as_str();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::config(
                    "server_url",
                    format!("`{}` is not an http(s) URL", web.server_url),
                ));
            }
            if web.timeout_seconds == 0 {
                return Err(Error::config("timeout_seconds", "must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
    pub fn exporter_config(&self, settings: &ExporterSettings) -> ExporterConfig {
        ExporterConfig {
            flush_interval: Duration::from_secs(settings.flush_interval_seconds),
            batching: settings.batching,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub bind: String,
    /// `<integer><unit>`, unit one of `s`, `m`, `h`, `d`.
    pub retention: String,
    pub aggregation_interval: String,
}
impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            retention: "24h".to_string(),
            aggregation_interval: "5m".to_string(),
        }
    }
}
impl CollectorConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_yaml(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("COLLECTOR_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("COLLECTOR_RETENTION") {
            self.retention = v;
        }
        if let Some(v) = lookup("COLLECTOR_AGGREGATION_INTERVAL") {
            self.aggregation_interval = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        self.store_config()?;
        Ok(())
    }

    /// `host:port`; host names are resolved and the first address wins.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let mut addrs = self
            .bind
            .to_socket_addrs()
            .map_err(|e| Error::config("bind", format!("`{}`: {e}", self.bind)))?;
        addrs
            .next()
            .ok_or_else(|| Error::config("bind", format!("`{}` resolves to nothing", self.bind)))
    }
    pub fn store_config(&self) -> Result<StoreConfig> {
        let retention = parse_duration(&self.retention)?;
        let aggregation_interval = parse_duration(&self.aggregation_interval)?;
        if retention.is_zero() {
            return Err(Error::config("retention", "must be greater than zero"));
        }
        if aggregation_interval.is_zero() {
            return Err(Error::config("aggregation_interval", "must be greater than zero"));
        }
        Ok(StoreConfig {
            retention,
            aggregation_interval,
        })
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_yaml::from_str(&text).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(field, format!("`{value}`: {e}")))
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(field, format!("`{value}` is not a boolean"))),
    }
}
