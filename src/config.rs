use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Upper bound for both buffer sizes (1 GiB)
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024 * 1024;

/// Default config file, overridden by the first CLI argument
pub const DEFAULT_CONFIG_PATH: &str = "sni-proxy.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Largest TLS record (ClientHello) accepted from a client, in bytes
    #[serde(default = "default_buffer_size", alias = "headBufferSize")]
    pub head_buffer_size: usize,
    /// Per-direction pump buffer size, in bytes
    #[serde(default = "default_buffer_size", alias = "forwarderBufferSize")]
    pub forwarder_buffer_size: usize,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(alias = "proxyType")]
    pub proxy_type: ProxyKind,
    #[serde(alias = "proxyHost")]
    pub proxy_host: String,
    #[serde(alias = "proxyPort")]
    pub proxy_port: u16,
    #[serde(alias = "bindHost")]
    pub bind_host: String,
    #[serde(alias = "bindPort")]
    pub bind_port: u16,
    /// TLS port on the SNI host, reached through the proxy
    #[serde(alias = "dstPort")]
    pub dst_port: u16,
}

/// Kind of forward proxy the upstream leg goes through
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Socks,
    Http,
}

impl<'de> Deserialize<'de> for ProxyKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("socks") {
            Ok(ProxyKind::Socks)
        } else if s.eq_ignore_ascii_case("http") {
            Ok(ProxyKind::Http)
        } else {
            Err(format!(
                "unknown proxy type: \"{}\", available: [\"socks\", \"http\"]",
                s
            ))
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Socks => f.write_str("socks"),
            ProxyKind::Http => f.write_str("http"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (RUST_LOG takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console only when unset
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub json: bool,
    /// Rotate the log file daily
    #[serde(default)]
    pub rotation: bool,
}

fn default_buffer_size() -> usize {
    8 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
            rotation: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            head_buffer_size: default_buffer_size(),
            forwarder_buffer_size: default_buffer_size(),
            servers: vec![ServerConfig {
                proxy_type: ProxyKind::Socks,
                proxy_host: "127.0.0.1".to_string(),
                proxy_port: 1080,
                bind_host: "0.0.0.0".to_string(),
                bind_port: 443,
                dst_port: 443,
            }],
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn proxy_address(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let config: AppConfig = if is_json {
            serde_json::from_str(&content).with_context(|| "Failed to parse JSON config file")?
        } else {
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        };
        Ok(config)
    }

    /// Load configuration from file or use default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config file, using defaults: {:#}", e);
            Self::default()
        })
    }

    /// Check buffer ranges, port ranges and bind conflicts
    pub fn validate(&self) -> Result<()> {
        check_buffer_size("headBufferSize", self.head_buffer_size)?;
        check_buffer_size("forwarderBufferSize", self.forwarder_buffer_size)?;

        if self.servers.is_empty() {
            bail!("empty servers");
        }

        let mut binds = HashSet::new();
        for server in &self.servers {
            check_port("proxyPort", server.proxy_port)?;
            check_port("bindPort", server.bind_port)?;
            check_port("dstPort", server.dst_port)?;
            if server.proxy_host.trim().is_empty() {
                bail!("proxyHost must not be empty");
            }
            if server.bind_host.trim().is_empty() {
                bail!("bindHost must not be empty");
            }
            if !binds.insert((server.bind_host.as_str(), server.bind_port)) {
                bail!("duplicate bind address: {}", server.bind_address());
            }
        }
        Ok(())
    }
}

fn check_buffer_size(name: &str, size: usize) -> Result<()> {
    if size == 0 || size > MAX_BUFFER_SIZE {
        bail!(
            "{} {} out of range: (0, {}]",
            name,
            size,
            MAX_BUFFER_SIZE
        );
    }
    Ok(())
}

fn check_port(name: &str, port: u16) -> Result<()> {
    if port == 0 {
        bail!("{} {} out of range: (0, 65535]", name, port);
    }
    Ok(())
}
