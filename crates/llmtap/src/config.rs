//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Log level filter (e.g. "info", "llmtap=debug,info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream base URL (scheme + host, optional base path).
    /// Set via CLI `--target`; a TOML value acts as the default.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-exchange upstream timeout, covering the whole response stream.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Capture log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Reassemble SSE responses into the logical JSON at capture time
    /// instead of storing the raw event list for cook to reassemble.
    #[serde(default)]
    pub eager_reassembly: bool,
}

impl ServerConfig {
    /// Replace the port of the configured listen address, keeping the host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .listen_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.listen_address)
            .to_string();
        self.listen_address = format!("{host}:{port}");
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            eager_reassembly: false,
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_output() -> PathBuf {
    PathBuf::from("llmtap.jsonl")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ProxyConfig {
    /// Load configuration from an optional TOML file and environment
    /// variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLMTAP_ prefix, __ for nesting)
    /// 2. TOML config file (missing file is fine)
    /// 3. Defaults
    ///
    /// CLI flags are applied on top by the caller.
    pub fn load(config_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let path = config_path.unwrap_or_else(|| std::path::Path::new("llmtap.toml"));
        let config: ProxyConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LLMTAP_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_config_file() {
        let config = ProxyConfig::load(Some(std::path::Path::new("/nonexistent.toml"))).unwrap();
        assert_eq!(config.server.listen_address, "127.0.0.1:8080");
        assert_eq!(config.upstream.timeout_secs, 300);
        assert_eq!(config.capture.output, PathBuf::from("llmtap.jsonl"));
        assert!(!config.capture.eager_reassembly);
        assert!(config.upstream.url.is_none());
    }

    #[test]
    fn test_set_port_keeps_configured_host() {
        let mut server = ServerConfig {
            listen_address: "0.0.0.0:3080".into(),
        };
        server.set_port(9000);
        assert_eq!(server.listen_address, "0.0.0.0:9000");

        let mut ipv6 = ServerConfig {
            listen_address: "[::1]:8080".into(),
        };
        ipv6.set_port(9000);
        assert_eq!(ipv6.listen_address, "[::1]:9000");

        let mut bare = ServerConfig {
            listen_address: "localhost".into(),
        };
        bare.set_port(9000);
        assert_eq!(bare.listen_address, "localhost:9000");
    }

    #[test]
    fn test_toml_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llmtap.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n\n\
             [upstream]\nurl = \"https://api.openai.com\"\ntimeout_secs = 60\n\n\
             [capture]\noutput = \"trace.jsonl\"\neager_reassembly = true\n",
        )
        .unwrap();

        let config = ProxyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.upstream.url.as_deref(), Some("https://api.openai.com"));
        assert_eq!(config.upstream.timeout_secs, 60);
        assert_eq!(config.capture.output, PathBuf::from("trace.jsonl"));
        assert!(config.capture.eager_reassembly);
    }
}
