//! Configuration loading for mcp-hass.
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. **Built-in defaults**
//! 2. **JSON file** via `--config <path>` or the `HASS_MCP_CONFIG` environment variable
//! 3. **Environment variables** (`HASS_URL`, `HASS_ACCESS_TOKEN`, `DEBUG`, ...)
//! 4. **CLI flags** (`--transport`, `--port`)
//!
//! An access token is required unless `INSPECT` is set, which lets the server
//! start so its capability list can be browsed without a hub.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

pub const DEFAULT_URL: &str = "ws://localhost:8123";
pub const DEFAULT_PORT: u16 = 3000;

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug, Default)]
#[command(name = "mcp-hass", version, about = "MCP server for Home Assistant")]
pub struct Cli {
    /// Path to a JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Transport to serve the protocol over
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,
    /// Listening port for the HTTP transports
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
    #[value(name = "streamablehttp")]
    StreamableHttp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamablehttp" => Ok(Self::StreamableHttp),
            other => Err(format!(
                "Unknown transport '{other}' (expected stdio, sse or streamablehttp)"
            )),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamablehttp",
        })
    }
}

/// Raw JSON config file; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    url: Option<String>,
    access_token: Option<String>,
    debug: Option<bool>,
    resources_to_tools: Option<bool>,
    limit_resources: Option<i64>,
    no_long_output_types: Option<bool>,
    transport: Option<Transport>,
    port: Option<u16>,
    inspect: Option<bool>,
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub url: String,
    pub access_token: String,
    pub debug: bool,
    /// Present every capability as a tool.
    pub resources_to_tools: bool,
    /// Registration ceiling; negative is unlimited.
    pub limit_resources: i64,
    pub no_long_output_types: bool,
    pub transport: Transport,
    pub port: u16,
    pub inspect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            access_token: String::new(),
            debug: false,
            resources_to_tools: false,
            limit_resources: -1,
            no_long_output_types: false,
            transport: Transport::Stdio,
            port: DEFAULT_PORT,
            inspect: false,
        }
    }
}

impl Config {
    /// Copy safe to log: the access token is masked.
    pub fn redacted(&self) -> Self {
        Self {
            access_token: "***".to_string(),
            ..self.clone()
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(url) = file.url {
            self.url = url;
        }
        if let Some(token) = file.access_token {
            self.access_token = token;
        }
        if let Some(debug) = file.debug {
            self.debug = debug;
        }
        if let Some(v) = file.resources_to_tools {
            self.resources_to_tools = v;
        }
        if let Some(limit) = file.limit_resources {
            self.limit_resources = limit;
        }
        if let Some(v) = file.no_long_output_types {
            self.no_long_output_types = v;
        }
        if let Some(transport) = file.transport {
            self.transport = transport;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(inspect) = file.inspect {
            self.inspect = inspect;
        }
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(url) = lookup("HASS_URL").filter(|v| !v.is_empty()) {
            self.url = url;
        }
        if let Some(token) = lookup("HASS_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            self.access_token = token;
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = env_flag(&v);
        }
        if let Some(v) = lookup("RESOURCES_TO_TOOLS") {
            self.resources_to_tools = env_flag(&v);
        }
        if let Some(v) = lookup("LIMIT_RESOURCES").filter(|v| !v.trim().is_empty()) {
            self.limit_resources = v
                .trim()
                .parse()
                .map_err(|e| format!("LIMIT_RESOURCES must be an integer, got '{v}': {e}"))?;
        }
        if let Some(v) = lookup("NO_LONG_OUTPUT_TYPES") {
            self.no_long_output_types = env_flag(&v);
        }
        if let Some(v) = lookup("TRANSPORT").filter(|v| !v.is_empty()) {
            self.transport = v.parse()?;
        }
        if let Some(v) = lookup("PORT").filter(|v| !v.is_empty()) {
            self.port = v
                .parse()
                .map_err(|e| format!("PORT must be a port number, got '{v}': {e}"))?;
        }
        if let Some(v) = lookup("INSPECT") {
            self.inspect = env_flag(&v);
        }
        Ok(())
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

/// Load configuration from the process environment and `cli`.
pub fn load_config(cli: &Cli) -> Result<Config, String> {
    load_config_with(cli, |name| std::env::var(name).ok())
}

/// Load configuration with `lookup` standing in for the environment.
pub fn load_config_with(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Result<Config, String> {
    let mut config = Config::default();

    let file = cli
        .config
        .clone()
        .or_else(|| lookup("HASS_MCP_CONFIG").filter(|v| !v.is_empty()).map(PathBuf::from));
    if let Some(path) = file {
        config.apply_file(load_file(&expand_tilde(&path, &lookup))?);
    }

    config.apply_env(&lookup)?;

    if let Some(transport) = cli.transport {
        config.transport = transport;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    if config.url.is_empty() {
        return Err("Home Assistant URL is empty".into());
    }
    if config.access_token.is_empty() && !config.inspect {
        return Err("HASS_ACCESS_TOKEN is not set (set INSPECT=true to start without a hub)".into());
    }
    Ok(config)
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path, lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = lookup("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn load_file(path: &Path) -> Result<FileConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
    serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_with_token_only() {
        let config = load_config_with(&Cli::default(), env(&[("HASS_ACCESS_TOKEN", "abc")])).unwrap();
        assert_eq!(
            config,
            Config {
                access_token: "abc".into(),
                ..Config::default()
            }
        );
    }

    #[test]
    fn token_required_unless_inspecting() {
        let err = load_config_with(&Cli::default(), env(&[])).unwrap_err();
        assert!(err.contains("HASS_ACCESS_TOKEN"));

        let config = load_config_with(&Cli::default(), env(&[("INSPECT", "true")])).unwrap();
        assert!(config.inspect);
        assert!(config.access_token.is_empty());
    }

    #[test]
    fn env_overrides() {
        let config = load_config_with(
            &Cli::default(),
            env(&[
                ("HASS_URL", "https://hass.local:8123"),
                ("HASS_ACCESS_TOKEN", "abc"),
                ("DEBUG", "true"),
                ("RESOURCES_TO_TOOLS", "1"),
                ("LIMIT_RESOURCES", "25"),
                ("NO_LONG_OUTPUT_TYPES", "yes"),
                ("TRANSPORT", "streamablehttp"),
                ("PORT", "8080"),
            ]),
        )
        .unwrap();
        assert_eq!(config.url, "https://hass.local:8123");
        assert!(config.debug);
        assert!(config.resources_to_tools);
        assert_eq!(config.limit_resources, 25);
        assert!(!config.no_long_output_types);
        assert_eq!(config.transport, Transport::StreamableHttp);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn bad_env_values_are_errors() {
        let err = load_config_with(
            &Cli::default(),
            env(&[("HASS_ACCESS_TOKEN", "abc"), ("LIMIT_RESOURCES", "many")]),
        )
        .unwrap_err();
        assert!(err.starts_with("LIMIT_RESOURCES must be an integer"));

        let err = load_config_with(
            &Cli::default(),
            env(&[("HASS_ACCESS_TOKEN", "abc"), ("TRANSPORT", "grpc")]),
        )
        .unwrap_err();
        assert!(err.starts_with("Unknown transport 'grpc'"));
    }

    #[test]
    fn file_then_env_then_cli() {
        let file = config_file(
            r#"{
                "url": "http://from-file:8123",
                "access_token": "file-token",
                "limit_resources": 10,
                "transport": "sse",
                "port": 4000
            }"#,
        );
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            transport: None,
            port: Some(5000),
        };
        let config = load_config_with(&cli, env(&[("HASS_ACCESS_TOKEN", "env-token")])).unwrap();
        assert_eq!(config.url, "http://from-file:8123");
        assert_eq!(config.access_token, "env-token");
        assert_eq!(config.limit_resources, 10);
        assert_eq!(config.transport, Transport::Sse);
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn config_path_from_env_with_tilde() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("hass.json"), r#"{ "access_token": "t", "debug": true }"#).unwrap();
        let home_str = home.path().to_string_lossy().to_string();

        let config = load_config_with(
            &Cli::default(),
            env(&[("HASS_MCP_CONFIG", "~/hass.json"), ("HOME", home_str.as_str())]),
        )
        .unwrap();
        assert_eq!(config.access_token, "t");
        assert!(config.debug);
    }

    #[test]
    fn unreadable_or_malformed_file() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/hass.json")),
            ..Cli::default()
        };
        let err = load_config_with(&cli, env(&[("HASS_ACCESS_TOKEN", "abc")])).unwrap_err();
        assert!(err.starts_with("Failed to read config file"));

        let file = config_file("{ not json");
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            ..Cli::default()
        };
        let err = load_config_with(&cli, env(&[("HASS_ACCESS_TOKEN", "abc")])).unwrap_err();
        assert!(err.starts_with("Failed to parse config file"));
    }

    #[test]
    fn redacted_masks_token() {
        let config = Config {
            access_token: "secret".into(),
            ..Config::default()
        };
        let shown = format!("{:?}", config.redacted());
        assert!(!shown.contains("secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn cli_parses_transport_names() {
        let cli = Cli::parse_from(["mcp-hass", "--transport", "streamablehttp", "--port", "9000"]);
        assert_eq!(cli.transport, Some(Transport::StreamableHttp));
        assert_eq!(cli.port, Some(9000));
        assert_eq!("SSE".parse::<Transport>(), Ok(Transport::Sse));
    }
}
