use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use peertty_core::relay::DEFAULT_RELAY_URL;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Share a terminal with a remote peer")]
pub struct Config {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// End the session on malformed control messages instead of ignoring them
    #[arg(long, global = true)]
    pub strict: bool,

    /// Subcommand (defaults to `host`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Share a terminal running the given command (default: bash)
    Host {
        /// Exchange descriptions through the relay instead of pasting the answer
        #[arg(short = 'o', long)]
        one_way: bool,

        /// Do not echo the session locally or read local input
        #[arg(long)]
        non_interactive: bool,

        /// Address to listen on for the client
        #[arg(long)]
        listen: Option<String>,

        /// Host name or address to put in the offer
        #[arg(long)]
        advertise: Option<String>,

        /// Relay base URL for one-way connections
        #[arg(long)]
        relay_url: Option<String>,

        /// Command and arguments to run on the pty
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Join a shared terminal using the host's offer
    Connect {
        /// Offer token printed by the host
        offer: String,

        /// Relay base URL for one-way connections
        #[arg(long)]
        relay_url: Option<String>,
    },
    /// Serve a relay for one-way connections
    Relay {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether the host was asked to use the relay handshake
    pub fn is_one_way(&self) -> bool {
        matches!(self.command, Some(Command::Host { one_way: true, .. }))
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Host session settings
    #[serde(default)]
    pub host: HostSettings,

    /// One-way relay settings
    #[serde(default)]
    pub relay: RelaySettings,

    /// Control protocol settings
    #[serde(default)]
    pub protocol: ProtocolSettings,
}

/// Host session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Command and arguments to share
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Do not echo the session locally or read local input
    #[serde(default)]
    pub non_interactive: bool,

    /// Listen address for the client connection
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Host name put in the offer; detected when unset
    #[serde(default)]
    pub advertise: Option<String>,
}

fn default_command() -> Vec<String> {
    vec!["bash".to_string()]
}

fn default_listen() -> String {
    "0.0.0.0:0".to_string()
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            non_interactive: false,
            listen: default_listen(),
            advertise: None,
        }
    }
}

/// One-way relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Relay base URL
    #[serde(default = "default_relay_url")]
    pub url: String,

    /// Delay between polls for the answer
    #[serde(default = "default_relay_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up waiting for the answer after this long (unset: wait forever)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_string()
}

fn default_relay_poll_interval() -> u64 {
    300
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            poll_interval_ms: default_relay_poll_interval(),
            timeout_secs: None,
        }
    }
}

impl RelaySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Control protocol settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// End the session on malformed control messages
    #[serde(default)]
    pub strict: bool,
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::read(p);
            }
            tracing::warn!("Config file not found: {:?}", p);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("peertty/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/peertty/config.toml")),
            dirs::home_dir().map(|p| p.join(".peertty.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::read(path);
            }
        }

        Ok(Self::default())
    }

    fn read(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let settings =
            toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if cli.strict {
            self.protocol.strict = true;
        }

        match &cli.command {
            Some(Command::Host {
                non_interactive,
                listen,
                advertise,
                relay_url,
                cmd,
                ..
            }) => {
                if *non_interactive {
                    self.host.non_interactive = true;
                }
                if let Some(listen) = listen {
                    self.host.listen = listen.clone();
                }
                if let Some(advertise) = advertise {
                    self.host.advertise = Some(advertise.clone());
                }
                if let Some(url) = relay_url {
                    self.relay.url = url.clone();
                }
                if !cmd.is_empty() {
                    self.host.command = cmd.clone();
                }
            }
            Some(Command::Connect {
                relay_url: Some(url),
                ..
            }) => {
                self.relay.url = url.clone();
            }
            _ => {}
        }
    }

    /// Validate and normalize settings values
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 1;

        if self.relay.poll_interval_ms < MIN_POLL_INTERVAL {
            self.relay.poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.host.command.first().is_none_or(|program| program.is_empty()) {
            self.host.command = default_command();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.host.command, vec!["bash"]);
        assert_eq!(settings.host.listen, "0.0.0.0:0");
        assert!(!settings.host.non_interactive);
        assert_eq!(settings.relay.url, DEFAULT_RELAY_URL);
        assert_eq!(settings.relay.poll_interval(), Duration::from_millis(300));
        assert_eq!(settings.relay.timeout(), None);
        assert!(!settings.protocol.strict);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [host]
            command = ["tmux", "attach"]
            advertise = "shell.example.net"

            [relay]
            url = "http://127.0.0.1:8080/"
            timeout_secs = 120

            [protocol]
            strict = true
        "#;

        let settings: Settings = toml::from_str(toml).expect("Should parse TOML");
        assert_eq!(settings.host.command, vec!["tmux", "attach"]);
        assert_eq!(settings.host.advertise.as_deref(), Some("shell.example.net"));
        assert_eq!(settings.host.listen, "0.0.0.0:0");
        assert_eq!(settings.relay.url, "http://127.0.0.1:8080/");
        assert_eq!(settings.relay.poll_interval_ms, 300);
        assert_eq!(settings.relay.timeout(), Some(Duration::from_secs(120)));
        assert!(settings.protocol.strict);
    }

    #[test]
    fn test_cli_host_trailing_command() {
        let cli = Config::try_parse_from([
            "peertty", "--strict", "host", "-o", "--listen", "127.0.0.1:9000", "--", "htop", "-d", "10",
        ])
        .unwrap();
        assert!(cli.is_one_way());

        let mut settings = Settings::default();
        settings.merge_cli(&cli);
        assert_eq!(settings.host.command, vec!["htop", "-d", "10"]);
        assert_eq!(settings.host.listen, "127.0.0.1:9000");
        assert!(settings.protocol.strict);
    }

    #[test]
    fn test_cli_connect() {
        let cli = Config::try_parse_from([
            "peertty",
            "connect",
            "eyJTZHAiOiIifQ==",
            "--relay-url",
            "http://relay.local/",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Connect {
                offer: "eyJTZHAiOiIifQ==".to_string(),
                relay_url: Some("http://relay.local/".to_string()),
            })
        );
        assert!(!cli.is_one_way());

        let mut settings = Settings::default();
        settings.merge_cli(&cli);
        assert_eq!(settings.relay.url, "http://relay.local/");
        assert_eq!(settings.host.command, vec!["bash"]);
    }

    #[test]
    fn test_cli_without_subcommand() {
        let cli = Config::try_parse_from(["peertty", "-d"]).unwrap();
        assert!(cli.debug);
        assert_eq!(cli.command, None);

        let cli = Config::try_parse_from(["peertty", "relay"]).unwrap();
        assert_eq!(cli.command, Some(Command::Relay { port: 8080 }));
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        settings.relay.poll_interval_ms = 0;
        settings.host.command = Vec::new();
        settings.validate();
        assert_eq!(settings.relay.poll_interval_ms, 1);
        assert_eq!(settings.host.command, vec!["bash"]);

        settings.host.command = vec![String::new(), "x".to_string()];
        settings.validate();
        assert_eq!(settings.host.command, vec!["bash"]);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[host]\nnon_interactive = true\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.host.non_interactive);
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[host\n").unwrap();

        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_from_home() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join(".peertty.toml"),
            "[relay]\npoll_interval_ms = 50\n",
        )
        .unwrap();
        let config_home = home.path().join(".config");

        temp_env::with_vars(
            [
                ("HOME", Some(home.path().as_os_str())),
                ("XDG_CONFIG_HOME", Some(config_home.as_os_str())),
            ],
            || {
                let settings = Settings::load(None).unwrap();
                assert_eq!(settings.relay.poll_interval_ms, 50);
            },
        );
    }

    #[test]
    fn test_load_defaults_without_files() {
        let home = tempfile::tempdir().unwrap();
        let config_home = home.path().join(".config");

        temp_env::with_vars(
            [
                ("HOME", Some(home.path().as_os_str())),
                ("XDG_CONFIG_HOME", Some(config_home.as_os_str())),
            ],
            || {
                let settings = Settings::load(None).unwrap();
                assert_eq!(settings.relay.poll_interval_ms, 300);
                assert_eq!(settings.host.command, vec!["bash"]);
            },
        );
    }
}
